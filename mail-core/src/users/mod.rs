//! User repository
//!
//! The mail core only asks two questions of its user store: does an identity
//! exist, and does a password match. Passwords are hashed with Argon2 in
//! every implementation.

pub mod sqlite;

pub use sqlite::SqliteUsersRepository;

use crate::error::{MailError, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[async_trait]
pub trait UsersRepository: Send + Sync {
    async fn contains(&self, user: &str) -> Result<bool>;

    /// Check a password; unknown users simply fail
    async fn test(&self, user: &str, password: &str) -> Result<bool>;
}

/// Hash password with Argon2
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| MailError::Config(format!("Failed to hash password: {}", e)))?;

    Ok(password_hash.to_string())
}

pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool> {
    let parsed_hash =
        PasswordHash::new(stored_hash).map_err(|_e| MailError::AuthenticationFailed)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// In-process user store for tests and the memory backend
#[derive(Default)]
pub struct MemoryUsersRepository {
    users: RwLock<HashMap<String, String>>,
}

impl MemoryUsersRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user: &str, password: &str) -> Result<()> {
        let password_hash = hash_password(password)?;
        self.users
            .write()
            .await
            .insert(user.to_string(), password_hash);
        info!("User added: {}", user);
        Ok(())
    }

    pub async fn delete_user(&self, user: &str) -> Result<bool> {
        Ok(self.users.write().await.remove(user).is_some())
    }
}

#[async_trait]
impl UsersRepository for MemoryUsersRepository {
    async fn contains(&self, user: &str) -> Result<bool> {
        Ok(self.users.read().await.contains_key(user))
    }

    async fn test(&self, user: &str, password: &str) -> Result<bool> {
        debug!("Authentication attempt for {}", user);
        let users = self.users.read().await;
        let Some(stored_hash) = users.get(user) else {
            warn!("Authentication failed: user not found: {}", user);
            return Ok(false);
        };
        let verified = verify_password(password, stored_hash)?;
        if !verified {
            warn!("Authentication failed: invalid password for {}", user);
        }
        Ok(verified)
    }
}
