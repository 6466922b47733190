use crate::error::Result;
use crate::users::{hash_password, verify_password, UsersRepository};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Users with Argon2 password hashes in sqlite
#[derive(Clone)]
pub struct SqliteUsersRepository {
    db: Arc<SqlitePool>,
}

impl SqliteUsersRepository {
    pub async fn new(database_url: &str) -> Result<Self> {
        let db = SqlitePool::connect(database_url).await?;
        Self::with_pool(db).await
    }

    pub async fn with_pool(db: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mail_users (
                name TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_login TEXT
            )
            "#,
        )
        .execute(&db)
        .await?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Add a new user
    ///
    /// # Security
    /// Password is hashed with Argon2 before storage
    pub async fn add_user(&self, name: &str, password: &str) -> Result<()> {
        info!("Adding user: {}", name);

        let password_hash = hash_password(password)?;

        sqlx::query(
            r#"
            INSERT INTO mail_users (name, password_hash, created_at)
            VALUES (?, ?, datetime('now'))
            "#,
        )
        .bind(name)
        .bind(&password_hash)
        .execute(&*self.db)
        .await?;

        info!("User added: {}", name);
        Ok(())
    }

    pub async fn delete_user(&self, name: &str) -> Result<bool> {
        info!("Deleting user: {}", name);

        let result = sqlx::query(
            r#"
            DELETE FROM mail_users WHERE name = ?
            "#,
        )
        .bind(name)
        .execute(&*self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns (name, created_at, last_login) tuples
    pub async fn list_users(&self) -> Result<Vec<(String, String, Option<String>)>> {
        let users = sqlx::query_as::<_, (String, String, Option<String>)>(
            r#"
            SELECT name, created_at, last_login
            FROM mail_users
            ORDER BY name
            "#,
        )
        .fetch_all(&*self.db)
        .await?;

        Ok(users)
    }
}

#[async_trait]
impl UsersRepository for SqliteUsersRepository {
    async fn contains(&self, user: &str) -> Result<bool> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM mail_users WHERE name = ?
            "#,
        )
        .bind(user)
        .fetch_one(&*self.db)
        .await?;

        Ok(count.0 > 0)
    }

    async fn test(&self, user: &str, password: &str) -> Result<bool> {
        debug!("Authentication attempt for {}", user);

        let row = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT password_hash FROM mail_users WHERE name = ?
            "#,
        )
        .bind(user)
        .fetch_optional(&*self.db)
        .await?;

        let Some((stored_hash,)) = row else {
            warn!("Authentication failed: user not found: {}", user);
            return Ok(false);
        };

        if !verify_password(password, &stored_hash)? {
            warn!("Authentication failed: invalid password for {}", user);
            return Ok(false);
        }

        info!("Authentication successful for {}", user);
        sqlx::query(
            r#"
            UPDATE mail_users
            SET last_login = datetime('now')
            WHERE name = ?
            "#,
        )
        .bind(user)
        .execute(&*self.db)
        .await?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn repository() -> SqliteUsersRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteUsersRepository::with_pool(pool).await.unwrap()
    }

    #[tokio::test]
    async fn test_add_and_authenticate_user() {
        let repo = repository().await;
        repo.add_user("alice", "password123").await.unwrap();

        assert!(repo.test("alice", "password123").await.unwrap());
        assert!(!repo.test("alice", "wrong").await.unwrap());
        assert!(!repo.test("nobody", "password123").await.unwrap());
    }

    #[tokio::test]
    async fn test_contains_list_delete() {
        let repo = repository().await;
        repo.add_user("alice", "a").await.unwrap();
        repo.add_user("bob", "b").await.unwrap();

        assert!(repo.contains("alice").await.unwrap());
        let names: Vec<String> = repo
            .list_users()
            .await
            .unwrap()
            .into_iter()
            .map(|(name, _, _)| name)
            .collect();
        assert_eq!(names, vec!["alice", "bob"]);

        assert!(repo.delete_user("alice").await.unwrap());
        assert!(!repo.delete_user("alice").await.unwrap());
        assert!(!repo.contains("alice").await.unwrap());
    }
}
