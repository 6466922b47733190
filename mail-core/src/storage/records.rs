//! Folder records: durable per-mailbox metadata keyed by absolute name

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;

/// Persisted metadata of one mailbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub name: String,
    pub owner: String,
    /// Tombstone: kept because descendants still exist
    pub deleted: bool,
    pub uid_validity: u32,
    pub highest_uid: u32,
    /// Identity -> rights string
    pub acl: BTreeMap<String, String>,
    pub lookup_rights: BTreeSet<String>,
    pub read_rights: BTreeSet<String>,
    pub marked: bool,
    pub not_selectable_by_anyone: bool,
    pub exists: u32,
    pub recent: u32,
    pub unseen_by_user: BTreeMap<String, u32>,
    #[serde(default)]
    pub subscribers: BTreeSet<String>,
}

impl FolderRecord {
    pub fn new(name: &str, owner: &str, uid_validity: u32) -> Self {
        Self {
            name: name.to_string(),
            owner: owner.to_string(),
            deleted: false,
            uid_validity,
            highest_uid: 0,
            acl: BTreeMap::new(),
            lookup_rights: BTreeSet::new(),
            read_rights: BTreeSet::new(),
            marked: false,
            not_selectable_by_anyone: false,
            exists: 0,
            recent: 0,
            unseen_by_user: BTreeMap::new(),
            subscribers: BTreeSet::new(),
        }
    }

    /// Lookup check without rehydrating the mailbox
    pub fn has_lookup_rights(&self, user: &str) -> bool {
        user == self.owner
            || user == crate::mailbox::MAIL_DELIVERY_AGENT
            || self.lookup_rights.contains(user)
            || self.lookup_rights.contains(crate::mailbox::ANYONE)
    }

    pub fn unseen_for(&self, user: &str) -> u32 {
        self.unseen_by_user
            .get(user)
            .or_else(|| self.unseen_by_user.get(crate::mailbox::ANYONE))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
pub trait FolderRecordStore: Send + Sync {
    async fn load(&self, name: &str) -> Result<Option<FolderRecord>>;

    /// Insert or replace
    async fn save(&self, record: &FolderRecord) -> Result<()>;

    async fn remove(&self, name: &str) -> Result<()>;

    /// Every stored name, tombstones included
    async fn names(&self) -> Result<Vec<String>>;
}

/// Record store kept in process memory
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<String, FolderRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FolderRecordStore for MemoryRecordStore {
    async fn load(&self, name: &str) -> Result<Option<FolderRecord>> {
        Ok(self.records.read().await.get(name).cloned())
    }

    async fn save(&self, record: &FolderRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.name.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.records.write().await.remove(name);
        Ok(())
    }

    async fn names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.records.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
