//! Backing storage for the messages of a mailbox

use crate::error::Result;
use crate::mailbox::Message;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Message persistence keyed by absolute mailbox name
///
/// The live mailbox owns its messages while it is open; the store only sees
/// a full snapshot when the mailbox is rehydrated or flushed.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Messages ordered by UID; empty for an unknown mailbox
    async fn load(&self, mailbox: &str) -> Result<Vec<Message>>;

    /// Replace the stored messages with `messages`
    async fn save(&self, mailbox: &str, messages: &[Message]) -> Result<()>;

    async fn rename(&self, old: &str, new: &str) -> Result<()>;

    /// Remove the backing storage entirely
    async fn destroy(&self, mailbox: &str) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryMessageStore {
    mailboxes: RwLock<HashMap<String, Vec<Message>>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn load(&self, mailbox: &str) -> Result<Vec<Message>> {
        Ok(self
            .mailboxes
            .read()
            .await
            .get(mailbox)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, mailbox: &str, messages: &[Message]) -> Result<()> {
        self.mailboxes
            .write()
            .await
            .insert(mailbox.to_string(), messages.to_vec());
        Ok(())
    }

    async fn rename(&self, old: &str, new: &str) -> Result<()> {
        let mut mailboxes = self.mailboxes.write().await;
        if let Some(messages) = mailboxes.remove(old) {
            mailboxes.insert(new.to_string(), messages);
        }
        Ok(())
    }

    async fn destroy(&self, mailbox: &str) -> Result<()> {
        self.mailboxes.write().await.remove(mailbox);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_memory_store_rename_and_destroy() {
        let store = MemoryMessageStore::new();
        let msg = Message::new(1, Vec::new(), Utc::now(), b"Subject: a\r\n\r\nb".to_vec());
        store.save("#user.alice.Old", &[msg.clone()]).await.unwrap();

        store.rename("#user.alice.Old", "#user.alice.New").await.unwrap();
        assert!(store.load("#user.alice.Old").await.unwrap().is_empty());
        assert_eq!(store.load("#user.alice.New").await.unwrap(), vec![msg]);

        store.destroy("#user.alice.New").await.unwrap();
        assert!(store.load("#user.alice.New").await.unwrap().is_empty());
    }
}
