use crate::mailbox::Mailbox;
use std::collections::HashMap;
use std::sync::Arc;

struct CacheEntry {
    mailbox: Arc<Mailbox>,
    refs: usize,
}

/// Outcome of dropping one reference
pub(crate) enum Released {
    /// Other holders remain
    Held(usize),
    /// Last reference gone; the entry was removed
    Evicted(Arc<Mailbox>),
}

/// Open mailboxes and their reference counts
///
/// An entry exists exactly while its count is at least one. Only the Host
/// touches this map, and only under its lock.
#[derive(Default)]
pub(crate) struct MailboxCache {
    entries: HashMap<String, CacheEntry>,
}

impl MailboxCache {
    pub fn peek(&self, name: &str) -> Option<&Arc<Mailbox>> {
        self.entries.get(name).map(|entry| &entry.mailbox)
    }

    /// Take another reference on a cached mailbox
    pub fn acquire(&mut self, name: &str) -> Option<Arc<Mailbox>> {
        self.entries.get_mut(name).map(|entry| {
            entry.refs += 1;
            entry.mailbox.clone()
        })
    }

    /// Add a freshly opened mailbox with one reference
    pub fn insert(&mut self, name: &str, mailbox: Arc<Mailbox>) {
        self.entries
            .insert(name.to_string(), CacheEntry { mailbox, refs: 1 });
    }

    /// Drop one reference held on `mailbox`
    ///
    /// Returns `None` when `name` is not cached or is cached as a different
    /// object, which happens for a handle that outlived a delete.
    pub fn release(&mut self, name: &str, mailbox: &Arc<Mailbox>) -> Option<Released> {
        let entry = self
            .entries
            .get_mut(name)
            .filter(|entry| Arc::ptr_eq(&entry.mailbox, mailbox))?;
        entry.refs -= 1;
        if entry.refs > 0 {
            return Some(Released::Held(entry.refs));
        }
        self.entries
            .remove(name)
            .map(|entry| Released::Evicted(entry.mailbox))
    }

    /// Drop an entry regardless of its count
    pub fn remove(&mut self, name: &str) -> Option<Arc<Mailbox>> {
        self.entries.remove(name).map(|entry| entry.mailbox)
    }

    /// Move an entry to a new key; returns the mailbox if one was cached
    pub fn rekey(&mut self, old: &str, new: &str) -> Option<Arc<Mailbox>> {
        let entry = self.entries.remove(old)?;
        let mailbox = entry.mailbox.clone();
        self.entries.insert(new.to_string(), entry);
        Some(mailbox)
    }

    pub fn refs(&self, name: &str) -> usize {
        self.entries.get(name).map(|entry| entry.refs).unwrap_or(0)
    }
}
