//! Live mailbox objects
//!
//! A [`Mailbox`] is the in-memory peer of a folder record while at least one
//! session holds it open. It owns the messages, the UID counter, the ACL and
//! the subscription set. The Host creates, shares and flushes it; sessions
//! only ever see it through an `Arc`.

pub mod acl;
pub mod message;
pub mod search;
pub mod sequence;

pub use acl::{Acl, Rights, RightsModification, ANYONE, MAIL_DELIVERY_AGENT};
pub use message::{normalize_flag, Message, ANSWERED, DELETED, DRAFT, FLAGGED, SEEN, SYSTEM_FLAGS};
pub use search::{SearchContext, SearchCriteria};
pub use sequence::SequenceSet;

use crate::error::{MailError, Result};
use crate::storage::FolderRecord;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeSet;

/// Store operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    /// +FLAGS - Add flags to message
    Add,
    /// -FLAGS - Remove flags from message
    Remove,
    /// FLAGS - Replace all flags
    Replace,
}

#[derive(Debug)]
struct MailboxState {
    name: String,
    owner: String,
    uid_validity: u32,
    next_uid: u32,
    messages: Vec<Message>,
    recent: BTreeSet<u32>,
    acl: Acl,
    subscribers: BTreeSet<String>,
    marked: bool,
    not_selectable: bool,
}

impl MailboxState {
    fn sequence_of(&self, uid: u32) -> Option<u32> {
        self.messages
            .iter()
            .position(|m| m.uid == uid)
            .map(|idx| idx as u32 + 1)
    }

    fn max_uid(&self) -> u32 {
        self.messages.last().map(|m| m.uid).unwrap_or(0)
    }

    /// Indices of the messages a sequence set names
    fn select(&self, set: &SequenceSet, by_uid: bool) -> Vec<usize> {
        let count = self.messages.len() as u32;
        let max_uid = self.max_uid();
        self.messages
            .iter()
            .enumerate()
            .filter(|(idx, msg)| {
                if by_uid {
                    set.contains(msg.uid, max_uid)
                } else {
                    set.contains(*idx as u32 + 1, count)
                }
            })
            .map(|(idx, _)| idx)
            .collect()
    }
}

/// A message as seen at one sequence position
#[derive(Debug, Clone, PartialEq)]
pub struct MessageView {
    pub sequence: u32,
    pub recent: bool,
    pub message: Message,
}

#[derive(Debug)]
pub struct Mailbox {
    state: Mutex<MailboxState>,
}

impl Mailbox {
    pub fn new(name: &str, owner: &str, uid_validity: u32) -> Self {
        Self {
            state: Mutex::new(MailboxState {
                name: name.to_string(),
                owner: owner.to_string(),
                uid_validity,
                next_uid: 1,
                messages: Vec::new(),
                recent: BTreeSet::new(),
                acl: Acl::new(),
                subscribers: BTreeSet::new(),
                marked: false,
                not_selectable: false,
            }),
        }
    }

    /// Rebuild a live mailbox from its record and stored messages
    pub fn from_record(record: &FolderRecord, mut messages: Vec<Message>) -> Result<Self> {
        let acl = Acl::from_strings(&record.acl)?;

        let mut next_uid = record
            .highest_uid
            .max(messages.iter().map(|m| m.uid).max().unwrap_or(0))
            + 1;
        for msg in messages.iter_mut().filter(|m| m.uid == 0) {
            msg.uid = next_uid;
            next_uid += 1;
        }
        messages.sort_by_key(|m| m.uid);

        // The record only keeps a count; the newest messages are the recent ones
        let recent = messages
            .iter()
            .rev()
            .take(record.recent as usize)
            .map(|m| m.uid)
            .collect();

        Ok(Self {
            state: Mutex::new(MailboxState {
                name: record.name.clone(),
                owner: record.owner.clone(),
                uid_validity: record.uid_validity,
                next_uid,
                messages,
                recent,
                acl,
                subscribers: record.subscribers.clone(),
                marked: record.marked,
                not_selectable: record.not_selectable_by_anyone,
            }),
        })
    }

    /// Copy counters, rights and flags into the record; returns the
    /// messages to hand to the message store
    pub fn flush_into(&self, record: &mut FolderRecord) -> Vec<Message> {
        let state = self.state.lock();

        record.name = state.name.clone();
        record.owner = state.owner.clone();
        record.uid_validity = state.uid_validity;
        record.highest_uid = state.next_uid - 1;
        record.acl = state.acl.to_strings();
        record.lookup_rights = state
            .acl
            .entries()
            .filter(|(_, rights)| rights.contains(Rights::LOOKUP))
            .map(|(identity, _)| identity.to_string())
            .collect();
        record.read_rights = state
            .acl
            .entries()
            .filter(|(_, rights)| rights.contains(Rights::READ))
            .map(|(identity, _)| identity.to_string())
            .collect();
        record.marked = state.marked;
        record.not_selectable_by_anyone = state.not_selectable;
        record.exists = state.messages.len() as u32;
        record.recent = state.recent.len() as u32;
        record.subscribers = state.subscribers.clone();

        let unseen = state.messages.iter().filter(|m| !m.has_flag(SEEN)).count() as u32;
        record.unseen_by_user.clear();
        record.unseen_by_user.insert(state.owner.clone(), unseen);
        for (identity, _) in state.acl.entries() {
            record.unseen_by_user.insert(identity.to_string(), unseen);
        }

        state.messages.clone()
    }

    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    pub(crate) fn set_name(&self, name: &str) {
        self.state.lock().name = name.to_string();
    }

    pub fn owner(&self) -> String {
        self.state.lock().owner.clone()
    }

    pub fn uid_validity(&self) -> u32 {
        self.state.lock().uid_validity
    }

    /// Predicted next UID
    pub fn uid_next(&self) -> u32 {
        self.state.lock().next_uid
    }

    /// Get total number of messages
    pub fn exists(&self) -> u32 {
        self.state.lock().messages.len() as u32
    }

    pub fn recent_count(&self) -> u32 {
        self.state.lock().recent.len() as u32
    }

    /// Get number of unseen messages
    pub fn unseen_count(&self) -> u32 {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|m| !m.has_flag(SEEN))
            .count() as u32
    }

    /// Get first unseen sequence number
    pub fn first_unseen(&self) -> Option<u32> {
        self.state
            .lock()
            .messages
            .iter()
            .position(|m| !m.has_flag(SEEN))
            .map(|idx| idx as u32 + 1)
    }

    /// UIDs in sequence order
    pub fn uids(&self) -> Vec<u32> {
        self.state.lock().messages.iter().map(|m| m.uid).collect()
    }

    // --- ACL ---

    pub fn rights(&self, user: &str) -> Rights {
        let state = self.state.lock();
        state.acl.effective(&state.owner, user)
    }

    pub fn has_rights(&self, user: &str, rights: Rights) -> bool {
        self.rights(user).contains(rights)
    }

    pub fn has_lookup_rights(&self, user: &str) -> bool {
        self.has_rights(user, Rights::LOOKUP)
    }

    pub fn has_read_rights(&self, user: &str) -> bool {
        self.has_rights(user, Rights::READ)
    }

    pub fn has_create_rights(&self, user: &str) -> bool {
        self.has_rights(user, Rights::CREATE)
    }

    pub fn has_delete_rights(&self, user: &str) -> bool {
        self.has_rights(user, Rights::DELETE)
    }

    pub fn has_insert_rights(&self, user: &str) -> bool {
        self.has_rights(user, Rights::INSERT)
    }

    pub fn acl(&self) -> Acl {
        self.state.lock().acl.clone()
    }

    /// SETACL; the setter needs the administer right
    pub fn set_rights(
        &self,
        setter: &str,
        identity: &str,
        modification: RightsModification,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if !state.acl.effective(&state.owner, setter).contains(Rights::ADMINISTER) {
            return Err(MailError::Unauthorized(format!(
                "{} may not administer {}",
                setter, state.name
            )));
        }
        state.acl.modify(identity, modification);
        Ok(())
    }

    /// DELETEACL; returns whether an entry existed
    pub fn delete_rights(&self, setter: &str, identity: &str) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.acl.effective(&state.owner, setter).contains(Rights::ADMINISTER) {
            return Err(MailError::Unauthorized(format!(
                "{} may not administer {}",
                setter, state.name
            )));
        }
        Ok(state.acl.remove(identity))
    }

    // --- messages ---

    /// Add a message and return its UID
    pub fn append(
        &self,
        flags: Vec<String>,
        internal_date: DateTime<Utc>,
        content: Vec<u8>,
        recent: bool,
    ) -> u32 {
        let mut state = self.state.lock();
        let uid = state.next_uid;
        state.next_uid += 1;
        let flags = flags.iter().map(|f| normalize_flag(f)).collect();
        state.messages.push(Message::new(uid, flags, internal_date, content));
        if recent {
            state.recent.insert(uid);
            state.marked = true;
        }
        uid
    }

    /// Snapshot of the messages a sequence set names
    pub fn fetch(&self, set: &SequenceSet, by_uid: bool) -> Vec<MessageView> {
        let state = self.state.lock();
        state
            .select(set, by_uid)
            .into_iter()
            .map(|idx| {
                let message = state.messages[idx].clone();
                MessageView {
                    sequence: idx as u32 + 1,
                    recent: state.recent.contains(&message.uid),
                    message,
                }
            })
            .collect()
    }

    /// Modify flags; returns the messages after modification
    pub fn store_flags(
        &self,
        set: &SequenceSet,
        by_uid: bool,
        operation: StoreOperation,
        flags: &[String],
    ) -> Vec<MessageView> {
        let mut state = self.state.lock();
        let selected = state.select(set, by_uid);
        let mut modified = Vec::with_capacity(selected.len());

        for idx in selected {
            let msg = &mut state.messages[idx];
            match operation {
                StoreOperation::Add => {
                    for flag in flags {
                        msg.add_flag(flag);
                    }
                }
                StoreOperation::Remove => {
                    for flag in flags {
                        msg.remove_flag(flag);
                    }
                }
                StoreOperation::Replace => {
                    msg.flags = flags.iter().map(|f| normalize_flag(f)).collect();
                }
            }
            let message = msg.clone();
            modified.push(MessageView {
                sequence: idx as u32 + 1,
                recent: state.recent.contains(&message.uid),
                message,
            });
        }

        modified
    }

    /// Set \Seen on one message (implicit on non-peek body fetches)
    pub fn mark_seen(&self, uid: u32) -> bool {
        let mut state = self.state.lock();
        match state.messages.iter_mut().find(|m| m.uid == uid) {
            Some(msg) => msg.add_flag(SEEN),
            None => false,
        }
    }

    /// Permanently remove messages marked \Deleted
    ///
    /// Returns sequence numbers in the order EXPUNGE responses must be sent:
    /// each one already accounts for the removals reported before it.
    pub fn expunge(&self) -> Vec<u32> {
        let mut state = self.state.lock();
        let mut expunged = Vec::new();
        let mut idx = 0;
        while idx < state.messages.len() {
            if state.messages[idx].has_flag(DELETED) {
                let msg = state.messages.remove(idx);
                state.recent.remove(&msg.uid);
                expunged.push(idx as u32 + 1);
            } else {
                idx += 1;
            }
        }
        expunged
    }

    /// Remove every message regardless of flags
    pub fn expunge_all(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.messages.len();
        state.messages.clear();
        state.recent.clear();
        count
    }

    /// Matching messages as (sequence, uid)
    pub fn search(&self, criteria: &SearchCriteria) -> Vec<(u32, u32)> {
        let state = self.state.lock();
        let message_count = state.messages.len() as u32;
        let max_uid = state.max_uid();
        state
            .messages
            .iter()
            .enumerate()
            .filter(|(idx, msg)| {
                let ctx = SearchContext {
                    sequence: *idx as u32 + 1,
                    message_count,
                    max_uid,
                    recent: state.recent.contains(&msg.uid),
                };
                criteria.matches(msg, &ctx)
            })
            .map(|(idx, msg)| (idx as u32 + 1, msg.uid))
            .collect()
    }

    pub fn sequence_of(&self, uid: u32) -> Option<u32> {
        self.state.lock().sequence_of(uid)
    }

    /// Forget which messages are recent
    pub fn unset_recent(&self) {
        let mut state = self.state.lock();
        state.recent.clear();
        state.marked = false;
    }

    // --- subscriptions and attributes ---

    pub fn subscribe(&self, user: &str) -> bool {
        self.state.lock().subscribers.insert(user.to_string())
    }

    pub fn unsubscribe(&self, user: &str) -> bool {
        self.state.lock().subscribers.remove(user)
    }

    pub fn is_subscribed(&self, user: &str) -> bool {
        self.state.lock().subscribers.contains(user)
    }

    pub fn is_marked(&self) -> bool {
        self.state.lock().marked
    }

    pub fn is_selectable(&self) -> bool {
        !self.state.lock().not_selectable
    }

    pub fn set_not_selectable(&self, not_selectable: bool) {
        self.state.lock().not_selectable = not_selectable;
    }
}
