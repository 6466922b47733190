//! IMAP session management
//!
//! Protocol state, the authenticated user and the selected mailbox of one
//! connection. Only commands move a session between states.

use crate::error::{MailError, Result};
use crate::mailbox::Mailbox;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// IMAP session states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NonAuthenticated,
    Authenticated,
    Selected,
    /// Terminal; the connection closes after the current response
    Logout,
}

/// The mailbox a session has selected, and what the client knows of it
pub struct SelectedMailbox {
    mailbox: Arc<Mailbox>,
    read_only: bool,
    /// UIDs in sequence order as last reported to the client
    known_uids: Vec<u32>,
}

impl SelectedMailbox {
    pub fn new(mailbox: Arc<Mailbox>, read_only: bool) -> Self {
        let known_uids = mailbox.uids();
        Self {
            mailbox,
            read_only,
            known_uids,
        }
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Accept the current contents as known (after EXPUNGE reported them)
    pub fn sync(&mut self) {
        self.known_uids = self.mailbox.uids();
    }

    /// Untagged EXPUNGE/EXISTS/RECENT lines for what changed since the last
    /// sync; each EXPUNGE number accounts for the ones before it
    pub fn changes(&mut self) -> Vec<String> {
        let current = self.mailbox.uids();
        let present: HashSet<u32> = current.iter().copied().collect();

        let mut lines = Vec::new();
        let mut removed = 0;
        for (idx, uid) in self.known_uids.iter().enumerate() {
            if !present.contains(uid) {
                lines.push(format!("{} EXPUNGE", idx + 1 - removed));
                removed += 1;
            }
        }

        if current.len() != self.known_uids.len() - removed {
            lines.push(format!("{} EXISTS", current.len()));
            lines.push(format!("{} RECENT", self.mailbox.recent_count()));
        }

        self.known_uids = current;
        lines
    }
}

pub struct ImapSession {
    id: Uuid,
    state: SessionState,
    user: Option<String>,
    selected: Option<SelectedMailbox>,
}

impl Default for ImapSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ImapSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::NonAuthenticated,
            user: None,
            selected: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn user(&self) -> Result<&str> {
        self.user
            .as_deref()
            .ok_or_else(|| MailError::rejected("not authenticated"))
    }

    pub fn login(&mut self, user: &str) {
        self.user = Some(user.to_string());
        self.state = SessionState::Authenticated;
    }

    pub fn select(&mut self, selected: SelectedMailbox) {
        self.selected = Some(selected);
        self.state = SessionState::Selected;
    }

    /// Leave SELECTED; the caller must release the returned mailbox
    pub fn deselect(&mut self) -> Option<Arc<Mailbox>> {
        if self.state == SessionState::Selected {
            self.state = SessionState::Authenticated;
        }
        self.selected.take().map(|selected| selected.mailbox)
    }

    pub fn selected(&self) -> Result<&SelectedMailbox> {
        self.selected
            .as_ref()
            .ok_or_else(|| MailError::rejected("no mailbox selected"))
    }

    pub fn selected_mut(&mut self) -> Result<&mut SelectedMailbox> {
        self.selected
            .as_mut()
            .ok_or_else(|| MailError::rejected("no mailbox selected"))
    }

    /// Enter LOGOUT; the caller must release the returned mailbox
    pub fn logout(&mut self) -> Option<Arc<Mailbox>> {
        let selected = self.deselect();
        self.state = SessionState::Logout;
        selected
    }
}
