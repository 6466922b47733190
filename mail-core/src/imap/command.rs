//! Command capability, registry and the selected-mailbox rights guard

use crate::error::{MailError, Result};
use crate::host::MailboxHost;
use crate::imap::commands;
use crate::imap::connection::ImapConnection;
use crate::imap::session::{ImapSession, SessionState};
use crate::mailbox::Rights;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub const ANY_STATE: &[SessionState] = &[
    SessionState::NonAuthenticated,
    SessionState::Authenticated,
    SessionState::Selected,
];
pub const NOT_AUTHENTICATED: &[SessionState] = &[SessionState::NonAuthenticated];
pub const AUTHENTICATED: &[SessionState] = &[SessionState::Authenticated, SessionState::Selected];
pub const SELECTED: &[SessionState] = &[SessionState::Selected];

/// Everything a command may touch while it runs
pub struct CommandContext<'a> {
    pub tag: String,
    /// Set by the UID meta-command
    pub use_uids: bool,
    pub conn: &'a mut ImapConnection,
    pub session: &'a mut ImapSession,
    pub host: &'a MailboxHost,
    pub registry: &'a CommandRegistry,
}

/// One IMAP verb
///
/// `process` parses its own arguments from the connection, writes any
/// untagged data and returns the text of the tagged OK. Errors become a
/// tagged NO or BAD.
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;

    fn valid_states(&self) -> &'static [SessionState];

    /// Whether pending EXPUNGE notices may follow this command
    fn allows_expunge_notice(&self) -> bool {
        true
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String>;
}

/// Fallback for names nobody registered
struct InvalidCommand;

#[async_trait]
impl Command for InvalidCommand {
    fn name(&self) -> &'static str {
        "INVALID"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        ANY_STATE
    }

    async fn process(&self, _ctx: &mut CommandContext<'_>) -> Result<String> {
        Err(MailError::syntax("Unknown command"))
    }
}

/// Checks the selection before a selected-state command runs
pub struct RightsGuard {
    inner: Arc<dyn Command>,
    rights: Rights,
    needs_write: bool,
}

impl RightsGuard {
    pub fn new(inner: Arc<dyn Command>, rights: Rights, needs_write: bool) -> Self {
        Self {
            inner,
            rights,
            needs_write,
        }
    }
}

#[async_trait]
impl Command for RightsGuard {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn valid_states(&self) -> &'static [SessionState] {
        self.inner.valid_states()
    }

    fn allows_expunge_notice(&self) -> bool {
        self.inner.allows_expunge_notice()
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        let user = ctx.session.user()?.to_string();
        let selected = ctx.session.selected()?;

        if self.needs_write && selected.is_read_only() {
            return Err(MailError::rejected(format!(
                "{} not allowed: mailbox is read-only",
                self.name()
            )));
        }
        if !selected.mailbox().has_rights(&user, self.rights) {
            warn!(
                "{} lacks '{}' for {} on {}",
                user,
                self.rights,
                self.name(),
                selected.mailbox().name()
            );
            return Err(MailError::Unauthorized(format!(
                "'{}' required for {}",
                self.rights,
                self.name()
            )));
        }

        self.inner.process(ctx).await
    }
}

/// Immutable name -> command map built once at startup
pub struct CommandRegistry {
    commands: HashMap<&'static str, Arc<dyn Command>>,
    invalid: Arc<dyn Command>,
}

impl CommandRegistry {
    pub fn new(commands: Vec<Arc<dyn Command>>) -> Self {
        Self {
            commands: commands.into_iter().map(|c| (c.name(), c)).collect(),
            invalid: Arc::new(InvalidCommand),
        }
    }

    /// The IMAP4rev1 + ACL + NAMESPACE command set
    pub fn standard() -> Self {
        Self::new(commands::all())
    }

    /// Case-insensitive lookup; unknown names get the invalid-command sentinel
    pub fn get(&self, name: &str) -> Arc<dyn Command> {
        self.commands
            .get(name.to_ascii_uppercase().as_str())
            .cloned()
            .unwrap_or_else(|| self.invalid.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name.to_ascii_uppercase().as_str())
    }
}
