use crate::error::Result;
use crate::imap::command::{Command, CommandContext, ANY_STATE};
use crate::imap::session::SessionState;
use async_trait::async_trait;
use tracing::info;

pub const CAPABILITIES: &str = "IMAP4rev1 LITERAL+ NAMESPACE ACL";

pub struct Capability;

#[async_trait]
impl Command for Capability {
    fn name(&self) -> &'static str {
        "CAPABILITY"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        ANY_STATE
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        ctx.conn.end()?;
        ctx.conn
            .untagged(&format!("CAPABILITY {}", CAPABILITIES))
            .await?;
        Ok("CAPABILITY completed".to_string())
    }
}

/// Does nothing; pending mailbox updates go out with the response
pub struct Noop;

#[async_trait]
impl Command for Noop {
    fn name(&self) -> &'static str {
        "NOOP"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        ANY_STATE
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        ctx.conn.end()?;
        Ok("NOOP completed".to_string())
    }
}

pub struct Logout;

#[async_trait]
impl Command for Logout {
    fn name(&self) -> &'static str {
        "LOGOUT"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        ANY_STATE
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        ctx.conn.end()?;
        let user = ctx.session.user().map(str::to_string).ok();
        let selected = ctx.session.logout();
        if let Some(user) = user {
            ctx.host.release(&user, selected).await?;
            info!("{} logged out", user);
        }
        ctx.conn.untagged("BYE IMAP4rev1 Server logging out").await?;
        Ok("LOGOUT completed".to_string())
    }
}
