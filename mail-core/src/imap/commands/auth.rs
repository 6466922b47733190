use crate::error::{MailError, Result};
use crate::imap::command::{Command, CommandContext, NOT_AUTHENTICATED};
use crate::imap::session::SessionState;
use async_trait::async_trait;
use tracing::{info, warn};

pub struct Login;

#[async_trait]
impl Command for Login {
    fn name(&self) -> &'static str {
        "LOGIN"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        NOT_AUTHENTICATED
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        let user = ctx.conn.astring().await?;
        let password = ctx.conn.astring().await?;
        ctx.conn.end()?;

        if !ctx.host.users().test(&user, &password).await? {
            warn!("LOGIN failed for {}", user);
            return Err(MailError::AuthenticationFailed);
        }

        // First login provisions the account's INBOX
        ctx.host.create_user_account(&user).await?;
        ctx.session.login(&user);
        info!("{} logged in", user);
        Ok("LOGIN completed".to_string())
    }
}

/// No SASL mechanism is offered
pub struct Authenticate;

#[async_trait]
impl Command for Authenticate {
    fn name(&self) -> &'static str {
        "AUTHENTICATE"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        NOT_AUTHENTICATED
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        let mechanism = ctx.conn.atom()?;
        Err(MailError::rejected(format!(
            "AUTHENTICATE {} not supported",
            mechanism
        )))
    }
}
