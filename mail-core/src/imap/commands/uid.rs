use crate::error::{MailError, Result};
use crate::imap::command::{Command, CommandContext, SELECTED};
use crate::imap::session::SessionState;
use async_trait::async_trait;

/// Commands that may follow the UID prefix
const UID_COMMANDS: [&str; 3] = ["FETCH", "STORE", "COPY"];

/// `UID FETCH|STORE|COPY ...`: re-dispatch with UIDs in place of sequence numbers
pub struct Uid;

#[async_trait]
impl Command for Uid {
    fn name(&self) -> &'static str {
        "UID"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        SELECTED
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        let name = ctx.conn.atom()?.to_ascii_uppercase();
        if !UID_COMMANDS.contains(&name.as_str()) {
            return Err(MailError::syntax(format!("UID {} is not supported", name)));
        }

        let command = ctx.registry.get(&name);
        ctx.use_uids = true;
        let text = command.process(ctx).await?;
        Ok(format!("UID {}", text))
    }
}
