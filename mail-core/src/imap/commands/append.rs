use crate::error::{MailError, Result};
use crate::imap::command::{Command, CommandContext, AUTHENTICATED};
use crate::imap::session::SessionState;
use crate::mailbox::normalize_flag;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

/// `APPEND mailbox [(flags)] ["date-time"] {size}`
///
/// The message literal is streamed off the connection once the arguments
/// before it have been parsed.
pub struct Append;

pub const DATE_TIME_FORMAT: &str = "%d-%b-%Y %H:%M:%S %z";

pub fn parse_date_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_str(s.trim(), DATE_TIME_FORMAT)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|e| MailError::syntax(format!("invalid date-time {:?}: {}", s, e)))
}

#[async_trait]
impl Command for Append {
    fn name(&self) -> &'static str {
        "APPEND"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        AUTHENTICATED
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        let name = ctx.conn.mailbox().await?;

        let flags = if ctx.conn.peek_char() == Some('(') {
            ctx.conn
                .paren_list()
                .await?
                .iter()
                .map(|f| normalize_flag(f))
                .collect()
        } else {
            Vec::new()
        };
        let internal_date = if ctx.conn.peek_char() == Some('"') {
            parse_date_time(&ctx.conn.astring().await?)?
        } else {
            Utc::now()
        };

        let content = ctx.conn.literal().await?;
        ctx.conn.end()?;
        let user = ctx.session.user()?.to_string();

        let uid = ctx
            .host
            .append(&user, &name, flags, internal_date, content)
            .await?;
        info!("{} appended message {} to {}", user, uid, name);
        Ok("APPEND completed".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_time() {
        let date = parse_date_time("17-Jul-1996 02:44:25 -0700").unwrap();
        assert_eq!(date.to_rfc3339(), "1996-07-17T09:44:25+00:00");
        assert!(parse_date_time("yesterday").is_err());
    }
}
