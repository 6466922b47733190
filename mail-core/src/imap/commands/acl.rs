//! RFC 2086 access control commands
//!
//! Each one opens the mailbox for the duration of the command only.

use crate::error::{MailError, Result};
use crate::imap::command::{Command, CommandContext, AUTHENTICATED};
use crate::imap::connection::quote;
use crate::imap::session::SessionState;
use crate::mailbox::{Mailbox, Rights, RightsModification};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

fn require_administer(mailbox: &Mailbox, user: &str) -> Result<()> {
    if mailbox.has_rights(user, Rights::ADMINISTER) {
        Ok(())
    } else {
        Err(MailError::Unauthorized(format!(
            "'a' required on {}",
            mailbox.name()
        )))
    }
}

/// Run `f` against an opened mailbox and always release it
async fn with_mailbox<T>(
    ctx: &mut CommandContext<'_>,
    user: &str,
    name: &str,
    f: impl FnOnce(&Arc<Mailbox>) -> Result<T> + Send,
) -> Result<T> {
    let mailbox = ctx.host.get(user, name).await?;
    let result = f(&mailbox);
    ctx.host.release(user, Some(mailbox)).await?;
    result
}

pub struct GetAcl;

#[async_trait]
impl Command for GetAcl {
    fn name(&self) -> &'static str {
        "GETACL"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        AUTHENTICATED
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        let name = ctx.conn.mailbox().await?;
        ctx.conn.end()?;
        let user = ctx.session.user()?.to_string();

        let line = with_mailbox(ctx, &user, &name, |mailbox| {
            require_administer(mailbox, &user)?;
            let owner = mailbox.owner();
            let mut line = format!("ACL {} {} {}", quote(&name), quote(&owner), Rights::all());
            for (identity, rights) in mailbox.acl().entries() {
                if identity != owner {
                    line.push_str(&format!(" {} {}", quote(identity), rights));
                }
            }
            Ok(line)
        })
        .await?;

        ctx.conn.untagged(&line).await?;
        Ok("GETACL completed".to_string())
    }
}

pub struct SetAcl;

#[async_trait]
impl Command for SetAcl {
    fn name(&self) -> &'static str {
        "SETACL"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        AUTHENTICATED
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        let name = ctx.conn.mailbox().await?;
        let identity = ctx.conn.astring().await?;
        let modification = RightsModification::parse(&ctx.conn.astring().await?)?;
        ctx.conn.end()?;
        let user = ctx.session.user()?.to_string();

        with_mailbox(ctx, &user, &name, |mailbox| {
            mailbox.set_rights(&user, &identity, modification)
        })
        .await?;

        info!("{} set rights of {} on {}: {:?}", user, identity, name, modification);
        Ok("SETACL completed".to_string())
    }
}

pub struct DeleteAcl;

#[async_trait]
impl Command for DeleteAcl {
    fn name(&self) -> &'static str {
        "DELETEACL"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        AUTHENTICATED
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        let name = ctx.conn.mailbox().await?;
        let identity = ctx.conn.astring().await?;
        ctx.conn.end()?;
        let user = ctx.session.user()?.to_string();

        with_mailbox(ctx, &user, &name, |mailbox| {
            mailbox.delete_rights(&user, &identity)
        })
        .await?;

        info!("{} removed rights of {} on {}", user, identity, name);
        Ok("DELETEACL completed".to_string())
    }
}

pub struct ListRights;

#[async_trait]
impl Command for ListRights {
    fn name(&self) -> &'static str {
        "LISTRIGHTS"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        AUTHENTICATED
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        let name = ctx.conn.mailbox().await?;
        let identity = ctx.conn.astring().await?;
        ctx.conn.end()?;
        let user = ctx.session.user()?.to_string();

        let line = with_mailbox(ctx, &user, &name, |mailbox| {
            require_administer(mailbox, &user)?;
            // The owner always holds everything; anyone else may get any right
            let rights = if identity == mailbox.owner() {
                Rights::all().to_string()
            } else {
                let optional: Vec<String> =
                    Rights::all().iter().map(|right| right.to_string()).collect();
                format!("\"\" {}", optional.join(" "))
            };
            Ok(format!("LISTRIGHTS {} {} {}", quote(&name), quote(&identity), rights))
        })
        .await?;

        ctx.conn.untagged(&line).await?;
        Ok("LISTRIGHTS completed".to_string())
    }
}

pub struct MyRights;

#[async_trait]
impl Command for MyRights {
    fn name(&self) -> &'static str {
        "MYRIGHTS"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        AUTHENTICATED
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        let name = ctx.conn.mailbox().await?;
        ctx.conn.end()?;
        let user = ctx.session.user()?.to_string();

        let rights = with_mailbox(ctx, &user, &name, |mailbox| Ok(mailbox.rights(&user))).await?;
        ctx.conn
            .untagged(&format!("MYRIGHTS {} {}", quote(&name), rights))
            .await?;
        Ok("MYRIGHTS completed".to_string())
    }
}
