//! Commands that operate on mailboxes by name

use crate::error::{MailError, Result};
use crate::host::StatusItem;
use crate::imap::command::{Command, CommandContext, AUTHENTICATED};
use crate::imap::connection::quote;
use crate::imap::session::{SelectedMailbox, SessionState};
use crate::mailbox::SYSTEM_FLAGS;
use async_trait::async_trait;
use tracing::debug;

/// SELECT, or EXAMINE when read-only
pub struct Select {
    pub read_only: bool,
}

#[async_trait]
impl Command for Select {
    fn name(&self) -> &'static str {
        if self.read_only {
            "EXAMINE"
        } else {
            "SELECT"
        }
    }

    fn valid_states(&self) -> &'static [SessionState] {
        AUTHENTICATED
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        let name = ctx.conn.mailbox().await?;
        ctx.conn.end()?;
        let user = ctx.session.user()?.to_string();

        // A failed SELECT still leaves the old selection closed
        ctx.host.release(&user, ctx.session.deselect()).await?;

        let mailbox = ctx.host.get(&user, &name).await?;
        let refusal = if !mailbox.is_selectable() {
            Some(MailError::rejected(format!("{} is not selectable", name)))
        } else if !mailbox.has_read_rights(&user) {
            Some(MailError::Unauthorized(format!("'r' required to select {}", name)))
        } else {
            None
        };
        if let Some(err) = refusal {
            ctx.host.release(&user, Some(mailbox)).await?;
            return Err(err);
        }

        let flags = SYSTEM_FLAGS.join(" ");
        ctx.conn.untagged(&format!("FLAGS ({})", flags)).await?;
        ctx.conn
            .untagged(&format!("{} EXISTS", mailbox.exists()))
            .await?;
        ctx.conn
            .untagged(&format!("{} RECENT", mailbox.recent_count()))
            .await?;
        if let Some(unseen) = mailbox.first_unseen() {
            ctx.conn
                .untagged(&format!("OK [UNSEEN {}] First unseen", unseen))
                .await?;
        }
        let permanent = if self.read_only {
            String::new()
        } else {
            format!("{} \\*", flags)
        };
        ctx.conn
            .untagged(&format!("OK [PERMANENTFLAGS ({})] Limited", permanent))
            .await?;
        ctx.conn
            .untagged(&format!(
                "OK [UIDVALIDITY {}] UIDs valid",
                mailbox.uid_validity()
            ))
            .await?;
        ctx.conn
            .untagged(&format!("OK [UIDNEXT {}] Predicted next UID", mailbox.uid_next()))
            .await?;

        debug!("{} selected {}", user, mailbox.name());
        ctx.session
            .select(SelectedMailbox::new(mailbox, self.read_only));

        if self.read_only {
            Ok("[READ-ONLY] EXAMINE completed".to_string())
        } else {
            Ok("[READ-WRITE] SELECT completed".to_string())
        }
    }
}

pub struct Create;

#[async_trait]
impl Command for Create {
    fn name(&self) -> &'static str {
        "CREATE"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        AUTHENTICATED
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        let name = ctx.conn.mailbox().await?;
        ctx.conn.end()?;
        let user = ctx.session.user()?.to_string();

        // A trailing delimiter only announces intent to create children
        let delimiter = ctx.host.namespace().delimiter();
        let name = name.strip_suffix(delimiter).unwrap_or(&name);

        let mailbox = ctx.host.create(&user, name).await?;
        ctx.host.release(&user, Some(mailbox)).await?;
        Ok("CREATE completed".to_string())
    }
}

pub struct Delete;

#[async_trait]
impl Command for Delete {
    fn name(&self) -> &'static str {
        "DELETE"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        AUTHENTICATED
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        let name = ctx.conn.mailbox().await?;
        ctx.conn.end()?;
        let user = ctx.session.user()?.to_string();

        let absolute = ctx.host.namespace().to_absolute(&user, &name)?;
        let held = ctx
            .session
            .selected()
            .map(|selected| selected.mailbox().name() == absolute)
            .unwrap_or(false);

        if !ctx.host.delete(&user, &name, held).await? {
            return Err(MailError::rejected(format!("{} could not be deleted", name)));
        }
        if held {
            ctx.host.release(&user, ctx.session.deselect()).await?;
        }
        Ok("DELETE completed".to_string())
    }
}

pub struct Rename;

#[async_trait]
impl Command for Rename {
    fn name(&self) -> &'static str {
        "RENAME"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        AUTHENTICATED
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        let old = ctx.conn.mailbox().await?;
        let new = ctx.conn.mailbox().await?;
        ctx.conn.end()?;
        let user = ctx.session.user()?.to_string();

        if !ctx.host.rename(&user, &old, &new).await? {
            return Err(MailError::rejected(format!(
                "RENAME of {} stopped part way; hierarchy partially renamed",
                old
            )));
        }
        Ok("RENAME completed".to_string())
    }
}

/// SUBSCRIBE, or UNSUBSCRIBE
pub struct Subscribe {
    pub subscribe: bool,
}

#[async_trait]
impl Command for Subscribe {
    fn name(&self) -> &'static str {
        if self.subscribe {
            "SUBSCRIBE"
        } else {
            "UNSUBSCRIBE"
        }
    }

    fn valid_states(&self) -> &'static [SessionState] {
        AUTHENTICATED
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        let name = ctx.conn.mailbox().await?;
        ctx.conn.end()?;
        let user = ctx.session.user()?.to_string();

        if self.subscribe {
            ctx.host.subscribe(&user, &name).await?;
        } else {
            ctx.host.unsubscribe(&user, &name).await?;
        }
        Ok(format!("{} completed", self.name()))
    }
}

/// LIST, or LSUB for subscribed mailboxes only
pub struct List {
    pub subscribed_only: bool,
}

#[async_trait]
impl Command for List {
    fn name(&self) -> &'static str {
        if self.subscribed_only {
            "LSUB"
        } else {
            "LIST"
        }
    }

    fn valid_states(&self) -> &'static [SessionState] {
        AUTHENTICATED
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        let reference = ctx.conn.astring().await?;
        let pattern = ctx.conn.mailbox().await?;
        ctx.conn.end()?;
        let user = ctx.session.user()?.to_string();

        let entries = ctx
            .host
            .list(&user, &reference, &pattern, self.subscribed_only)
            .await?
            .ok_or_else(|| {
                MailError::syntax("wildcards are only supported at the end of a pattern")
            })?;

        let namespace = ctx.host.namespace();
        for entry in entries {
            let name = namespace.to_user_relative(&user, &entry.name);
            let line = format!(
                "{} ({}) {} {}",
                self.name(),
                entry.attributes.join(" "),
                quote(&entry.delimiter.to_string()),
                quote(&name)
            );
            ctx.conn.untagged(&line).await?;
        }
        Ok(format!("{} completed", self.name()))
    }
}

pub struct Status;

#[async_trait]
impl Command for Status {
    fn name(&self) -> &'static str {
        "STATUS"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        AUTHENTICATED
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        let name = ctx.conn.mailbox().await?;
        let items = ctx
            .conn
            .paren_list()
            .await?
            .iter()
            .map(|item| StatusItem::parse(item))
            .collect::<Result<Vec<_>>>()?;
        ctx.conn.end()?;
        let user = ctx.session.user()?.to_string();

        let status = ctx.host.status(&user, &name, &items).await?;
        ctx.conn
            .untagged(&format!("STATUS {} ({})", quote(&name), status))
            .await?;
        Ok("STATUS completed".to_string())
    }
}

pub struct Namespace;

#[async_trait]
impl Command for Namespace {
    fn name(&self) -> &'static str {
        "NAMESPACE"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        AUTHENTICATED
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        ctx.conn.end()?;
        let delimiter = quote(&ctx.host.namespace().delimiter().to_string());
        let shared = quote(&format!(
            "{}{}",
            crate::namespace::USER_NAMESPACE_PREFIX,
            ctx.host.namespace().delimiter()
        ));
        ctx.conn
            .untagged(&format!(
                "NAMESPACE ((\"\" {})) NIL (({} {}))",
                delimiter, shared, delimiter
            ))
            .await?;
        Ok("NAMESPACE completed".to_string())
    }
}
