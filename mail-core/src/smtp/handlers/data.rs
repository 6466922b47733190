//! DATA command and message content reader

use crate::error::Result;
use crate::smtp::commands::SmtpRequest;
use crate::smtp::handler::{
    CommandHandler, ExtensibleHandler, LineHandler, Mail, Marker, MessageHook, SmtpHandler,
};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::SmtpSession;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Starts a message; extensible over message hooks
#[derive(Default)]
pub struct DataHandler {
    hooks: RwLock<Vec<Arc<dyn MessageHook>>>,
}

impl SmtpHandler for DataHandler {
    fn name(&self) -> &'static str {
        "data"
    }

    fn as_command_handler(self: Arc<Self>) -> Option<Arc<dyn CommandHandler>> {
        Some(self)
    }

    fn as_extensible(self: Arc<Self>) -> Option<Arc<dyn ExtensibleHandler>> {
        Some(self)
    }
}

impl ExtensibleHandler for DataHandler {
    fn markers(&self) -> &'static [Marker] {
        &[Marker::Message]
    }

    fn wire(&self, _marker: Marker, handlers: &[Arc<dyn SmtpHandler>]) -> Result<()> {
        *self.hooks.write() = handlers
            .iter()
            .filter_map(|h| Arc::clone(h).as_message_hook())
            .collect();
        Ok(())
    }
}

#[async_trait]
impl CommandHandler for DataHandler {
    fn commands(&self) -> &'static [&'static str] {
        &["DATA"]
    }

    async fn on_command(
        &self,
        session: &mut SmtpSession,
        request: &SmtpRequest,
    ) -> Result<SmtpResponse> {
        if session.recipients().is_empty() {
            return Ok(SmtpResponse::new(503, "Need RCPT command first"));
        }
        if !request.argument.is_empty() {
            return Ok(SmtpResponse::syntax_error("DATA takes no arguments"));
        }

        session.message_mut().clear();
        session.push_line_handler(Arc::new(DataLineHandler {
            hooks: self.hooks.read().clone(),
            max_size: session.config().max_message_size,
            oversized: Mutex::new(false),
        }));
        debug!("Reading message for session {}", session.id());
        Ok(SmtpResponse::new(354, "Start mail input; end with <CRLF>.<CRLF>"))
    }
}

/// Accumulates content until the lone `.`, then hands the mail to the hooks
pub struct DataLineHandler {
    hooks: Vec<Arc<dyn MessageHook>>,
    max_size: usize,
    oversized: Mutex<bool>,
}

impl DataLineHandler {
    fn trace_header(session: &SmtpSession) -> String {
        format!(
            "Received: from {} ({})\r\n\tby {} with SMTP id {};\r\n\t{}\r\n",
            session.helo().unwrap_or("unknown"),
            session.peer(),
            session.hostname(),
            session.id(),
            Utc::now().to_rfc2822()
        )
    }

    async fn finish(&self, session: &mut SmtpSession) -> Result<SmtpResponse> {
        let oversized = std::mem::take(&mut *self.oversized.lock());
        if oversized {
            warn!("Message from {} exceeds {} bytes", session.peer(), self.max_size);
            session.reset_transaction();
            return Ok(SmtpResponse::new(
                552,
                "Requested mail action aborted: exceeded storage allocation",
            ));
        }

        let mut content = Self::trace_header(session).into_bytes();
        content.extend_from_slice(&session.take_message());
        let mut mail = Mail {
            sender: session.sender().unwrap_or_default().to_string(),
            recipients: session.recipients(),
            content,
        };
        session.reset_transaction();

        info!(
            "Message accepted: {} bytes from <{}> for {} recipient(s)",
            mail.content.len(),
            mail.sender,
            mail.recipients.len()
        );

        for hook in &self.hooks {
            if let Some(response) = hook.on_message(session, &mut mail).await? {
                return Ok(response);
            }
        }
        Ok(SmtpResponse::new(250, "OK: Message accepted"))
    }
}

#[async_trait]
impl LineHandler for DataLineHandler {
    async fn on_line(
        &self,
        session: &mut SmtpSession,
        line: &[u8],
    ) -> Result<Option<SmtpResponse>> {
        if line == b"." {
            session.pop_line_handler();
            return self.finish(session).await.map(Some);
        }

        // Transparency: a leading dot was doubled by the client
        let line = line.strip_prefix(b".").unwrap_or(line);

        let mut oversized = self.oversized.lock();
        if *oversized {
            return Ok(None);
        }
        let message = session.message_mut();
        if message.len() + line.len() + 2 > self.max_size {
            *oversized = true;
            message.clear();
            return Ok(None);
        }
        message.extend_from_slice(line);
        message.extend_from_slice(b"\r\n");
        Ok(None)
    }

    fn reads_message(&self) -> bool {
        true
    }
}
