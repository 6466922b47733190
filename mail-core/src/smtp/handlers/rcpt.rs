//! Optional recipient checks, enabled by name in `smtp.handlers`

use crate::error::Result;
use crate::host::MailboxHost;
use crate::smtp::commands::split_address;
use crate::smtp::handler::{RcptHook, SmtpHandler};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::SmtpSession;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Caps the number of recipients per transaction
pub struct MaxRecipients {
    pub max: usize,
}

impl SmtpHandler for MaxRecipients {
    fn name(&self) -> &'static str {
        "max-rcpt"
    }

    fn as_rcpt_hook(self: Arc<Self>) -> Option<Arc<dyn RcptHook>> {
        Some(self)
    }
}

#[async_trait]
impl RcptHook for MaxRecipients {
    async fn on_rcpt(
        &self,
        session: &SmtpSession,
        _recipient: &str,
    ) -> Result<Option<SmtpResponse>> {
        if session.recipients().len() >= self.max {
            return Ok(Some(SmtpResponse::new(
                452,
                format!("Too many recipients (max {})", self.max),
            )));
        }
        Ok(None)
    }
}

/// Refuses recipients in the local domain that have no account
pub struct ValidRecipient {
    pub domain: String,
    pub host: Arc<MailboxHost>,
}

impl SmtpHandler for ValidRecipient {
    fn name(&self) -> &'static str {
        "valid-rcpt"
    }

    fn as_rcpt_hook(self: Arc<Self>) -> Option<Arc<dyn RcptHook>> {
        Some(self)
    }
}

#[async_trait]
impl RcptHook for ValidRecipient {
    async fn on_rcpt(
        &self,
        _session: &SmtpSession,
        recipient: &str,
    ) -> Result<Option<SmtpResponse>> {
        let Some((local, domain)) = split_address(recipient) else {
            return Ok(None);
        };
        if !domain.eq_ignore_ascii_case(&self.domain) {
            return Ok(None);
        }
        if self.host.is_home_server(local).await? {
            return Ok(None);
        }
        debug!("No local account for {}", recipient);
        Ok(Some(SmtpResponse::new(
            550,
            format!("No such user here: {}", recipient),
        )))
    }
}
