//! Message hooks that hand accepted mail on

use crate::error::Result;
use crate::host::MailboxHost;
use crate::smtp::commands::split_address;
use crate::smtp::handler::{Mail, MessageHook, SmtpHandler};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::SmtpSession;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

/// Outbound path for recipients this server does not host
#[async_trait]
pub trait MailSubmission: Send + Sync {
    async fn submit(&self, mail: &Mail) -> Result<()>;
}

/// Records remote mail in the log and drops it
pub struct LoggingSubmission;

#[async_trait]
impl MailSubmission for LoggingSubmission {
    async fn submit(&self, mail: &Mail) -> Result<()> {
        info!(
            "Remote submission of {} bytes from <{}> to {:?}",
            mail.content.len(),
            mail.sender,
            mail.recipients
        );
        Ok(())
    }
}

/// Files mail for local accounts into their INBOX
pub struct LocalDelivery {
    pub domain: String,
    pub host: Arc<MailboxHost>,
}

impl LocalDelivery {
    /// Account name when `recipient` belongs to this server's domain
    fn local_part<'a>(&self, recipient: &'a str) -> Option<&'a str> {
        match split_address(recipient) {
            Some((local, domain)) if domain.eq_ignore_ascii_case(&self.domain) => Some(local),
            Some(_) => None,
            None if !recipient.contains('@') => Some(recipient),
            None => None,
        }
    }
}

impl SmtpHandler for LocalDelivery {
    fn name(&self) -> &'static str {
        "local-delivery"
    }

    fn as_message_hook(self: Arc<Self>) -> Option<Arc<dyn MessageHook>> {
        Some(self)
    }
}

#[async_trait]
impl MessageHook for LocalDelivery {
    async fn on_message(
        &self,
        _session: &SmtpSession,
        mail: &mut Mail,
    ) -> Result<Option<SmtpResponse>> {
        let mut remaining = Vec::with_capacity(mail.recipients.len());
        for recipient in std::mem::take(&mut mail.recipients) {
            let local = match self.local_part(&recipient) {
                Some(local) => local.to_string(),
                None => {
                    remaining.push(recipient);
                    continue;
                }
            };
            if !self.host.is_home_server(&local).await? {
                remaining.push(recipient);
                continue;
            }
            match self.host.deliver(&local, mail.content.clone()).await {
                Ok(uid) => info!("Delivered to {} as UID {}", recipient, uid),
                Err(e) => {
                    error!("Local delivery to {} failed: {}", recipient, e);
                    mail.recipients = remaining;
                    return Ok(Some(SmtpResponse::local_error()));
                }
            }
        }
        mail.recipients = remaining;
        Ok(None)
    }
}

/// Passes whatever local delivery left behind to the submission service
pub struct RemoteDelivery {
    pub submission: Arc<dyn MailSubmission>,
}

impl SmtpHandler for RemoteDelivery {
    fn name(&self) -> &'static str {
        "remote-delivery"
    }

    fn as_message_hook(self: Arc<Self>) -> Option<Arc<dyn MessageHook>> {
        Some(self)
    }
}

#[async_trait]
impl MessageHook for RemoteDelivery {
    async fn on_message(
        &self,
        _session: &SmtpSession,
        mail: &mut Mail,
    ) -> Result<Option<SmtpResponse>> {
        if mail.recipients.is_empty() {
            return Ok(None);
        }
        if let Err(e) = self.submission.submit(mail).await {
            error!("Submission for {:?} failed: {}", mail.recipients, e);
            return Ok(Some(SmtpResponse::local_error()));
        }
        mail.recipients.clear();
        Ok(None)
    }
}
