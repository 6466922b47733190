//! Stock SMTP handlers
//!
//! [`core_package`] yields the handlers every server runs, in the order they
//! are wired. Optional handlers are looked up by name with [`extension`] and
//! appended after the core package.

mod commands;
mod data;
mod delivery;
mod rcpt;

pub use commands::{
    CommandDispatcher, HeloHandler, MailHandler, RcptHandler, SimpleCommand,
    UnknownCommandHandler, WelcomeHandler, UNKNOWN_COMMAND,
};
pub use data::{DataHandler, DataLineHandler};
pub use delivery::{LocalDelivery, LoggingSubmission, MailSubmission, RemoteDelivery};
pub use rcpt::{MaxRecipients, ValidRecipient};

use crate::config::Config;
use crate::error::{MailError, Result};
use crate::host::MailboxHost;
use crate::smtp::handler::{HandlerChain, SmtpHandler};
use std::sync::Arc;

/// What the stock handlers need from the rest of the server
#[derive(Clone)]
pub struct HandlerServices {
    pub config: Arc<Config>,
    pub host: Arc<MailboxHost>,
    pub submission: Arc<dyn MailSubmission>,
}

pub fn core_package(services: &HandlerServices) -> Vec<Arc<dyn SmtpHandler>> {
    let mut handlers: Vec<Arc<dyn SmtpHandler>> = vec![
        Arc::new(WelcomeHandler),
        Arc::new(CommandDispatcher::default()),
        Arc::new(HeloHandler { extended: false }),
        Arc::new(HeloHandler { extended: true }),
        Arc::new(MailHandler),
        Arc::new(RcptHandler::default()),
        Arc::new(DataHandler::default()),
    ];
    handlers.extend(SimpleCommand::all());
    handlers.push(Arc::new(UnknownCommandHandler));
    handlers.push(Arc::new(LocalDelivery {
        domain: services.config.server.domain.clone(),
        host: Arc::clone(&services.host),
    }));
    handlers.push(Arc::new(RemoteDelivery {
        submission: Arc::clone(&services.submission),
    }));
    handlers
}

/// Optional handler by its configured name
pub fn extension(name: &str, services: &HandlerServices) -> Result<Arc<dyn SmtpHandler>> {
    match name {
        "max-rcpt" => Ok(Arc::new(MaxRecipients {
            max: services.config.smtp.max_recipients,
        })),
        "valid-rcpt" => Ok(Arc::new(ValidRecipient {
            domain: services.config.server.domain.clone(),
            host: Arc::clone(&services.host),
        })),
        other => Err(MailError::Config(format!("Unknown SMTP handler: {}", other))),
    }
}

/// Core package followed by the handlers named in `smtp.handlers`
pub fn build_chain(services: &HandlerServices) -> Result<HandlerChain> {
    let mut handlers = core_package(services);
    for name in &services.config.smtp.handlers {
        handlers.push(extension(name, services)?);
    }
    HandlerChain::new(handlers)
}
