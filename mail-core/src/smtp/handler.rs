//! SMTP handler chain
//!
//! Every stage is an [`SmtpHandler`]. What a handler takes part in is found
//! by probing it for the stage traits it implements: connect handlers greet,
//! line handlers own raw input, command handlers serve one or more verbs,
//! and hooks see recipients or finished messages. Handlers that collect
//! other handlers implement [`ExtensibleHandler`] and are wired once every
//! handler exists.

use crate::error::Result;
use crate::smtp::commands::SmtpRequest;
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::SmtpSession;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Envelope and content of one accepted message
#[derive(Debug, Clone, PartialEq)]
pub struct Mail {
    pub sender: String,
    /// Recipients still awaiting delivery; hooks remove the ones they handled
    pub recipients: Vec<String>,
    pub content: Vec<u8>,
}

/// The stage traits an extensible handler can ask to be wired with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Connect,
    Line,
    Command,
    Rcpt,
    Message,
}

pub trait SmtpHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn as_connect_handler(self: Arc<Self>) -> Option<Arc<dyn ConnectHandler>> {
        None
    }

    fn as_line_handler(self: Arc<Self>) -> Option<Arc<dyn LineHandler>> {
        None
    }

    fn as_command_handler(self: Arc<Self>) -> Option<Arc<dyn CommandHandler>> {
        None
    }

    fn as_rcpt_hook(self: Arc<Self>) -> Option<Arc<dyn RcptHook>> {
        None
    }

    fn as_message_hook(self: Arc<Self>) -> Option<Arc<dyn MessageHook>> {
        None
    }

    fn as_extensible(self: Arc<Self>) -> Option<Arc<dyn ExtensibleHandler>> {
        None
    }
}

/// Runs once per connection before any line is read
#[async_trait]
pub trait ConnectHandler: Send + Sync {
    /// A response with `end_session` set stops the remaining handlers
    async fn on_connect(&self, session: &mut SmtpSession) -> Result<Option<SmtpResponse>>;
}

/// Consumes raw lines while on top of the session's line-handler stack
#[async_trait]
pub trait LineHandler: Send + Sync {
    /// `line` comes without its CRLF
    async fn on_line(&self, session: &mut SmtpSession, line: &[u8])
        -> Result<Option<SmtpResponse>>;

    /// Message content is being read (data timeout applies)
    fn reads_message(&self) -> bool {
        false
    }
}

/// Serves the verbs returned by `commands`; `*` marks the fallback
#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn commands(&self) -> &'static [&'static str];

    async fn on_command(
        &self,
        session: &mut SmtpSession,
        request: &SmtpRequest,
    ) -> Result<SmtpResponse>;
}

/// Vets one recipient before it joins the transaction
#[async_trait]
pub trait RcptHook: Send + Sync {
    /// `Some` rejects the recipient with that response
    async fn on_rcpt(&self, session: &SmtpSession, recipient: &str)
        -> Result<Option<SmtpResponse>>;
}

/// Sees every completed message, in registration order
#[async_trait]
pub trait MessageHook: Send + Sync {
    /// `Some` ends the hook sequence with that response
    async fn on_message(&self, session: &SmtpSession, mail: &mut Mail)
        -> Result<Option<SmtpResponse>>;
}

pub trait ExtensibleHandler: Send + Sync {
    fn markers(&self) -> &'static [Marker];

    /// Receive the handlers implementing `marker`, in registration order
    fn wire(&self, marker: Marker, handlers: &[Arc<dyn SmtpHandler>]) -> Result<()>;
}

fn implements(handler: &Arc<dyn SmtpHandler>, marker: Marker) -> bool {
    let handler = Arc::clone(handler);
    match marker {
        Marker::Connect => handler.as_connect_handler().is_some(),
        Marker::Line => handler.as_line_handler().is_some(),
        Marker::Command => handler.as_command_handler().is_some(),
        Marker::Rcpt => handler.as_rcpt_hook().is_some(),
        Marker::Message => handler.as_message_hook().is_some(),
    }
}

/// Handlers wired for a server; immutable once built
pub struct HandlerChain {
    handlers: Vec<Arc<dyn SmtpHandler>>,
    connect_handlers: Vec<Arc<dyn ConnectHandler>>,
    line_handlers: Vec<Arc<dyn LineHandler>>,
}

impl HandlerChain {
    /// Classify every handler, then wire the extensible ones
    pub fn new(handlers: Vec<Arc<dyn SmtpHandler>>) -> Result<Self> {
        let mut connect_handlers = Vec::new();
        let mut line_handlers = Vec::new();

        for handler in &handlers {
            info!("Loaded SMTP handler {}", handler.name());
            if let Some(connect) = Arc::clone(handler).as_connect_handler() {
                connect_handlers.push(connect);
            }
            if let Some(line) = Arc::clone(handler).as_line_handler() {
                line_handlers.push(line);
            }
        }

        for handler in &handlers {
            let Some(extensible) = Arc::clone(handler).as_extensible() else {
                continue;
            };
            for &marker in extensible.markers() {
                let matching: Vec<Arc<dyn SmtpHandler>> = handlers
                    .iter()
                    .filter(|candidate| implements(candidate, marker))
                    .cloned()
                    .collect();
                debug!(
                    "Wiring {} {:?} handler(s) into {}",
                    matching.len(),
                    marker,
                    handler.name()
                );
                extensible.wire(marker, &matching)?;
            }
        }

        Ok(Self {
            handlers,
            connect_handlers,
            line_handlers,
        })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub fn connect_handlers(&self) -> &[Arc<dyn ConnectHandler>] {
        &self.connect_handlers
    }

    /// Initial line-handler stack; the last one is on top
    pub fn line_handlers(&self) -> &[Arc<dyn LineHandler>] {
        &self.line_handlers
    }
}
