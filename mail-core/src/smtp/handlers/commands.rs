//! Greeting, command dispatch and the simple verbs

use crate::error::{MailError, Result};
use crate::smtp::commands::SmtpRequest;
use crate::smtp::handler::{
    CommandHandler, ConnectHandler, ExtensibleHandler, LineHandler, Marker, RcptHook,
    SmtpHandler,
};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::{SmtpSession, HELO_NAME, SENDER};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Verb the fallback command handler registers under
pub const UNKNOWN_COMMAND: &str = "*";

/// Sends the 220 banner
pub struct WelcomeHandler;

impl SmtpHandler for WelcomeHandler {
    fn name(&self) -> &'static str {
        "welcome"
    }

    fn as_connect_handler(self: Arc<Self>) -> Option<Arc<dyn ConnectHandler>> {
        Some(self)
    }
}

#[async_trait]
impl ConnectHandler for WelcomeHandler {
    async fn on_connect(&self, session: &mut SmtpSession) -> Result<Option<SmtpResponse>> {
        info!("SMTP connection from {}", session.peer());
        Ok(Some(SmtpResponse::new(
            220,
            format!("{} ESMTP Service Ready", session.hostname()),
        )))
    }
}

/// Default line handler: parses a command line and routes it by verb
#[derive(Default)]
pub struct CommandDispatcher {
    commands: RwLock<HashMap<&'static str, Arc<dyn CommandHandler>>>,
    fallback: RwLock<Option<Arc<dyn CommandHandler>>>,
}

impl CommandDispatcher {
    fn handler_for(&self, command: &str) -> Option<Arc<dyn CommandHandler>> {
        self.commands
            .read()
            .get(command)
            .cloned()
            .or_else(|| self.fallback.read().clone())
    }
}

impl SmtpHandler for CommandDispatcher {
    fn name(&self) -> &'static str {
        "command-dispatcher"
    }

    fn as_line_handler(self: Arc<Self>) -> Option<Arc<dyn LineHandler>> {
        Some(self)
    }

    fn as_extensible(self: Arc<Self>) -> Option<Arc<dyn ExtensibleHandler>> {
        Some(self)
    }
}

impl ExtensibleHandler for CommandDispatcher {
    fn markers(&self) -> &'static [Marker] {
        &[Marker::Command]
    }

    fn wire(&self, _marker: Marker, handlers: &[Arc<dyn SmtpHandler>]) -> Result<()> {
        let mut commands = self.commands.write();
        for handler in handlers {
            let name = handler.name();
            let Some(command_handler) = Arc::clone(handler).as_command_handler() else {
                continue;
            };
            for &verb in command_handler.commands() {
                if verb == UNKNOWN_COMMAND {
                    *self.fallback.write() = Some(Arc::clone(&command_handler));
                } else if commands
                    .insert(verb, Arc::clone(&command_handler))
                    .is_some()
                {
                    debug!("{} now served by {}", verb, name);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LineHandler for CommandDispatcher {
    async fn on_line(
        &self,
        session: &mut SmtpSession,
        line: &[u8],
    ) -> Result<Option<SmtpResponse>> {
        let text = String::from_utf8_lossy(line);
        let request = match SmtpRequest::parse(&text) {
            Ok(request) => request,
            Err(e) => {
                warn!("Command parse error: {}", e);
                return Ok(Some(SmtpResponse::new(
                    500,
                    "Syntax error, command unrecognized",
                )));
            }
        };

        match self.handler_for(&request.command) {
            Some(handler) => Ok(Some(handler.on_command(session, &request).await?)),
            None => Ok(Some(SmtpResponse::new(502, "Command not implemented"))),
        }
    }
}

/// HELO, or EHLO with the extension list
pub struct HeloHandler {
    pub extended: bool,
}

impl SmtpHandler for HeloHandler {
    fn name(&self) -> &'static str {
        if self.extended {
            "ehlo"
        } else {
            "helo"
        }
    }

    fn as_command_handler(self: Arc<Self>) -> Option<Arc<dyn CommandHandler>> {
        Some(self)
    }
}

#[async_trait]
impl CommandHandler for HeloHandler {
    fn commands(&self) -> &'static [&'static str] {
        if self.extended {
            &["EHLO"]
        } else {
            &["HELO"]
        }
    }

    async fn on_command(
        &self,
        session: &mut SmtpSession,
        request: &SmtpRequest,
    ) -> Result<SmtpResponse> {
        let domain = request.argument.as_str();
        if domain.is_empty() {
            return Ok(SmtpResponse::syntax_error(format!(
                "{} requires domain",
                request.command
            )));
        }

        info!("{} from {}", request.command, domain);
        session.set_connection_state(HELO_NAME, Value::from(domain));
        session.reset_transaction();

        let greeting = format!("{} Hello {}", session.hostname(), domain);
        if !self.extended {
            return Ok(SmtpResponse::new(250, greeting));
        }
        Ok(SmtpResponse::multiline(
            250,
            vec![
                greeting,
                format!("SIZE {}", session.config().max_message_size),
                "8BITMIME".to_string(),
                "HELP".to_string(),
            ],
        ))
    }
}

/// `MAIL FROM:<path> [SIZE=n]`
pub struct MailHandler;

impl SmtpHandler for MailHandler {
    fn name(&self) -> &'static str {
        "mail"
    }

    fn as_command_handler(self: Arc<Self>) -> Option<Arc<dyn CommandHandler>> {
        Some(self)
    }
}

#[async_trait]
impl CommandHandler for MailHandler {
    fn commands(&self) -> &'static [&'static str] {
        &["MAIL"]
    }

    async fn on_command(
        &self,
        session: &mut SmtpSession,
        request: &SmtpRequest,
    ) -> Result<SmtpResponse> {
        if session.helo().is_none() {
            return Ok(SmtpResponse::new(503, "Send HELO/EHLO first"));
        }
        let sender = match request.path("FROM:") {
            Ok(sender) => sender,
            Err(e) => return Ok(SmtpResponse::syntax_error(e.to_string())),
        };

        let declared_size = request
            .argument
            .split_whitespace()
            .skip(1)
            .filter_map(|param| param.split_once('='))
            .find(|(key, _)| key.eq_ignore_ascii_case("SIZE"))
            .and_then(|(_, value)| value.parse::<usize>().ok());
        let max = session.config().max_message_size;
        if declared_size.is_some_and(|size| size > max) {
            warn!("Declared size {:?} exceeds {}", declared_size, max);
            return Ok(SmtpResponse::new(
                552,
                format!("Message size exceeds fixed maximum message size ({})", max),
            ));
        }

        info!("MAIL FROM: {}", sender);
        session.reset_transaction();
        session.set_transaction_state(SENDER, Value::from(sender));
        Ok(SmtpResponse::ok())
    }
}

/// `RCPT TO:<path>`; extensible over recipient hooks
#[derive(Default)]
pub struct RcptHandler {
    hooks: RwLock<Vec<Arc<dyn RcptHook>>>,
}

impl SmtpHandler for RcptHandler {
    fn name(&self) -> &'static str {
        "rcpt"
    }

    fn as_command_handler(self: Arc<Self>) -> Option<Arc<dyn CommandHandler>> {
        Some(self)
    }

    fn as_extensible(self: Arc<Self>) -> Option<Arc<dyn ExtensibleHandler>> {
        Some(self)
    }
}

impl ExtensibleHandler for RcptHandler {
    fn markers(&self) -> &'static [Marker] {
        &[Marker::Rcpt]
    }

    fn wire(&self, _marker: Marker, handlers: &[Arc<dyn SmtpHandler>]) -> Result<()> {
        *self.hooks.write() = handlers
            .iter()
            .filter_map(|h| Arc::clone(h).as_rcpt_hook())
            .collect();
        Ok(())
    }
}

#[async_trait]
impl CommandHandler for RcptHandler {
    fn commands(&self) -> &'static [&'static str] {
        &["RCPT"]
    }

    async fn on_command(
        &self,
        session: &mut SmtpSession,
        request: &SmtpRequest,
    ) -> Result<SmtpResponse> {
        if session.sender().is_none() {
            return Ok(SmtpResponse::new(503, "Need MAIL command first"));
        }
        let recipient = match request.path("TO:") {
            Ok(recipient) if !recipient.is_empty() => recipient,
            Ok(_) => return Ok(SmtpResponse::syntax_error("Empty recipient")),
            Err(e) => return Ok(SmtpResponse::syntax_error(e.to_string())),
        };

        let hooks = self.hooks.read().clone();
        for hook in hooks {
            if let Some(rejection) = hook.on_rcpt(session, &recipient).await? {
                warn!("RCPT TO {} rejected: {}", recipient, rejection.code);
                return Ok(rejection);
            }
        }

        info!("RCPT TO: {}", recipient);
        session.add_recipient(&recipient);
        Ok(SmtpResponse::ok())
    }
}

/// RSET, NOOP, QUIT, VRFY and HELP
pub struct SimpleCommand {
    pub verb: &'static str,
}

impl SimpleCommand {
    pub fn all() -> Vec<Arc<dyn SmtpHandler>> {
        ["RSET", "NOOP", "QUIT", "VRFY", "HELP"]
            .into_iter()
            .map(|verb| Arc::new(SimpleCommand { verb }) as Arc<dyn SmtpHandler>)
            .collect()
    }
}

impl SmtpHandler for SimpleCommand {
    fn name(&self) -> &'static str {
        match self.verb {
            "RSET" => "rset",
            "NOOP" => "noop",
            "QUIT" => "quit",
            "VRFY" => "vrfy",
            _ => "help",
        }
    }

    fn as_command_handler(self: Arc<Self>) -> Option<Arc<dyn CommandHandler>> {
        Some(self)
    }
}

#[async_trait]
impl CommandHandler for SimpleCommand {
    fn commands(&self) -> &'static [&'static str] {
        match self.verb {
            "RSET" => &["RSET"],
            "NOOP" => &["NOOP"],
            "QUIT" => &["QUIT"],
            "VRFY" => &["VRFY"],
            _ => &["HELP"],
        }
    }

    async fn on_command(
        &self,
        session: &mut SmtpSession,
        _request: &SmtpRequest,
    ) -> Result<SmtpResponse> {
        let response = match self.verb {
            "RSET" => {
                session.reset_transaction();
                SmtpResponse::ok()
            }
            "NOOP" => SmtpResponse::ok(),
            "QUIT" => {
                info!("QUIT from {}", session.peer());
                SmtpResponse::new(
                    221,
                    format!("{} Service closing transmission channel", session.hostname()),
                )
                .ending()
            }
            "VRFY" => SmtpResponse::new(
                252,
                "Cannot VRFY user, but will accept message and attempt delivery",
            ),
            "HELP" => SmtpResponse::multiline(
                214,
                vec![
                    "Commands supported:".to_string(),
                    "HELO EHLO MAIL RCPT DATA".to_string(),
                    "RSET NOOP QUIT VRFY HELP".to_string(),
                ],
            ),
            other => {
                return Err(MailError::SmtpProtocol(format!(
                    "no simple command {}",
                    other
                )))
            }
        };
        Ok(response)
    }
}

/// Answers every verb nobody else serves
pub struct UnknownCommandHandler;

impl SmtpHandler for UnknownCommandHandler {
    fn name(&self) -> &'static str {
        "unknown-command"
    }

    fn as_command_handler(self: Arc<Self>) -> Option<Arc<dyn CommandHandler>> {
        Some(self)
    }
}

#[async_trait]
impl CommandHandler for UnknownCommandHandler {
    fn commands(&self) -> &'static [&'static str] {
        &[UNKNOWN_COMMAND]
    }

    async fn on_command(
        &self,
        _session: &mut SmtpSession,
        request: &SmtpRequest,
    ) -> Result<SmtpResponse> {
        warn!("Unknown command: {}", request.command);
        Ok(SmtpResponse::new(502, "Command not implemented"))
    }
}
