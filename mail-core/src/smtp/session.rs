//! SMTP session state and protocol loop
//!
//! A session carries two key-value maps: connection state lives until
//! disconnect, transaction state is cleared by RSET, a new MAIL or a
//! finished DATA. Raw lines go to the top of the line-handler stack.

use crate::config::SmtpConfig;
use crate::error::Result;
use crate::smtp::handler::{HandlerChain, LineHandler};
use crate::smtp::response::SmtpResponse;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Connection state: name given in HELO/EHLO
pub const HELO_NAME: &str = "helo";
/// Connection state: remote address
pub const PEER: &str = "peer";
/// Transaction state: reverse path from MAIL
pub const SENDER: &str = "sender";
/// Transaction state: accepted forward paths
pub const RECIPIENTS: &str = "recipients";

pub struct SmtpSession {
    id: Uuid,
    hostname: String,
    config: SmtpConfig,
    connection: HashMap<String, Value>,
    transaction: HashMap<String, Value>,
    /// Message content received so far during DATA
    message: Vec<u8>,
    line_handlers: Vec<Arc<dyn LineHandler>>,
}

impl SmtpSession {
    pub fn new(
        peer: &str,
        hostname: &str,
        config: SmtpConfig,
        line_handlers: Vec<Arc<dyn LineHandler>>,
    ) -> Self {
        let mut connection = HashMap::new();
        connection.insert(PEER.to_string(), Value::from(peer));
        Self {
            id: Uuid::new_v4(),
            hostname: hostname.to_string(),
            config,
            connection,
            transaction: HashMap::new(),
            message: Vec::new(),
            line_handlers,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Our own name for greetings and trace headers
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    // --- state maps ---

    pub fn connection_state(&self, key: &str) -> Option<&Value> {
        self.connection.get(key)
    }

    pub fn set_connection_state(&mut self, key: &str, value: Value) {
        self.connection.insert(key.to_string(), value);
    }

    pub fn transaction_state(&self, key: &str) -> Option<&Value> {
        self.transaction.get(key)
    }

    pub fn set_transaction_state(&mut self, key: &str, value: Value) {
        self.transaction.insert(key.to_string(), value);
    }

    /// Forget the envelope and any partial message
    pub fn reset_transaction(&mut self) {
        self.transaction.clear();
        self.message.clear();
    }

    pub fn peer(&self) -> &str {
        self.connection_state(PEER)
            .and_then(Value::as_str)
            .unwrap_or("unknown")
    }

    pub fn helo(&self) -> Option<&str> {
        self.connection_state(HELO_NAME).and_then(Value::as_str)
    }

    pub fn sender(&self) -> Option<&str> {
        self.transaction_state(SENDER).and_then(Value::as_str)
    }

    pub fn recipients(&self) -> Vec<String> {
        self.transaction_state(RECIPIENTS)
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn add_recipient(&mut self, recipient: &str) {
        match self.transaction.get_mut(RECIPIENTS) {
            Some(Value::Array(list)) => list.push(Value::from(recipient)),
            _ => {
                self.transaction
                    .insert(RECIPIENTS.to_string(), Value::from(vec![recipient]));
            }
        }
    }

    // --- message buffer ---

    pub fn message(&self) -> &[u8] {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut Vec<u8> {
        &mut self.message
    }

    pub fn take_message(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.message)
    }

    // --- line-handler stack ---

    pub fn push_line_handler(&mut self, handler: Arc<dyn LineHandler>) {
        self.line_handlers.push(handler);
    }

    pub fn pop_line_handler(&mut self) -> Option<Arc<dyn LineHandler>> {
        self.line_handlers.pop()
    }

    pub fn top_line_handler(&self) -> Option<Arc<dyn LineHandler>> {
        self.line_handlers.last().cloned()
    }
}

/// Run one SMTP connection through the handler chain
pub async fn serve_connection<R, W>(
    reader: R,
    writer: W,
    peer: &str,
    hostname: &str,
    chain: &HandlerChain,
    config: &SmtpConfig,
) -> Result<()>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut writer = BufWriter::new(writer);
    let mut session = SmtpSession::new(
        peer,
        hostname,
        config.clone(),
        chain.line_handlers().to_vec(),
    );
    debug!("SMTP session {} started for {}", session.id(), peer);

    let span = info_span!("smtp", peer = %peer, id = %session.id());
    run_session(&mut reader, &mut writer, &mut session, chain, config)
        .instrument(span)
        .await?;

    info!("SMTP session with {} closed", peer);
    Ok(())
}

async fn run_session<R, W>(
    reader: &mut BufReader<R>,
    writer: &mut BufWriter<W>,
    session: &mut SmtpSession,
    chain: &HandlerChain,
    config: &SmtpConfig,
) -> Result<()>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    let peer = session.peer().to_string();
    for handler in chain.connect_handlers() {
        let response = match handler.on_connect(session).await {
            Ok(response) => response,
            Err(e) => {
                error!("Connect handler failed: {}", e);
                Some(SmtpResponse::new(421, "Service not available").ending())
            }
        };
        if let Some(response) = response {
            writer.write_all(response.render().as_bytes()).await?;
            if response.end_session {
                writer.flush().await?;
                info!("SMTP session with {} ended on connect", peer);
                return Ok(());
            }
        }
    }
    writer.flush().await?;

    let mut error_count = 0usize;
    let mut line = Vec::new();

    loop {
        // Check error count (security: disconnect abusive clients)
        if error_count >= config.max_errors {
            warn!("Too many errors, disconnecting");
            writer.write_all(b"421 Too many errors, closing connection\r\n").await?;
            writer.flush().await?;
            break;
        }

        let Some(handler) = session.top_line_handler() else {
            debug!("Line handler stack empty, ending session");
            break;
        };
        let limit = if handler.reads_message() {
            config.data_timeout()
        } else {
            config.command_timeout()
        };

        line.clear();
        let max = (config.max_line_length + 2) as u64;
        let mut limited = (&mut *reader).take(max);
        let n = match timeout(limit, limited.read_until(b'\n', &mut line)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                error!("IO error reading line: {}", e);
                return Err(e.into());
            }
            Err(_) => {
                warn!("Read timeout, disconnecting");
                writer.write_all(b"421 Timeout, closing connection\r\n").await?;
                writer.flush().await?;
                break;
            }
        };

        if n == 0 {
            debug!("Client disconnected");
            break;
        }

        // Check line length (security: prevent buffer overflow)
        if !line.ends_with(b"\n") && n as u64 == max {
            warn!("Line too long from {}", peer);
            if handler.reads_message() {
                // No way to resynchronise inside message content
                writer.write_all(b"500 Line too long, closing connection\r\n").await?;
                writer.flush().await?;
                break;
            }
            writer.write_all(b"500 Line too long\r\n").await?;
            writer.flush().await?;
            error_count += 1;
            skip_rest_of_line(reader, limit).await?;
            continue;
        }

        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }
        if !handler.reads_message() {
            debug!("Received: {}", String::from_utf8_lossy(&line));
        }

        let response = match handler.on_line(session, &line).await {
            Ok(response) => response,
            Err(e) => {
                error!("Error handling line: {}", e);
                Some(SmtpResponse::local_error())
            }
        };

        if let Some(response) = response {
            if response.is_permanent_failure() {
                error_count += 1;
            }
            debug!("Sending: {} {}", response.code, response.lines.join(" / "));
            writer.write_all(response.render().as_bytes()).await?;
            writer.flush().await?;
            if response.end_session {
                break;
            }
        }
    }

    Ok(())
}

/// Discard input up to the next newline after an over-long line
async fn skip_rest_of_line<R>(reader: &mut BufReader<R>, limit: std::time::Duration) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let buf = match timeout(limit, reader.fill_buf()).await {
            Ok(buf) => buf?,
            Err(_) => return Ok(()),
        };
        if buf.is_empty() {
            return Ok(());
        }
        match buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                return Ok(());
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn session() -> SmtpSession {
        SmtpSession::new("192.0.2.1:4000", "mx.example.com", Config::default().smtp, Vec::new())
    }

    #[test]
    fn test_state_maps() {
        let mut session = session();
        assert_eq!(session.peer(), "192.0.2.1:4000");
        assert!(session.helo().is_none());

        session.set_connection_state(HELO_NAME, Value::from("client.example.org"));
        session.set_transaction_state(SENDER, Value::from("bob@example.org"));
        session.add_recipient("alice@example.com");
        session.add_recipient("carol@example.com");
        session.message_mut().extend_from_slice(b"partial");

        assert_eq!(session.sender(), Some("bob@example.org"));
        assert_eq!(
            session.recipients(),
            vec!["alice@example.com".to_string(), "carol@example.com".to_string()]
        );

        session.reset_transaction();
        assert!(session.sender().is_none());
        assert!(session.recipients().is_empty());
        assert!(session.message().is_empty());
        assert_eq!(session.helo(), Some("client.example.org"));
    }

    #[test]
    fn test_line_handler_stack_starts_empty() {
        let mut session = session();
        assert!(session.top_line_handler().is_none());
        assert!(session.pop_line_handler().is_none());
    }
}
