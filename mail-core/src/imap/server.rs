//! IMAP server implementation
//!
//! Accepts TCP connections and runs one command loop per connection

use crate::config::{Config, ImapConfig};
use crate::error::{MailError, NotFoundStatus, Result};
use crate::host::MailboxHost;
use crate::imap::command::{CommandContext, CommandRegistry};
use crate::imap::connection::ImapConnection;
use crate::imap::session::{ImapSession, SessionState};
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// IMAP server
pub struct ImapServer {
    config: Arc<Config>,
    host: Arc<MailboxHost>,
    registry: Arc<CommandRegistry>,
}

impl ImapServer {
    pub fn new(config: Arc<Config>, host: Arc<MailboxHost>, registry: Arc<CommandRegistry>) -> Self {
        Self {
            config,
            host,
            registry,
        }
    }

    /// Start the IMAP server
    pub async fn start(&self) -> Result<()> {
        let addr = &self.config.imap.listen_addr;
        let listener = TcpListener::bind(addr).await?;

        info!("🌐 IMAP server listening on {}", addr);

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    info!("📨 New IMAP connection from {}", peer_addr);
                    let host = Arc::clone(&self.host);
                    let registry = Arc::clone(&self.registry);
                    let config = Arc::clone(&self.config);

                    tokio::spawn(async move {
                        let (reader, writer) = stream.into_split();
                        let peer = peer_addr.to_string();
                        if let Err(e) =
                            serve_connection(reader, writer, &peer, &host, &registry, &config.imap)
                                .await
                        {
                            error!("Error handling IMAP connection from {}: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept IMAP connection: {}", e);
                }
            }
        }
    }
}

/// Run one IMAP connection to completion
///
/// Whatever ends the connection, the selected mailbox is released before
/// returning.
pub async fn serve_connection<R, W>(
    reader: R,
    writer: W,
    peer: &str,
    host: &MailboxHost,
    registry: &CommandRegistry,
    config: &ImapConfig,
) -> Result<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut conn = ImapConnection::new(reader, writer, config);
    let mut session = ImapSession::new();
    debug!("IMAP session {} started for {}", session.id(), peer);

    let span = info_span!("imap", peer = %peer, id = %session.id());
    let result = run_session(&mut conn, &mut session, host, registry, config)
        .instrument(span)
        .await;

    if let Ok(user) = session.user() {
        let user = user.to_string();
        if let Err(e) = host.release(&user, session.deselect()).await {
            error!("Failed to release selection of {}: {}", user, e);
        }
    }

    info!("IMAP connection from {} closed", peer);
    result
}

async fn run_session(
    conn: &mut ImapConnection,
    session: &mut ImapSession,
    host: &MailboxHost,
    registry: &CommandRegistry,
    config: &ImapConfig,
) -> Result<()> {
    conn.untagged("OK IMAP4rev1 Service Ready").await?;
    conn.flush().await?;

    let mut errors = 0usize;

    loop {
        match conn.next_line().await {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(e) => return say_goodbye(conn, e).await,
        }

        let tag = match conn.tag() {
            Ok(tag) => tag,
            Err(_) => {
                conn.untagged("BAD Missing or invalid tag").await?;
                conn.flush().await?;
                errors += 1;
                if too_many(conn, errors, config).await? {
                    return Ok(());
                }
                continue;
            }
        };
        let name = match conn.atom() {
            Ok(name) => name,
            Err(_) => {
                conn.tagged(&tag, "BAD", "Missing command").await?;
                errors += 1;
                if too_many(conn, errors, config).await? {
                    return Ok(());
                }
                continue;
            }
        };

        let command = registry.get(&name);
        if !command.valid_states().contains(&session.state()) {
            warn!("{} not valid in state {:?}", command.name(), session.state());
            conn.tagged(&tag, "BAD", "Command not valid in this state")
                .await?;
            errors += 1;
            if too_many(conn, errors, config).await? {
                return Ok(());
            }
            continue;
        }

        let result = {
            let mut ctx = CommandContext {
                tag: tag.clone(),
                use_uids: false,
                conn: &mut *conn,
                session: &mut *session,
                host,
                registry,
            };
            command.process(&mut ctx).await
        };

        let (status, text) = match result {
            Ok(text) => {
                errors = 0;
                ("OK", text)
            }
            Err(e) if e.is_fatal() => return say_goodbye(conn, e).await,
            Err(e) => {
                errors += 1;
                failure_response(&e, command.name())
            }
        };

        if session.state() == SessionState::Selected && command.allows_expunge_notice() {
            let changes = session.selected_mut()?.changes();
            for line in changes {
                conn.untagged(&line).await?;
            }
        }
        conn.tagged(&tag, status, &text).await?;

        if session.state() == SessionState::Logout {
            return Ok(());
        }
        if too_many(conn, errors, config).await? {
            return Ok(());
        }
    }
}

/// Close with BYE when the consecutive error limit is exceeded
async fn too_many(conn: &mut ImapConnection, errors: usize, config: &ImapConfig) -> Result<bool> {
    if errors <= config.max_errors {
        return Ok(false);
    }
    warn!("Too many errors ({}), closing IMAP connection", errors);
    conn.untagged("BYE Too many errors").await?;
    conn.flush().await?;
    Ok(true)
}

/// End the connection after a transport-level failure
async fn say_goodbye(conn: &mut ImapConnection, err: MailError) -> Result<()> {
    let reason = match &err {
        MailError::Io(e) if e.kind() == ErrorKind::TimedOut => "BYE Autologout; idle for too long",
        MailError::Io(e) if e.kind() == ErrorKind::InvalidData => "BYE Line too long",
        _ => return Err(err),
    };
    info!("Closing IMAP connection: {}", err);
    conn.untagged(reason).await?;
    conn.flush().await?;
    Ok(())
}

/// Tagged status and text for a failed command
fn failure_response(err: &MailError, command: &str) -> (&'static str, String) {
    let reason = match err {
        MailError::ProtocolSyntax(reason) => {
            debug!("{} syntax error: {}", command, reason);
            return ("BAD", format!("{}: {}", command, reason));
        }
        MailError::AccessDenied(_) => "Unknown mailbox".to_string(),
        MailError::MailboxNotFound { status, .. } => match status {
            NotFoundStatus::NotLocal if matches!(command, "APPEND" | "COPY") => {
                return ("NO", "[TRYCREATE] Mailbox does not exist".to_string())
            }
            NotFoundStatus::NotLocal => "Mailbox does not exist".to_string(),
            NotFoundStatus::LocalButDeleted => "Mailbox has been deleted".to_string(),
        },
        MailError::Unauthorized(reason) => {
            debug!("{} refused: {}", command, reason);
            "Insufficient rights".to_string()
        }
        MailError::AlreadyExists(_) => "Mailbox already exists".to_string(),
        MailError::MailboxInUse(_) => "Mailbox is in use".to_string(),
        MailError::Rejected(reason) => reason.clone(),
        MailError::AuthenticationFailed => return ("NO", "LOGIN failed".to_string()),
        other => {
            error!("{} failed: {}", command, other);
            "Server error".to_string()
        }
    };
    ("NO", format!("{} failed: {}", command, reason))
}
