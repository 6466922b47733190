//! SMTP receiver built from a chain of handlers (RFC 5321)
//!
//! - [`server`]: accept loop
//! - [`session`]: per-connection state and the line loop
//! - [`handler`]: handler stages and chain wiring
//! - [`handlers`]: the stock handlers and optional extensions
//! - [`commands`]: command line parsing
//! - [`response`]: numeric replies

pub mod commands;
pub mod handler;
pub mod handlers;
pub mod response;
pub mod server;
pub mod session;

pub use commands::SmtpRequest;
pub use handler::{HandlerChain, Mail, SmtpHandler};
pub use handlers::{build_chain, HandlerServices, MailSubmission};
pub use response::SmtpResponse;
pub use server::SmtpServer;
pub use session::{serve_connection, SmtpSession};
