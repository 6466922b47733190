//! IMAP4rev1 server
//!
//! The connection tokenizes requests, the registry maps verbs to
//! [`command::Command`] units, and the server loop ties them to one
//! [`session::ImapSession`] per client.

pub mod command;
pub mod commands;
pub mod connection;
pub mod server;
pub mod session;

pub use command::{Command, CommandContext, CommandRegistry};
pub use connection::ImapConnection;
pub use server::{serve_connection, ImapServer};
pub use session::{ImapSession, SelectedMailbox, SessionState};
