//! mail-core: IMAP4rev1 and SMTP mail server core
//!
//! Mailboxes live in a single hierarchy of absolute names (`#user.alice.Sent`),
//! guarded by per-mailbox ACLs and opened through a reference-counted host.
//!
//! # Modules
//!
//! - [`namespace`]: client names to absolute names and back
//! - [`mailbox`]: live mailbox state, ACL rights, flags and searches
//! - [`storage`]: folder records and message content backends
//! - [`users`]: account lookup and password checks
//! - [`host`]: opening, creating, renaming and deleting mailboxes
//! - [`imap`]: IMAP session engine and command set
//! - [`smtp`]: SMTP receiver built from a handler chain
//!
//! # Example
//!
//! ```no_run
//! use mail_core::config::Config;
//! use mail_core::host::MailboxHost;
//! use mail_core::imap::{CommandRegistry, ImapServer};
//! use mail_core::namespace::Namespace;
//! use mail_core::storage::{MemoryMessageStore, MemoryRecordStore};
//! use mail_core::users::MemoryUsersRepository;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> mail_core::Result<()> {
//!     let config = Arc::new(Config::default());
//!     let host = MailboxHost::new(
//!         Arc::new(MemoryRecordStore::new()),
//!         Arc::new(MemoryMessageStore::new()),
//!         Arc::new(MemoryUsersRepository::new()),
//!         Namespace::new(config.imap.hierarchy_delimiter),
//!     )
//!     .await?;
//!
//!     let server = ImapServer::new(config, Arc::new(host), Arc::new(CommandRegistry::standard()));
//!     server.start().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod host;
pub mod imap;
pub mod mailbox;
pub mod namespace;
pub mod smtp;
pub mod storage;
pub mod users;

// Re-export commonly used types
pub use config::Config;
pub use error::{MailError, Result};
