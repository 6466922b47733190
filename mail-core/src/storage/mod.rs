//! Persistence backends
//!
//! - [`records`]: folder records (per-mailbox metadata) and the in-memory store
//! - [`sqlite`]: folder records in sqlite
//! - [`messages`]: message snapshots and the in-memory store
//! - [`maildir`]: messages in Maildir format with atomic writes

pub mod maildir;
pub mod messages;
pub mod records;
pub mod sqlite;

pub use maildir::MaildirMessageStore;
pub use messages::{MemoryMessageStore, MessageStore};
pub use records::{FolderRecord, FolderRecordStore, MemoryRecordStore};
pub use sqlite::SqliteRecordStore;
