use std::fmt;
use thiserror::Error;

/// Why a mailbox lookup came back empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundStatus {
    /// Never created here (or lives on another server)
    NotLocal,
    /// A folder record exists but is tombstoned
    LocalButDeleted,
}

impl fmt::Display for NotFoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundStatus::NotLocal => write!(f, "not local"),
            NotFoundStatus::LocalButDeleted => write!(f, "local but deleted"),
        }
    }
}

#[derive(Error, Debug)]
pub enum MailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Mailbox not found: {name} ({status})")]
    MailboxNotFound {
        name: String,
        status: NotFoundStatus,
    },

    #[error("Mailbox already exists: {0}")]
    AlreadyExists(String),

    #[error("Mailbox in use: {0}")]
    MailboxInUse(String),

    /// A well-formed request the server declines to carry out
    #[error("{0}")]
    Rejected(String),

    #[error("Protocol syntax error: {0}")]
    ProtocolSyntax(String),

    #[error("SMTP protocol error: {0}")]
    SmtpProtocol(String),

    #[error("Authentication failed")]
    AuthenticationFailed,
}

impl MailError {
    pub fn not_local(name: impl Into<String>) -> Self {
        MailError::MailboxNotFound {
            name: name.into(),
            status: NotFoundStatus::NotLocal,
        }
    }

    pub fn deleted(name: impl Into<String>) -> Self {
        MailError::MailboxNotFound {
            name: name.into(),
            status: NotFoundStatus::LocalButDeleted,
        }
    }

    pub fn syntax(reason: impl Into<String>) -> Self {
        MailError::ProtocolSyntax(reason.into())
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        MailError::Rejected(reason.into())
    }

    /// Errors that leave the connection unusable
    pub fn is_fatal(&self) -> bool {
        matches!(self, MailError::Io(_))
    }

    /// The not-found sub-status, if this is a lookup failure
    pub fn not_found_status(&self) -> Option<NotFoundStatus> {
        match self {
            MailError::MailboxNotFound { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MailError>;
