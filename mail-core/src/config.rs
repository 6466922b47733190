use crate::error::{MailError, Result};
use crate::namespace::NAMESPACE_TOKEN;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub smtp: SmtpConfig,
    pub imap: ImapConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub domain: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmtpConfig {
    pub listen_addr: String,
    pub max_message_size: usize,
    pub max_recipients: usize,
    pub max_line_length: usize,
    pub max_errors: usize,
    pub command_timeout_secs: u64,
    pub data_timeout_secs: u64,
    /// Extension handlers wired after the core package, by name
    #[serde(default)]
    pub handlers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImapConfig {
    pub listen_addr: String,
    pub idle_timeout_secs: u64,
    pub hierarchy_delimiter: char,
    pub max_line_length: usize,
    pub max_errors: usize,
    /// Largest literal (APPEND message) accepted
    #[serde(default = "default_max_literal_size")]
    pub max_literal_size: usize,
}

fn default_max_literal_size() -> usize {
    25 * 1024 * 1024
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: String,
    pub maildir_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl SmtpConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn data_timeout(&self) -> Duration {
        Duration::from_secs(self.data_timeout_secs)
    }
}

impl ImapConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MailError::Config(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| MailError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the mailbox namespace cannot work with
    pub fn validate(&self) -> Result<()> {
        let delimiter = self.imap.hierarchy_delimiter;
        if delimiter == NAMESPACE_TOKEN || delimiter.is_whitespace() || delimiter == '"' {
            return Err(MailError::Config(format!(
                "invalid hierarchy delimiter {:?}",
                delimiter
            )));
        }
        if self.smtp.max_line_length == 0 || self.imap.max_line_length == 0 {
            return Err(MailError::Config("line length limits must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                domain: "localhost".to_string(),
                hostname: gethostname::gethostname().to_string_lossy().to_string(),
            },
            smtp: SmtpConfig {
                listen_addr: "0.0.0.0:2525".to_string(),
                max_message_size: 10 * 1024 * 1024, // 10MB
                max_recipients: 100,
                max_line_length: 1000,
                max_errors: 10,
                command_timeout_secs: 300,
                data_timeout_secs: 600,
                handlers: Vec::new(),
            },
            imap: ImapConfig {
                listen_addr: "0.0.0.0:1143".to_string(),
                idle_timeout_secs: 30 * 60,
                hierarchy_delimiter: '.',
                max_line_length: 8192,
                max_errors: 10,
                max_literal_size: default_max_literal_size(),
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                database_url: "sqlite://mail.db".to_string(),
                maildir_path: "/tmp/maildir".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_delimiter_cannot_be_namespace_token() {
        let mut config = Config::default();
        config.imap.hierarchy_delimiter = '#';
        assert!(matches!(config.validate(), Err(MailError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.smtp.handlers = vec!["max-rcpt".to_string()];
        config.storage.backend = StorageBackend::Sqlite;
        std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.smtp.handlers, vec!["max-rcpt".to_string()]);
        assert_eq!(loaded.storage.backend, StorageBackend::Sqlite);
        assert_eq!(loaded.imap.hierarchy_delimiter, '.');
    }
}
