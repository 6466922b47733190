use anyhow::Context;
use clap::Parser;
use mail_core::config::{Config, LoggingConfig, StorageBackend};
use mail_core::host::MailboxHost;
use mail_core::imap::{CommandRegistry, ImapServer};
use mail_core::namespace::Namespace;
use mail_core::smtp::handlers::LoggingSubmission;
use mail_core::smtp::{build_chain, HandlerServices, SmtpServer};
use mail_core::storage::{
    FolderRecordStore, MaildirMessageStore, MemoryMessageStore, MemoryRecordStore, MessageStore,
    SqliteRecordStore,
};
use mail_core::users::{MemoryUsersRepository, SqliteUsersRepository, UsersRepository};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mail-core")]
#[command(about = "IMAP and SMTP mail server", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format.as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.pretty().init(),
    }
}

type Stores = (
    Arc<dyn FolderRecordStore>,
    Arc<dyn MessageStore>,
    Arc<dyn UsersRepository>,
);

async fn open_stores(config: &Config) -> anyhow::Result<Stores> {
    match config.storage.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; nothing survives a restart");
            Ok((
                Arc::new(MemoryRecordStore::new()),
                Arc::new(MemoryMessageStore::new()),
                Arc::new(MemoryUsersRepository::new()),
            ))
        }
        StorageBackend::Sqlite => {
            let url = &config.storage.database_url;
            let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
            let pool = SqlitePool::connect_with(options)
                .await
                .with_context(|| format!("opening database {}", url))?;
            let records = SqliteRecordStore::with_pool(pool.clone()).await?;
            let users = SqliteUsersRepository::with_pool(pool).await?;
            Ok((
                Arc::new(records),
                Arc::new(MaildirMessageStore::new(&config.storage.maildir_path)),
                Arc::new(users),
            ))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        Config::from_file(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        Config::default()
    };
    init_logging(&config.logging);

    info!("Starting mail-core server");
    if !cli.config.exists() {
        info!("No config file at {}, using defaults", cli.config.display());
    }
    info!("  SMTP listening on: {}", config.smtp.listen_addr);
    info!("  IMAP listening on: {}", config.imap.listen_addr);
    info!("  Domain: {}", config.server.domain);

    let config = Arc::new(config);
    let (records, messages, users) = open_stores(&config).await?;
    let host = Arc::new(
        MailboxHost::new(
            records,
            messages,
            users,
            Namespace::new(config.imap.hierarchy_delimiter),
        )
        .await?,
    );

    let services = HandlerServices {
        config: Arc::clone(&config),
        host: Arc::clone(&host),
        submission: Arc::new(LoggingSubmission),
    };
    let chain = Arc::new(build_chain(&services)?);

    let smtp_server = SmtpServer::new(Arc::clone(&config), chain);
    let smtp_handle = tokio::spawn(async move {
        info!("Starting SMTP server...");
        smtp_server.run().await
    });

    let imap_server = ImapServer::new(
        Arc::clone(&config),
        Arc::clone(&host),
        Arc::new(CommandRegistry::standard()),
    );
    let imap_handle = tokio::spawn(async move {
        info!("Starting IMAP server...");
        imap_server.start().await
    });

    // Wait for either server to exit (or error)
    tokio::select! {
        result = smtp_handle => {
            match result {
                Ok(Ok(())) => info!("SMTP server exited successfully"),
                Ok(Err(e)) => error!("SMTP server error: {}", e),
                Err(e) => error!("SMTP task panic: {}", e),
            }
        }
        result = imap_handle => {
            match result {
                Ok(Ok(())) => info!("IMAP server exited successfully"),
                Ok(Err(e)) => error!("IMAP server error: {}", e),
                Err(e) => error!("IMAP task panic: {}", e),
            }
        }
    }

    Ok(())
}
