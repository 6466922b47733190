//! CLI tool for managing mail accounts
//!
//! Accounts are kept in the same sqlite database as the folder records, so
//! adding a user also creates their personal hierarchy and INBOX.
//!
//! # Usage
//!
//! ```bash
//! mail-user --db sqlite://mail.db add alice password123
//! mail-user --db sqlite://mail.db delete alice
//! mail-user --db sqlite://mail.db list
//! mail-user --db sqlite://mail.db exists alice
//! ```

use clap::{Parser, Subcommand};
use mail_core::host::MailboxHost;
use mail_core::namespace::Namespace;
use mail_core::storage::{MemoryMessageStore, SqliteRecordStore};
use mail_core::users::{SqliteUsersRepository, UsersRepository};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mail-user")]
#[command(about = "Manage mail accounts", long_about = None)]
struct Cli {
    /// Database URL (e.g., sqlite://mail.db)
    #[arg(short, long, default_value = "sqlite://mail.db")]
    db: String,

    /// Hierarchy delimiter the server is configured with
    #[arg(long, default_value_t = '.')]
    delimiter: char,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a new user and create their INBOX
    Add {
        /// Account name
        name: String,
        /// User password
        password: String,
    },
    /// Delete a user (mail folders are kept)
    Delete {
        /// Account name
        name: String,
    },
    /// List all users
    List,
    /// Check if user exists
    Exists {
        /// Account name
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = SqliteConnectOptions::from_str(&cli.db)?.create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;
    let users = Arc::new(SqliteUsersRepository::with_pool(pool.clone()).await?);

    match cli.command {
        Commands::Add { name, password } => {
            println!("Adding user: {}", name);

            if users.contains(&name).await? {
                eprintln!("Error: User {} already exists", name);
                std::process::exit(1);
            }

            users.add_user(&name, &password).await?;

            // Folder records only; message content is written on delivery
            let host = MailboxHost::new(
                Arc::new(SqliteRecordStore::with_pool(pool).await?),
                Arc::new(MemoryMessageStore::new()),
                users.clone(),
                Namespace::new(cli.delimiter),
            )
            .await?;
            host.create_user_account(&name).await?;
            println!("✓ User {} added successfully", name);
        }
        Commands::Delete { name } => {
            println!("Deleting user: {}", name);

            if !users.delete_user(&name).await? {
                eprintln!("Error: User {} does not exist", name);
                std::process::exit(1);
            }
            println!("✓ User {} deleted successfully", name);
        }
        Commands::List => {
            println!("Listing all users...\n");

            let list = users.list_users().await?;

            if list.is_empty() {
                println!("No users found.");
            } else {
                println!("{:<30} {:<20} {:<20}", "Name", "Created At", "Last Login");
                println!("{:-<70}", "");

                for (name, created_at, last_login) in &list {
                    let last_login_str = last_login.as_deref().unwrap_or("Never");
                    println!("{:<30} {:<20} {:<20}", name, created_at, last_login_str);
                }

                println!("\nTotal: {} user(s)", list.len());
            }
        }
        Commands::Exists { name } => {
            if users.contains(&name).await? {
                println!("✓ User {} exists", name);
            } else {
                println!("✗ User {} does not exist", name);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
