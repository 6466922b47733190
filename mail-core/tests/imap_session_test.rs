//! IMAP conversations against an in-memory host

use mail_core::config::Config;
use mail_core::host::MailboxHost;
use mail_core::imap::{serve_connection, CommandRegistry};
use mail_core::namespace::Namespace;
use mail_core::storage::{MemoryMessageStore, MemoryRecordStore};
use mail_core::users::MemoryUsersRepository;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

struct Client {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Client {
    async fn line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line.trim_end_matches(['\r', '\n']).to_string()
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Send one command and collect everything up to its tagged reply
    async fn command(&mut self, tag: &str, command: &str) -> Vec<String> {
        self.send_raw(format!("{} {}\r\n", tag, command).as_bytes())
            .await;
        self.until_tagged(tag).await
    }

    async fn until_tagged(&mut self, tag: &str) -> Vec<String> {
        let prefix = format!("{} ", tag);
        let mut lines = Vec::new();
        loop {
            let line = self.line().await;
            let done = line.starts_with(&prefix) || line.is_empty();
            lines.push(line);
            if done {
                return lines;
            }
        }
    }
}

async fn host() -> Arc<MailboxHost> {
    let users = MemoryUsersRepository::new();
    users.add_user("alice", "secret").await.unwrap();
    users.add_user("bob", "hunter2").await.unwrap();
    let host = MailboxHost::new(
        Arc::new(MemoryRecordStore::new()),
        Arc::new(MemoryMessageStore::new()),
        Arc::new(users),
        Namespace::new('.'),
    )
    .await
    .unwrap();
    Arc::new(host)
}

fn connect(host: Arc<MailboxHost>) -> (Client, JoinHandle<()>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (server_reader, server_writer) = tokio::io::split(server);
    let registry = Arc::new(CommandRegistry::standard());
    let config = Config::default().imap;

    let handle = tokio::spawn(async move {
        serve_connection(
            server_reader,
            server_writer,
            "test-peer",
            &host,
            &registry,
            &config,
        )
        .await
        .unwrap();
    });

    let (reader, writer) = tokio::io::split(client);
    (
        Client {
            reader: BufReader::new(reader),
            writer,
        },
        handle,
    )
}

fn last(lines: &[String]) -> &str {
    lines.last().map(String::as_str).unwrap_or_default()
}

#[tokio::test]
async fn test_full_conversation() {
    let host = host().await;
    let (mut client, handle) = connect(Arc::clone(&host));

    assert_eq!(client.line().await, "* OK IMAP4rev1 Service Ready");

    let reply = client.command("a1", "LOGIN alice secret").await;
    assert_eq!(last(&reply), "a1 OK LOGIN completed");

    let reply = client.command("a2", "CREATE Work").await;
    assert_eq!(last(&reply), "a2 OK CREATE completed");

    let reply = client.command("a3", "LIST \"\" *").await;
    assert!(reply.iter().any(|l| l.starts_with("* LIST") && l.ends_with("\"INBOX\"")));
    assert!(reply.iter().any(|l| l.starts_with("* LIST") && l.ends_with("\"Work\"")));
    assert_eq!(last(&reply), "a3 OK LIST completed");

    let content = b"Subject: hello\r\n\r\nBody\r\n";
    client
        .send_raw(format!("a4 APPEND INBOX (\\Seen) {{{}}}\r\n", content.len()).as_bytes())
        .await;
    assert!(client.line().await.starts_with("+ "));
    client.send_raw(content).await;
    client.send_raw(b"\r\n").await;
    let reply = client.until_tagged("a4").await;
    assert_eq!(last(&reply), "a4 OK APPEND completed");

    let reply = client.command("a5", "SELECT INBOX").await;
    assert!(reply.contains(&"* 1 EXISTS".to_string()));
    assert_eq!(last(&reply), "a5 OK [READ-WRITE] SELECT completed");

    let reply = client.command("a6", "FETCH 1 (FLAGS UID)").await;
    assert!(reply[0].starts_with("* 1 FETCH (FLAGS (\\Seen) UID "));
    assert_eq!(last(&reply), "a6 OK FETCH completed");

    let reply = client.command("a7", "STORE 1 +FLAGS (\\Deleted)").await;
    assert!(reply[0].starts_with("* 1 FETCH (FLAGS ("));
    assert!(reply[0].contains("\\Deleted"));

    let reply = client.command("a8", "EXPUNGE").await;
    assert!(reply.contains(&"* 1 EXPUNGE".to_string()));
    assert_eq!(last(&reply), "a8 OK EXPUNGE completed");

    let reply = client.command("a9", "LOGOUT").await;
    assert!(reply[0].starts_with("* BYE"));
    assert_eq!(last(&reply), "a9 OK LOGOUT completed");

    handle.await.unwrap();
    assert!(!host.is_cached("#user.alice.INBOX").await);
}

#[tokio::test]
async fn test_state_and_failure_responses() {
    let host = host().await;
    let (mut client, handle) = connect(host);
    client.line().await;

    let reply = client.command("x1", "SELECT INBOX").await;
    assert_eq!(last(&reply), "x1 BAD Command not valid in this state");

    let reply = client.command("x2", "LOGIN alice wrong").await;
    assert_eq!(last(&reply), "x2 NO LOGIN failed");

    client.command("x3", "LOGIN alice secret").await;

    let reply = client.command("x4", "SELECT Nowhere").await;
    assert_eq!(last(&reply), "x4 NO SELECT failed: Mailbox does not exist");

    let reply = client.command("x5", "CREATE INBOX").await;
    assert_eq!(last(&reply), "x5 NO CREATE failed: Mailbox already exists");

    let reply = client.command("x6", "FETCH 1 FLAGS").await;
    assert_eq!(last(&reply), "x6 BAD Command not valid in this state");

    client.command("x7", "LOGOUT").await;
    handle.await.unwrap();
}

#[tokio::test]
async fn test_other_users_mailboxes_stay_hidden() {
    let host = host().await;
    host.create_user_account("bob").await.unwrap();
    let (mut client, handle) = connect(host);
    client.line().await;
    client.command("y1", "LOGIN alice secret").await;

    let reply = client.command("y2", "SELECT #user.bob.INBOX").await;
    assert_eq!(last(&reply), "y2 NO SELECT failed: Unknown mailbox");

    let reply = client.command("y3", "MYRIGHTS INBOX").await;
    assert!(reply[0].starts_with("* MYRIGHTS \"INBOX\" "));
    assert_eq!(last(&reply), "y3 OK MYRIGHTS completed");

    client.command("y4", "LOGOUT").await;
    handle.await.unwrap();
}

#[tokio::test]
async fn test_uid_commands_address_messages_by_uid() {
    let host = host().await;
    host.create_user_account("alice").await.unwrap();
    for subject in ["one", "two", "three"] {
        host.append(
            "alice",
            "INBOX",
            Vec::new(),
            chrono::Utc::now(),
            format!("Subject: {}\r\n\r\nBody\r\n", subject).into_bytes(),
        )
        .await
        .unwrap();
    }
    let (mut client, handle) = connect(host);
    client.line().await;
    client.command("u1", "LOGIN alice secret").await;

    let reply = client.command("u2", "SELECT INBOX").await;
    assert!(reply.contains(&"* 3 EXISTS".to_string()));

    client.command("u3", "STORE 1 +FLAGS (\\Deleted)").await;
    let reply = client.command("u4", "EXPUNGE").await;
    assert!(reply.contains(&"* 1 EXPUNGE".to_string()));

    let reply = client.command("u5", "UID FETCH 1:* (UID)").await;
    assert_eq!(
        reply,
        vec![
            "* 1 FETCH (UID 2)",
            "* 2 FETCH (UID 3)",
            "u5 OK UID FETCH completed",
        ]
    );

    let reply = client.command("u6", "UID FETCH 3 FLAGS").await;
    assert!(reply[0].starts_with("* 2 FETCH (UID 3 FLAGS ("));
    assert_eq!(last(&reply), "u6 OK UID FETCH completed");

    let reply = client.command("u7", "UID FETCH 1 FLAGS").await;
    assert_eq!(reply, vec!["u7 OK UID FETCH completed"]);

    let reply = client.command("u8", "UID LOGIN alice secret").await;
    assert!(last(&reply).starts_with("u8 BAD "));
    let reply = client.command("u9", "UID SEARCH ALL").await;
    assert!(last(&reply).starts_with("u9 BAD "));

    let reply = client.command("u10", "LOGIN alice secret").await;
    assert_eq!(last(&reply), "u10 BAD Command not valid in this state");

    client.command("u11", "LOGOUT").await;
    handle.await.unwrap();
}
