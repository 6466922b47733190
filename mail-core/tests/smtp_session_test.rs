//! SMTP conversations through the stock handler chain

use async_trait::async_trait;
use mail_core::config::Config;
use mail_core::host::MailboxHost;
use mail_core::namespace::Namespace;
use mail_core::smtp::handler::{ConnectHandler, Mail, MessageHook, SmtpHandler};
use mail_core::smtp::handlers::{
    CommandDispatcher, DataHandler, HeloHandler, MailHandler, RcptHandler, RemoteDelivery,
    WelcomeHandler,
};
use mail_core::smtp::{
    build_chain, serve_connection, HandlerChain, HandlerServices, MailSubmission, SmtpResponse,
    SmtpSession,
};
use mail_core::storage::{MemoryMessageStore, MemoryRecordStore};
use mail_core::users::MemoryUsersRepository;
use mail_core::Result;
use mockall::mock;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

mock! {
    Submission {}

    #[async_trait]
    impl MailSubmission for Submission {
        async fn submit(&self, mail: &Mail) -> Result<()>;
    }
}

struct Client {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Client {
    /// One reply, following `-` continuation lines
    async fn reply(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).await.unwrap() == 0 {
                return lines;
            }
            let line = line.trim_end_matches(['\r', '\n']).to_string();
            let more = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line);
            if !more {
                return lines;
            }
        }
    }

    async fn send(&mut self, text: &str) -> Vec<String> {
        self.writer
            .write_all(format!("{}\r\n", text).as_bytes())
            .await
            .unwrap();
        self.writer.flush().await.unwrap();
        self.reply().await
    }

    async fn code(&mut self, text: &str) -> u16 {
        let reply = self.send(text).await;
        reply[0][..3].parse().unwrap()
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.server.domain = "example.com".to_string();
    config.server.hostname = "mx.example.com".to_string();
    config.smtp.max_recipients = 2;
    config.smtp.handlers = vec!["valid-rcpt".to_string(), "max-rcpt".to_string()];
    config
}

async fn host() -> Arc<MailboxHost> {
    let users = MemoryUsersRepository::new();
    users.add_user("alice", "secret").await.unwrap();
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

fn connect(chain: HandlerChain, config: Config) -> (Client, JoinHandle<()>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (server_reader, server_writer) = tokio::io::split(server);

    let handle = tokio::spawn(async move {
        serve_connection(
            server_reader,
            server_writer,
            "198.51.100.4:40000",
            &config.server.hostname,
            &chain,
            &config.smtp,
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

#[tokio::test]
async fn test_local_and_remote_delivery() {
    let host = host().await;
    let mut submission = MockSubmission::new();
    submission
        .expect_submit()
        .withf(|mail| {
            mail.recipients == vec!["bob@remote.example".to_string()]
                && mail.sender == "sender@remote.example"
        })
        .times(1)
        .returning(|_| Ok(()));

    let config = config();
    let services = HandlerServices {
        config: Arc::new(config.clone()),
        host: Arc::clone(&host),
        submission: Arc::new(submission),
    };
    let chain = build_chain(&services).unwrap();
    let (mut client, handle) = connect(chain, config);

    assert_eq!(client.reply().await, vec!["220 mx.example.com ESMTP Service Ready"]);

    let ehlo = client.send("EHLO client.example.org").await;
    assert_eq!(ehlo[0], "250-mx.example.com Hello client.example.org");
    assert_eq!(ehlo.last().unwrap(), "250 HELP");

    assert_eq!(client.code("MAIL FROM:<sender@remote.example>").await, 250);
    assert_eq!(client.code("RCPT TO:<alice@example.com>").await, 250);
    assert_eq!(client.code("RCPT TO:<nobody@example.com>").await, 550);
    assert_eq!(client.code("RCPT TO:<bob@remote.example>").await, 250);
    assert_eq!(
        client.send("RCPT TO:<carol@remote.example>").await,
        vec!["452 Too many recipients (max 2)"]
    );

    assert_eq!(client.code("DATA").await, 354);
    client
        .writer
        .write_all(b"Subject: hi\r\n\r\n..dotted\r\nHello\r\n")
        .await
        .unwrap();
    assert_eq!(client.send(".").await, vec!["250 OK: Message accepted"]);

    assert_eq!(client.code("QUIT").await, 221);
    handle.await.unwrap();

    let inbox = host.get("alice", "INBOX").await.unwrap();
    assert_eq!(inbox.exists(), 1);
    host.release("alice", Some(inbox)).await.unwrap();
}

#[tokio::test]
async fn test_command_sequencing() {
    let host = host().await;
    let mut submission = MockSubmission::new();
    submission.expect_submit().times(0);

    let config = config();
    let services = HandlerServices {
        config: Arc::new(config.clone()),
        host,
        submission: Arc::new(submission),
    };
    let (mut client, handle) = connect(build_chain(&services).unwrap(), config);
    client.reply().await;

    assert_eq!(client.code("MAIL FROM:<a@b.example>").await, 503);
    assert_eq!(client.code("HELO").await, 501);
    assert_eq!(client.code("HELO client.example.org").await, 250);
    assert_eq!(client.code("RCPT TO:<alice@example.com>").await, 503);
    assert_eq!(client.code("MAIL FROM:<a@b.example>").await, 250);
    assert_eq!(client.code("DATA").await, 503);
    assert_eq!(client.code("RCPT TO:<>").await, 501);
    assert_eq!(client.code("BOGUS").await, 502);
    assert_eq!(client.code("RSET").await, 250);
    assert_eq!(client.code("RCPT TO:<alice@example.com>").await, 503);
    assert_eq!(client.code("NOOP").await, 250);
    assert_eq!(client.code("VRFY alice").await, 252);
    assert_eq!(client.send("HELP").await.len(), 3);
    assert_eq!(client.code("QUIT").await, 221);

    handle.await.unwrap();
}

#[tokio::test]
async fn test_too_many_errors_closes_connection() {
    let mut config = config();
    config.smtp.max_errors = 2;
    let services = HandlerServices {
        config: Arc::new(config.clone()),
        host: host().await,
        submission: Arc::new(MockSubmission::new()),
    };
    let (mut client, handle) = connect(build_chain(&services).unwrap(), config);
    client.reply().await;

    assert_eq!(client.code("BOGUS").await, 502);
    assert_eq!(
        client.send("BOGUS").await,
        vec!["502 Command not implemented"]
    );
    assert_eq!(
        client.reply().await,
        vec!["421 Too many errors, closing connection"]
    );
    handle.await.unwrap();
}

/// Refuses every message
struct Refuse;

impl SmtpHandler for Refuse {
    fn name(&self) -> &'static str {
        "refuse"
    }

    fn as_message_hook(self: Arc<Self>) -> Option<Arc<dyn MessageHook>> {
        Some(self)
    }
}

#[async_trait]
impl MessageHook for Refuse {
    async fn on_message(
        &self,
        _session: &SmtpSession,
        _mail: &mut Mail,
    ) -> Result<Option<SmtpResponse>> {
        Ok(Some(SmtpResponse::new(554, "Transaction failed")))
    }
}

#[tokio::test]
async fn test_message_hook_stops_later_hooks() {
    let mut submission = MockSubmission::new();
    submission.expect_submit().times(0);

    let handlers: Vec<Arc<dyn SmtpHandler>> = vec![
        Arc::new(WelcomeHandler),
        Arc::new(CommandDispatcher::default()),
        Arc::new(HeloHandler { extended: false }),
        Arc::new(MailHandler),
        Arc::new(RcptHandler::default()),
        Arc::new(DataHandler::default()),
        Arc::new(Refuse),
        Arc::new(RemoteDelivery {
            submission: Arc::new(submission),
        }),
    ];
    let chain = HandlerChain::new(handlers).unwrap();
    let (mut client, _handle) = connect(chain, config());
    client.reply().await;

    client.send("HELO client.example.org").await;
    client.send("MAIL FROM:<a@b.example>").await;
    client.send("RCPT TO:<someone@remote.example>").await;
    assert_eq!(client.code("DATA").await, 354);
    client.writer.write_all(b"Subject: no\r\n").await.unwrap();
    assert_eq!(client.send(".").await, vec!["554 Transaction failed"]);
}

/// Connect handler that logs its name and answers with a fixed response
struct Greeter {
    name: &'static str,
    log: Arc<parking_lot::Mutex<Vec<&'static str>>>,
    response: Option<SmtpResponse>,
}

impl SmtpHandler for Greeter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn as_connect_handler(self: Arc<Self>) -> Option<Arc<dyn ConnectHandler>> {
        Some(self)
    }
}

#[async_trait]
impl ConnectHandler for Greeter {
    async fn on_connect(&self, _session: &mut SmtpSession) -> Result<Option<SmtpResponse>> {
        self.log.lock().push(self.name);
        Ok(self.response.clone())
    }
}

#[tokio::test]
async fn test_ending_connect_handler_stops_the_rest() {
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let greeter = |name: &'static str, response: Option<SmtpResponse>| -> Arc<dyn SmtpHandler> {
        Arc::new(Greeter {
            name,
            log: Arc::clone(&log),
            response,
        })
    };
    let handlers: Vec<Arc<dyn SmtpHandler>> = vec![
        greeter("first", Some(SmtpResponse::new(220, "first"))),
        greeter(
            "second",
            Some(SmtpResponse::new(554, "No SMTP service here").ending()),
        ),
        greeter("third", Some(SmtpResponse::new(220, "third"))),
        Arc::new(CommandDispatcher::default()),
    ];
    let chain = HandlerChain::new(handlers).unwrap();
    let (mut client, handle) = connect(chain, config());

    assert_eq!(client.reply().await, vec!["220 first"]);
    assert_eq!(client.reply().await, vec!["554 No SMTP service here"]);

    // The session ends while the client still has its side open
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("session should end without reading a command")
        .unwrap();
    assert!(client.reply().await.is_empty());
    assert_eq!(*log.lock(), vec!["first", "second"]);
}
