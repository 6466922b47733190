//! IMAP connection: request tokenizer and response writer
//!
//! Arguments are pulled from the stream while a command parses them, so a
//! literal (`{n}`) is only read once the command asks for it. The
//! continuation prompt is sent right before the bytes are read.

use crate::config::ImapConfig;
use crate::error::{MailError, Result};
use crate::namespace::INBOX;
use std::io;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tokio::time::timeout;
use tracing::debug;

type Reader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type Writer = BufWriter<Box<dyn AsyncWrite + Send + Unpin>>;

pub struct ImapConnection {
    reader: Reader,
    writer: Writer,
    line: Vec<u8>,
    pos: usize,
    idle_timeout: Duration,
    max_line_length: usize,
    max_literal_size: usize,
}

impl ImapConnection {
    pub fn new<R, W>(reader: R, writer: W, config: &ImapConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: BufReader::new(Box::new(reader)),
            writer: BufWriter::new(Box::new(writer)),
            line: Vec::new(),
            pos: 0,
            idle_timeout: config.idle_timeout(),
            max_line_length: config.max_line_length,
            max_literal_size: config.max_literal_size,
        }
    }

    // --- reading ---

    /// Start the next request; `Ok(false)` when the client went away
    pub async fn next_line(&mut self) -> Result<bool> {
        self.read_line().await
    }

    async fn read_line(&mut self) -> Result<bool> {
        self.line.clear();
        self.pos = 0;

        let limit = (self.max_line_length + 2) as u64;
        let mut limited = (&mut self.reader).take(limit);
        let n = timeout(self.idle_timeout, limited.read_until(b'\n', &mut self.line))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "idle timeout"))??;

        if n == 0 {
            return Ok(false);
        }
        if !self.line.ends_with(b"\n") {
            if n as u64 == limit {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long").into());
            }
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated line").into());
        }

        while matches!(self.line.last(), Some(b'\n' | b'\r')) {
            self.line.pop();
        }
        debug!("C: {}", String::from_utf8_lossy(&self.line));
        Ok(true)
    }

    fn peek(&self) -> Option<u8> {
        self.line.get(self.pos).copied()
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(b' ') {
            self.pos += 1;
        }
    }

    pub fn at_end(&mut self) -> bool {
        self.skip_spaces();
        self.pos >= self.line.len()
    }

    /// Next non-space character without consuming it
    pub fn peek_char(&mut self) -> Option<char> {
        self.skip_spaces();
        self.peek().map(char::from)
    }

    /// Fail unless the request line is exhausted
    pub fn end(&mut self) -> Result<()> {
        if self.at_end() {
            Ok(())
        } else {
            Err(MailError::syntax(format!(
                "unexpected characters: {}",
                String::from_utf8_lossy(&self.line[self.pos..])
            )))
        }
    }

    /// Consume one expected character
    pub fn expect(&mut self, c: char) -> Result<()> {
        if self.peek_char() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(MailError::syntax(format!("expected {:?}", c)))
        }
    }

    /// Bare token: everything up to a space, parenthesis, quote or brace
    pub fn atom(&mut self) -> Result<String> {
        self.skip_spaces();
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b <= b' ' || b == 0x7f || matches!(b, b'(' | b')' | b'{' | b'"') {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(MailError::syntax("expected an atom"));
        }
        Ok(String::from_utf8_lossy(&self.line[start..self.pos]).into_owned())
    }

    pub fn tag(&mut self) -> Result<String> {
        let tag = self.atom()?;
        if tag.contains(['+', '*']) {
            return Err(MailError::syntax("invalid tag"));
        }
        Ok(tag)
    }

    fn quoted(&mut self) -> Result<String> {
        self.pos += 1;
        let mut out = Vec::new();
        loop {
            match self.peek() {
                None => return Err(MailError::syntax("unterminated quoted string")),
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    let escaped = self
                        .peek()
                        .ok_or_else(|| MailError::syntax("unterminated quoted string"))?;
                    out.push(escaped);
                    self.pos += 1;
                }
                Some(b) => {
                    out.push(b);
                    self.pos += 1;
                }
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// `{n}` or `{n+}` at the end of the line, followed by n raw bytes
    pub async fn literal(&mut self) -> Result<Vec<u8>> {
        self.skip_spaces();
        if self.peek() != Some(b'{') {
            return Err(MailError::syntax("expected a literal"));
        }
        let close = self.line[self.pos..]
            .iter()
            .position(|&b| b == b'}')
            .map(|idx| self.pos + idx)
            .ok_or_else(|| MailError::syntax("unterminated literal size"))?;
        if close + 1 != self.line.len() {
            return Err(MailError::syntax("literal size must end the line"));
        }

        let spec = String::from_utf8_lossy(&self.line[self.pos + 1..close]).into_owned();
        let (digits, synchronizing) = match spec.strip_suffix('+') {
            Some(digits) => (digits, false),
            None => (spec.as_str(), true),
        };
        let size: usize = digits
            .parse()
            .map_err(|_| MailError::syntax(format!("invalid literal size {:?}", spec)))?;
        if size > self.max_literal_size {
            if !synchronizing {
                // The client sent the bytes without waiting for us
                self.discard_literal(size).await?;
            }
            return Err(MailError::rejected(format!(
                "literal of {} bytes exceeds the {} byte limit",
                size, self.max_literal_size
            )));
        }

        if synchronizing {
            self.continuation("Ready for additional command text").await?;
        }

        let mut bytes = vec![0u8; size];
        timeout(self.idle_timeout, self.reader.read_exact(&mut bytes))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "idle timeout"))??;
        debug!("C: <{} literal bytes>", size);

        // The rest of the command follows on the next line
        if !self.read_line().await? {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "eof after literal").into());
        }
        Ok(bytes)
    }

    /// Skip `size` literal bytes and the rest of the command line
    async fn discard_literal(&mut self, size: usize) -> Result<()> {
        let mut skipped = (&mut self.reader).take(size as u64);
        let n = timeout(self.idle_timeout, tokio::io::copy(&mut skipped, &mut tokio::io::sink()))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "idle timeout"))??;
        debug!("C: <{} literal bytes discarded>", n);
        if n < size as u64 || !self.read_line().await? {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "eof in literal").into());
        }
        self.pos = self.line.len();
        Ok(())
    }

    /// atom, quoted string or literal
    pub async fn astring(&mut self) -> Result<String> {
        match self.peek_char() {
            Some('"') => self.quoted(),
            Some('{') => {
                let bytes = self.literal().await?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            _ => self.atom(),
        }
    }

    /// A mailbox argument; `INBOX` is case-insensitive
    pub async fn mailbox(&mut self) -> Result<String> {
        let name = self.astring().await?;
        if name.eq_ignore_ascii_case(INBOX) {
            Ok(INBOX.to_string())
        } else {
            Ok(name)
        }
    }

    /// `(a b "c")`
    pub async fn paren_list(&mut self) -> Result<Vec<String>> {
        self.expect('(')?;
        let mut items = Vec::new();
        loop {
            match self.peek_char() {
                Some(')') => {
                    self.pos += 1;
                    return Ok(items);
                }
                None => return Err(MailError::syntax("unterminated list")),
                _ => items.push(self.astring().await?),
            }
        }
    }

    /// Remaining tokens with parentheses as tokens of their own
    pub async fn tokens(&mut self) -> Result<Vec<String>> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek_char() {
            if c == '(' || c == ')' {
                self.pos += 1;
                tokens.push(c.to_string());
            } else {
                tokens.push(self.astring().await?);
            }
        }
        Ok(tokens)
    }

    // --- writing ---

    pub async fn untagged(&mut self, text: &str) -> Result<()> {
        debug!("S: * {}", text);
        self.writer.write_all(b"* ").await?;
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        Ok(())
    }

    pub async fn tagged(&mut self, tag: &str, status: &str, text: &str) -> Result<()> {
        debug!("S: {} {} {}", tag, status, text);
        let line = format!("{} {} {}\r\n", tag, status, text);
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn continuation(&mut self, text: &str) -> Result<()> {
        let line = format!("+ {}\r\n", text);
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Pre-rendered response bytes (FETCH data with literals)
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// Render a string as an IMAP quoted string
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt};

    fn config() -> ImapConfig {
        crate::config::Config::default().imap
    }

    #[tokio::test]
    async fn test_tokenizer() {
        let (client, server) = duplex(4096);
        let (read, write) = split(server);
        let mut conn = ImapConnection::new(read, write, &config());
        let (_client_read, mut client_write) = split(client);

        client_write
            .write_all(b"a1 LOGIN \"al\\\"ice\" secret (\\Seen foo)\r\n")
            .await
            .unwrap();

        assert!(conn.next_line().await.unwrap());
        assert_eq!(conn.tag().unwrap(), "a1");
        assert_eq!(conn.atom().unwrap(), "LOGIN");
        assert_eq!(conn.astring().await.unwrap(), "al\"ice");
        assert_eq!(conn.astring().await.unwrap(), "secret");
        assert_eq!(conn.paren_list().await.unwrap(), vec!["\\Seen", "foo"]);
        assert!(conn.end().is_ok());
    }

    #[tokio::test]
    async fn test_synchronizing_literal() {
        let (client, server) = duplex(4096);
        let (read, write) = split(server);
        let mut conn = ImapConnection::new(read, write, &config());
        let (mut client_read, mut client_write) = split(client);

        client_write.write_all(b"a2 APPEND inbox {5}\r\n").await.unwrap();
        assert!(conn.next_line().await.unwrap());
        assert_eq!(conn.tag().unwrap(), "a2");
        assert_eq!(conn.atom().unwrap(), "APPEND");
        assert_eq!(conn.mailbox().await.unwrap(), "INBOX");

        let client = tokio::spawn(async move {
            let mut prompt = [0u8; 37];
            client_read.read_exact(&mut prompt).await.unwrap();
            assert_eq!(&prompt, b"+ Ready for additional command text\r\n");
            client_write.write_all(b"hello\r\n").await.unwrap();
            client_write
        });

        assert_eq!(conn.literal().await.unwrap(), b"hello");
        assert!(conn.end().is_ok());
        drop(client.await.unwrap());
    }

    #[tokio::test]
    async fn test_oversized_non_synchronizing_literal_is_skipped() {
        let (client, server) = duplex(4096);
        let (read, write) = split(server);
        let mut imap = config();
        imap.max_literal_size = 4;
        let mut conn = ImapConnection::new(read, write, &imap);
        let (_client_read, mut client_write) = split(client);

        client_write
            .write_all(b"a3 APPEND inbox {11+}\r\nb1 LOGOUT\r\n\r\na4 NOOP\r\n")
            .await
            .unwrap();

        assert!(conn.next_line().await.unwrap());
        assert_eq!(conn.tag().unwrap(), "a3");
        assert_eq!(conn.atom().unwrap(), "APPEND");
        assert_eq!(conn.mailbox().await.unwrap(), "INBOX");
        assert!(matches!(conn.literal().await, Err(MailError::Rejected(_))));

        assert!(conn.next_line().await.unwrap());
        assert_eq!(conn.tag().unwrap(), "a4");
        assert_eq!(conn.atom().unwrap(), "NOOP");
    }

    #[tokio::test]
    async fn test_end_of_stream() {
        let (client, server) = duplex(64);
        let (read, write) = split(server);
        let mut conn = ImapConnection::new(read, write, &config());
        drop(client);
        assert!(!conn.next_line().await.unwrap());
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("INBOX"), "\"INBOX\"");
        assert_eq!(quote("a\"b\\c"), "\"a\\\"b\\\\c\"");
    }
}
