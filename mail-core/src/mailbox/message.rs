use chrono::{DateTime, Utc};

pub const SEEN: &str = "\\Seen";
pub const ANSWERED: &str = "\\Answered";
pub const FLAGGED: &str = "\\Flagged";
pub const DELETED: &str = "\\Deleted";
pub const DRAFT: &str = "\\Draft";

/// Flags the server accepts without keyword support being involved
pub const SYSTEM_FLAGS: [&str; 5] = [SEEN, ANSWERED, FLAGGED, DELETED, DRAFT];

/// Map a client-supplied flag onto its canonical spelling
pub fn normalize_flag(flag: &str) -> String {
    SYSTEM_FLAGS
        .iter()
        .find(|system| system.eq_ignore_ascii_case(flag))
        .map(|system| system.to_string())
        .unwrap_or_else(|| flag.to_string())
}

/// One stored message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub uid: u32,
    /// Message flags (e.g., \Seen, \Flagged)
    pub flags: Vec<String>,
    pub internal_date: DateTime<Utc>,
    /// RFC822 message content
    pub content: Vec<u8>,
}

impl Message {
    pub fn new(uid: u32, flags: Vec<String>, internal_date: DateTime<Utc>, content: Vec<u8>) -> Self {
        Self {
            uid,
            flags,
            internal_date,
            content,
        }
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case(flag))
    }

    pub fn add_flag(&mut self, flag: &str) -> bool {
        if self.has_flag(flag) {
            return false;
        }
        self.flags.push(normalize_flag(flag));
        true
    }

    pub fn remove_flag(&mut self, flag: &str) -> bool {
        let before = self.flags.len();
        self.flags.retain(|f| !f.eq_ignore_ascii_case(flag));
        before != self.flags.len()
    }

    /// Header block including the blank separator line
    pub fn header(&self) -> &[u8] {
        &self.content[..self.body_offset()]
    }

    pub fn body(&self) -> &[u8] {
        &self.content[self.body_offset()..]
    }

    fn body_offset(&self) -> usize {
        let content = &self.content;
        if let Some(pos) = content.windows(4).position(|w| w == b"\r\n\r\n") {
            return pos + 4;
        }
        if let Some(pos) = content.windows(2).position(|w| w == b"\n\n") {
            return pos + 2;
        }
        content.len()
    }

    /// Extract header value (first occurrence, unfolded on one line)
    pub fn header_value(&self, name: &str) -> Option<String> {
        let header = String::from_utf8_lossy(self.header());
        for line in header.lines() {
            if let Some((key, value)) = line.split_once(':') {
                if key.trim().eq_ignore_ascii_case(name) {
                    return Some(value.trim().to_string());
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(content: &str) -> Message {
        Message::new(1, Vec::new(), Utc::now(), content.as_bytes().to_vec())
    }

    #[test]
    fn test_header_and_body() {
        let msg = message("Subject: Test 1\r\nFrom: a@b.c\r\n\r\nBody 1");
        assert_eq!(msg.header(), b"Subject: Test 1\r\nFrom: a@b.c\r\n\r\n");
        assert_eq!(msg.body(), b"Body 1");
        assert_eq!(msg.header_value("subject").as_deref(), Some("Test 1"));
        assert_eq!(msg.header_value("To"), None);
    }

    #[test]
    fn test_flags() {
        let mut msg = message("Subject: x\r\n\r\n");
        assert!(msg.add_flag("\\seen"));
        assert!(!msg.add_flag("\\Seen"));
        assert_eq!(msg.flags, vec!["\\Seen".to_string()]);
        assert!(msg.remove_flag("\\SEEN"));
        assert!(msg.flags.is_empty());
    }

    #[test]
    fn test_normalize_keeps_keywords() {
        assert_eq!(normalize_flag("\\flagged"), "\\Flagged");
        assert_eq!(normalize_flag("$Junk"), "$Junk");
    }
}
