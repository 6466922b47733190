//! Message search criteria

use super::message::{Message, ANSWERED, DELETED, FLAGGED, SEEN};
use super::sequence::SequenceSet;

/// Search criteria for IMAP SEARCH command
#[derive(Debug, Clone, PartialEq)]
pub enum SearchCriteria {
    /// ALL - All messages
    All,
    Seen,
    Unseen,
    Deleted,
    Undeleted,
    Flagged,
    Answered,
    /// RECENT - delivered since the last session looked
    Recent,
    /// NEW - recent and unseen
    New,
    /// SUBJECT string - Messages with string in subject
    Subject(String),
    /// FROM string - Messages from sender
    From(String),
    /// TO string - Messages to recipient
    To(String),
    /// BODY string - Messages with string in body
    Body(String),
    /// TEXT string - Messages with string in body or headers
    Text(String),
    /// UID set
    Uid(SequenceSet),
    /// Bare sequence set
    Sequence(SequenceSet),
    Not(Box<SearchCriteria>),
    /// Every criterion must match (a space-separated search key list)
    And(Vec<SearchCriteria>),
}

/// What a criterion can see of a message besides its bytes
pub struct SearchContext {
    pub sequence: u32,
    pub message_count: u32,
    pub max_uid: u32,
    pub recent: bool,
}

impl SearchCriteria {
    pub fn matches(&self, msg: &Message, ctx: &SearchContext) -> bool {
        match self {
            SearchCriteria::All => true,
            SearchCriteria::Seen => msg.has_flag(SEEN),
            SearchCriteria::Unseen => !msg.has_flag(SEEN),
            SearchCriteria::Deleted => msg.has_flag(DELETED),
            SearchCriteria::Undeleted => !msg.has_flag(DELETED),
            SearchCriteria::Flagged => msg.has_flag(FLAGGED),
            SearchCriteria::Answered => msg.has_flag(ANSWERED),
            SearchCriteria::Recent => ctx.recent,
            SearchCriteria::New => ctx.recent && !msg.has_flag(SEEN),
            SearchCriteria::Subject(query) => header_contains(msg, "Subject", query),
            SearchCriteria::From(query) => header_contains(msg, "From", query),
            SearchCriteria::To(query) => header_contains(msg, "To", query),
            SearchCriteria::Body(query) => contains_ignore_case(msg.body(), query),
            SearchCriteria::Text(query) => contains_ignore_case(&msg.content, query),
            SearchCriteria::Uid(set) => set.contains(msg.uid, ctx.max_uid),
            SearchCriteria::Sequence(set) => set.contains(ctx.sequence, ctx.message_count),
            SearchCriteria::Not(inner) => !inner.matches(msg, ctx),
            SearchCriteria::And(all) => all.iter().all(|c| c.matches(msg, ctx)),
        }
    }
}

fn header_contains(msg: &Message, name: &str, query: &str) -> bool {
    msg.header_value(name)
        .unwrap_or_default()
        .to_lowercase()
        .contains(&query.to_lowercase())
}

fn contains_ignore_case(haystack: &[u8], query: &str) -> bool {
    String::from_utf8_lossy(haystack)
        .to_lowercase()
        .contains(&query.to_lowercase())
}
