//! LIST pattern matching and STATUS items

use crate::error::{MailError, Result};
use std::fmt;

pub const NOSELECT: &str = "\\Noselect";
pub const MARKED: &str = "\\Marked";
pub const UNMARKED: &str = "\\Unmarked";

/// A mailbox pattern with at most one trailing wildcard
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ListPattern {
    /// No wildcard: the name itself
    Exact(String),
    /// `*`: the prefix followed by anything
    Any(String),
    /// `%`: the prefix followed by anything but the delimiter
    Level(String),
}

impl ListPattern {
    /// Split a pattern; `None` when a wildcard sits anywhere but the end
    pub fn parse(pattern: &str) -> Option<(String, Option<char>)> {
        match pattern.find(['*', '%']) {
            None => Some((pattern.to_string(), None)),
            Some(idx) if idx == pattern.len() - 1 => {
                let wildcard = pattern[idx..].chars().next()?;
                Some((pattern[..idx].to_string(), Some(wildcard)))
            }
            Some(_) => None,
        }
    }

    pub fn new(absolute_prefix: String, wildcard: Option<char>) -> Self {
        match wildcard {
            Some('*') => ListPattern::Any(absolute_prefix),
            Some(_) => ListPattern::Level(absolute_prefix),
            None => ListPattern::Exact(absolute_prefix),
        }
    }

    pub fn matches(&self, name: &str, delimiter: char) -> bool {
        match self {
            ListPattern::Exact(exact) => name == exact,
            ListPattern::Any(prefix) => name.starts_with(prefix.as_str()),
            ListPattern::Level(prefix) => name
                .strip_prefix(prefix.as_str())
                .map(|rest| !rest.contains(delimiter))
                .unwrap_or(false),
        }
    }
}

/// One line of a LIST/LSUB result, name still absolute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub attributes: Vec<&'static str>,
    pub delimiter: char,
    pub name: String,
}

impl ListEntry {
    pub fn is_selectable(&self) -> bool {
        !self.attributes.contains(&NOSELECT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusItem {
    Messages,
    Recent,
    UidNext,
    UidValidity,
    Unseen,
}

impl StatusItem {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MESSAGES" => Ok(StatusItem::Messages),
            "RECENT" => Ok(StatusItem::Recent),
            "UIDNEXT" => Ok(StatusItem::UidNext),
            "UIDVALIDITY" => Ok(StatusItem::UidValidity),
            "UNSEEN" => Ok(StatusItem::Unseen),
            other => Err(MailError::syntax(format!("unknown status item {}", other))),
        }
    }
}

impl fmt::Display for StatusItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusItem::Messages => "MESSAGES",
            StatusItem::Recent => "RECENT",
            StatusItem::UidNext => "UIDNEXT",
            StatusItem::UidValidity => "UIDVALIDITY",
            StatusItem::Unseen => "UNSEEN",
        };
        f.write_str(name)
    }
}

/// Counter snapshot read from a live mailbox or its record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct StatusValues {
    pub messages: u32,
    pub recent: u32,
    pub uid_next: u32,
    pub uid_validity: u32,
    pub unseen: u32,
}

impl StatusValues {
    /// `MESSAGES 2 UNSEEN 1`, in the order requested
    pub fn render(&self, items: &[StatusItem]) -> String {
        items
            .iter()
            .map(|item| {
                let value = match item {
                    StatusItem::Messages => self.messages,
                    StatusItem::Recent => self.recent,
                    StatusItem::UidNext => self.uid_next,
                    StatusItem::UidValidity => self.uid_validity,
                    StatusItem::Unseen => self.unseen,
                };
                format!("{} {}", item, value)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pattern() {
        assert_eq!(
            ListPattern::parse("Work*"),
            Some(("Work".to_string(), Some('*')))
        );
        assert_eq!(ListPattern::parse("INBOX"), Some(("INBOX".to_string(), None)));
        assert_eq!(ListPattern::parse("%"), Some((String::new(), Some('%'))));
        assert_eq!(ListPattern::parse("W*rk"), None);
        assert_eq!(ListPattern::parse("*.Q1"), None);
    }

    #[test]
    fn test_wildcard_depth() {
        let any = ListPattern::new("#user.alice.Work".to_string(), Some('*'));
        assert!(any.matches("#user.alice.Work", '.'));
        assert!(any.matches("#user.alice.Work.Q1.Jan", '.'));
        assert!(!any.matches("#user.alice.INBOX", '.'));

        let level = ListPattern::new("#user.alice.Work.".to_string(), Some('%'));
        assert!(level.matches("#user.alice.Work.Q1", '.'));
        assert!(!level.matches("#user.alice.Work.Q1.Jan", '.'));
    }

    #[test]
    fn test_status_render() {
        let values = StatusValues {
            messages: 3,
            recent: 1,
            uid_next: 4,
            uid_validity: 42,
            unseen: 2,
        };
        let items = [StatusItem::Unseen, StatusItem::Messages];
        assert_eq!(values.render(&items), "UNSEEN 2 MESSAGES 3");
        assert!(StatusItem::parse("bogus").is_err());
        assert_eq!(StatusItem::parse("uidnext").unwrap(), StatusItem::UidNext);
    }
}
