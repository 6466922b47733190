//! Mailbox namespace resolution
//!
//! Every mailbox has one absolute name: the namespace token, the user
//! namespace prefix and the owner, joined by the hierarchy delimiter
//! (`#user.alice.INBOX`). Clients see names relative to their own root.

use crate::error::{MailError, Result};

/// First character of every absolute name
pub const NAMESPACE_TOKEN: char = '#';

/// Prefix of the per-user namespace
pub const USER_NAMESPACE_PREFIX: &str = "#user";

pub const DEFAULT_DELIMITER: char = '.';

pub const INBOX: &str = "INBOX";

/// Translates between user-relative and absolute mailbox names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Namespace {
    delimiter: char,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new(DEFAULT_DELIMITER)
    }
}

impl Namespace {
    pub fn new(delimiter: char) -> Self {
        Self { delimiter }
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// `#user.<user>`
    pub fn user_root(&self, user: &str) -> String {
        format!("{}{}{}", USER_NAMESPACE_PREFIX, self.delimiter, user)
    }

    /// Resolve a user-relative (or already absolute) name
    pub fn to_absolute(&self, user: &str, name: &str) -> Result<String> {
        if name.starts_with(NAMESPACE_TOKEN) {
            self.validate(name)?;
            return Ok(name.to_string());
        }
        if user.is_empty() || user.contains(self.delimiter) {
            return Err(MailError::syntax(format!("invalid user identity {:?}", user)));
        }
        if name.is_empty() {
            return Err(MailError::syntax("empty mailbox name"));
        }

        let absolute = format!("{}{}{}", self.user_root(user), self.delimiter, name);
        self.validate(&absolute)?;
        Ok(absolute)
    }

    /// Strip the `#user.<user>.` prefix for display
    pub fn to_user_relative(&self, user: &str, absolute: &str) -> String {
        let prefix = format!("{}{}", self.user_root(user), self.delimiter);
        match absolute.strip_prefix(&prefix) {
            Some(relative) => relative.to_string(),
            None => absolute.to_string(),
        }
    }

    /// The enclosing mailbox, `None` at the namespace root
    pub fn parent<'a>(&self, absolute: &'a str) -> Option<&'a str> {
        absolute.rsplit_once(self.delimiter).map(|(parent, _)| parent)
    }

    /// Number of delimiters in the name
    pub fn depth(&self, absolute: &str) -> usize {
        absolute.matches(self.delimiter).count()
    }

    /// All proper ancestors, shallowest first
    pub fn ancestors(&self, absolute: &str) -> Vec<String> {
        let mut ancestors = Vec::new();
        let mut current = absolute;
        while let Some(parent) = self.parent(current) {
            ancestors.push(parent.to_string());
            current = parent;
        }
        ancestors.reverse();
        ancestors
    }

    pub fn is_descendant(&self, absolute: &str, ancestor: &str) -> bool {
        absolute.len() > ancestor.len() + 1
            && absolute.starts_with(ancestor)
            && absolute[ancestor.len()..].starts_with(self.delimiter)
    }

    /// Replace the `old` prefix of a descendant (or of `old` itself) by `new`
    pub fn reparent(&self, absolute: &str, old: &str, new: &str) -> Option<String> {
        if absolute == old {
            Some(new.to_string())
        } else if self.is_descendant(absolute, old) {
            Some(format!("{}{}", new, &absolute[old.len()..]))
        } else {
            None
        }
    }

    fn validate(&self, absolute: &str) -> Result<()> {
        if absolute.split(self.delimiter).any(str::is_empty) {
            return Err(MailError::syntax(format!(
                "malformed mailbox name {:?}",
                absolute
            )));
        }
        Ok(())
    }
}
