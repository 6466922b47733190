//! Access control lists (RFC 2086)

use crate::error::{MailError, Result};
use bitflags::bitflags;
use std::collections::BTreeMap;
use std::fmt;

/// Identity whose rights apply to every user
pub const ANYONE: &str = "anyone";

/// Identity used by local delivery; holds every right and keeps messages recent
pub const MAIL_DELIVERY_AGENT: &str = "#mailer-daemon";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Rights: u16 {
        const LOOKUP = 1 << 0;
        const READ = 1 << 1;
        const KEEP_SEEN = 1 << 2;
        const WRITE = 1 << 3;
        const INSERT = 1 << 4;
        const POST = 1 << 5;
        const CREATE = 1 << 6;
        const DELETE = 1 << 7;
        const ADMINISTER = 1 << 8;
    }
}

const RIGHT_CHARS: [(char, Rights); 9] = [
    ('l', Rights::LOOKUP),
    ('r', Rights::READ),
    ('s', Rights::KEEP_SEEN),
    ('w', Rights::WRITE),
    ('i', Rights::INSERT),
    ('p', Rights::POST),
    ('c', Rights::CREATE),
    ('d', Rights::DELETE),
    ('a', Rights::ADMINISTER),
];

impl Rights {
    /// Parse a rights string such as `lrswi`
    pub fn parse(s: &str) -> Result<Self> {
        let mut rights = Rights::empty();
        for c in s.chars() {
            let right = RIGHT_CHARS
                .iter()
                .find(|(ch, _)| *ch == c.to_ascii_lowercase())
                .map(|(_, right)| *right)
                .ok_or_else(|| MailError::syntax(format!("unknown right {:?}", c)))?;
            rights |= right;
        }
        Ok(rights)
    }
}

impl fmt::Display for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (c, right) in RIGHT_CHARS {
            if self.contains(right) {
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

/// SETACL modification: `+rights`, `-rights` or a replacement set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RightsModification {
    Add(Rights),
    Remove(Rights),
    Replace(Rights),
}

impl RightsModification {
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix('+') {
            Ok(RightsModification::Add(Rights::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix('-') {
            Ok(RightsModification::Remove(Rights::parse(rest)?))
        } else {
            Ok(RightsModification::Replace(Rights::parse(s)?))
        }
    }

    fn apply(self, current: Rights) -> Rights {
        match self {
            RightsModification::Add(rights) => current | rights,
            RightsModification::Remove(rights) => current - rights,
            RightsModification::Replace(rights) => rights,
        }
    }
}

/// Rights granted per identity, on top of the owner's implicit rights
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acl {
    entries: BTreeMap<String, Rights>,
}

impl Acl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rights a user actually holds on a mailbox owned by `owner`
    pub fn effective(&self, owner: &str, user: &str) -> Rights {
        if user == owner || user == MAIL_DELIVERY_AGENT {
            return Rights::all();
        }
        self.granted(user) | self.granted(ANYONE)
    }

    /// Rights explicitly listed for one identity
    pub fn granted(&self, identity: &str) -> Rights {
        self.entries.get(identity).copied().unwrap_or_default()
    }

    pub fn modify(&mut self, identity: &str, modification: RightsModification) {
        let rights = modification.apply(self.granted(identity));
        if rights.is_empty() {
            self.entries.remove(identity);
        } else {
            self.entries.insert(identity.to_string(), rights);
        }
    }

    pub fn remove(&mut self, identity: &str) -> bool {
        self.entries.remove(identity).is_some()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, Rights)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn to_strings(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(identity, rights)| (identity.clone(), rights.to_string()))
            .collect()
    }

    pub fn from_strings(map: &BTreeMap<String, String>) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for (identity, rights) in map {
            entries.insert(identity.clone(), Rights::parse(rights)?);
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let rights = Rights::parse("rl").unwrap();
        assert_eq!(rights, Rights::LOOKUP | Rights::READ);
        assert_eq!(rights.to_string(), "lr");
        assert_eq!(Rights::all().to_string(), "lrswipcda");
        assert!(Rights::parse("lz").is_err());
    }

    #[test]
    fn test_owner_and_delivery_agent_hold_everything() {
        let acl = Acl::new();
        assert_eq!(acl.effective("alice", "alice"), Rights::all());
        assert_eq!(acl.effective("alice", MAIL_DELIVERY_AGENT), Rights::all());
        assert!(acl.effective("alice", "bob").is_empty());
    }

    #[test]
    fn test_anyone_applies_to_all_users() {
        let mut acl = Acl::new();
        acl.modify(ANYONE, RightsModification::Replace(Rights::LOOKUP));
        acl.modify("bob", RightsModification::Add(Rights::READ));
        assert_eq!(acl.effective("alice", "bob"), Rights::LOOKUP | Rights::READ);
        assert_eq!(acl.effective("alice", "carol"), Rights::LOOKUP);
    }

    #[test]
    fn test_modifications() {
        let mut acl = Acl::new();
        acl.modify("bob", RightsModification::parse("lrs").unwrap());
        acl.modify("bob", RightsModification::parse("-s").unwrap());
        acl.modify("bob", RightsModification::parse("+w").unwrap());
        assert_eq!(acl.granted("bob").to_string(), "lrw");

        acl.modify("bob", RightsModification::parse("").unwrap());
        assert_eq!(acl.entries().count(), 0);
    }

    #[test]
    fn test_string_map_conversion() {
        let mut acl = Acl::new();
        acl.modify("bob", RightsModification::Replace(Rights::LOOKUP | Rights::INSERT));
        let strings = acl.to_strings();
        assert_eq!(strings.get("bob").map(String::as_str), Some("li"));
        assert_eq!(Acl::from_strings(&strings).unwrap(), acl);
    }
}
