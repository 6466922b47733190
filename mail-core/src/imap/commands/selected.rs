//! Commands that work on the selected mailbox

use crate::error::{MailError, Result};
use crate::imap::command::{Command, CommandContext, SELECTED};
use crate::imap::session::SessionState;
use crate::mailbox::{
    normalize_flag, Rights, SearchCriteria, SequenceSet, StoreOperation, DELETED, SEEN,
};
use async_trait::async_trait;
use tracing::{debug, info};

pub struct Check;

#[async_trait]
impl Command for Check {
    fn name(&self) -> &'static str {
        "CHECK"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        SELECTED
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        ctx.conn.end()?;
        Ok("CHECK completed".to_string())
    }
}

/// Leave SELECTED, silently expunging when the selection allows it
pub struct Close;

#[async_trait]
impl Command for Close {
    fn name(&self) -> &'static str {
        "CLOSE"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        SELECTED
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        ctx.conn.end()?;
        let user = ctx.session.user()?.to_string();

        {
            let selected = ctx.session.selected()?;
            let mailbox = selected.mailbox();
            if !selected.is_read_only() && mailbox.has_delete_rights(&user) {
                let expunged = mailbox.expunge();
                debug!("CLOSE expunged {} messages from {}", expunged.len(), mailbox.name());
            }
        }

        ctx.host.release(&user, ctx.session.deselect()).await?;
        Ok("CLOSE completed".to_string())
    }
}

pub struct Expunge;

#[async_trait]
impl Command for Expunge {
    fn name(&self) -> &'static str {
        "EXPUNGE"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        SELECTED
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        ctx.conn.end()?;

        // Report what others changed first so our numbers line up with theirs
        let pending = ctx.session.selected_mut()?.changes();
        for line in pending {
            ctx.conn.untagged(&line).await?;
        }

        let expunged = ctx.session.selected()?.mailbox().expunge();
        for seq in &expunged {
            ctx.conn.untagged(&format!("{} EXPUNGE", seq)).await?;
        }
        ctx.session.selected_mut()?.sync();

        debug!("Expunged {} messages", expunged.len());
        Ok("EXPUNGE completed".to_string())
    }
}

pub struct Search;

impl Search {
    /// Parse a whole search program; top-level keys are ANDed
    pub fn parse_criteria(tokens: &[String]) -> Result<SearchCriteria> {
        let mut tokens = tokens.iter().map(String::as_str).peekable();

        if tokens
            .peek()
            .is_some_and(|t| t.eq_ignore_ascii_case("CHARSET"))
        {
            tokens.next();
            let charset = tokens
                .next()
                .ok_or_else(|| MailError::syntax("CHARSET requires a name"))?;
            if !charset.eq_ignore_ascii_case("US-ASCII") && !charset.eq_ignore_ascii_case("UTF-8")
            {
                return Err(MailError::rejected(format!(
                    "[BADCHARSET (US-ASCII UTF-8)] {} not supported",
                    charset
                )));
            }
        }

        let mut keys = Vec::new();
        while tokens.peek().is_some() {
            keys.push(Self::parse_key(&mut tokens)?);
        }
        match keys.len() {
            0 => Err(MailError::syntax("SEARCH requires criteria")),
            1 => Ok(keys.remove(0)),
            _ => Ok(SearchCriteria::And(keys)),
        }
    }

    fn argument<'a>(tokens: &mut impl Iterator<Item = &'a str>, key: &str) -> Result<String> {
        tokens
            .next()
            .map(str::to_string)
            .ok_or_else(|| MailError::syntax(format!("{} requires an argument", key)))
    }

    fn parse_key<'a>(
        tokens: &mut std::iter::Peekable<impl Iterator<Item = &'a str>>,
    ) -> Result<SearchCriteria> {
        let token = tokens
            .next()
            .ok_or_else(|| MailError::syntax("missing search key"))?;

        let key = token.to_ascii_uppercase();
        let criteria = match key.as_str() {
            "(" => {
                let mut group = Vec::new();
                loop {
                    match tokens.peek() {
                        Some(&")") => {
                            tokens.next();
                            break;
                        }
                        Some(_) => group.push(Self::parse_key(tokens)?),
                        None => return Err(MailError::syntax("unterminated search group")),
                    }
                }
                SearchCriteria::And(group)
            }
            "ALL" => SearchCriteria::All,
            "SEEN" => SearchCriteria::Seen,
            "UNSEEN" => SearchCriteria::Unseen,
            "DELETED" => SearchCriteria::Deleted,
            "UNDELETED" => SearchCriteria::Undeleted,
            "FLAGGED" => SearchCriteria::Flagged,
            "ANSWERED" => SearchCriteria::Answered,
            "RECENT" => SearchCriteria::Recent,
            "NEW" => SearchCriteria::New,
            "OLD" => SearchCriteria::Not(Box::new(SearchCriteria::Recent)),
            "SUBJECT" => SearchCriteria::Subject(Self::argument(tokens, &key)?),
            "FROM" => SearchCriteria::From(Self::argument(tokens, &key)?),
            "TO" => SearchCriteria::To(Self::argument(tokens, &key)?),
            "BODY" => SearchCriteria::Body(Self::argument(tokens, &key)?),
            "TEXT" => SearchCriteria::Text(Self::argument(tokens, &key)?),
            "UID" => SearchCriteria::Uid(SequenceSet::parse(&Self::argument(tokens, &key)?)?),
            "NOT" => SearchCriteria::Not(Box::new(Self::parse_key(tokens)?)),
            _ if token.starts_with(|c: char| c.is_ascii_digit() || c == '*') => {
                SearchCriteria::Sequence(SequenceSet::parse(token)?)
            }
            _ => {
                return Err(MailError::syntax(format!(
                    "Unknown search criterion: {}",
                    token
                )))
            }
        };
        Ok(criteria)
    }
}

#[async_trait]
impl Command for Search {
    fn name(&self) -> &'static str {
        "SEARCH"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        SELECTED
    }

    fn allows_expunge_notice(&self) -> bool {
        false
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        let tokens = ctx.conn.tokens().await?;
        let criteria = Self::parse_criteria(&tokens)?;
        debug!("Searching with criteria: {:?}", criteria);

        let matches = ctx.session.selected()?.mailbox().search(&criteria);

        let mut response = String::from("SEARCH");
        for (seq, uid) in matches {
            response.push(' ');
            let n = if ctx.use_uids { uid } else { seq };
            response.push_str(&n.to_string());
        }
        ctx.conn.untagged(&response).await?;
        Ok("SEARCH completed".to_string())
    }
}

pub struct Store;

impl Store {
    /// `[+|-]FLAGS[.SILENT]`
    fn parse_item(item: &str) -> Result<(StoreOperation, bool)> {
        let upper = item.to_ascii_uppercase();
        let (operation, rest) = match upper.as_bytes().first() {
            Some(b'+') => (StoreOperation::Add, &upper[1..]),
            Some(b'-') => (StoreOperation::Remove, &upper[1..]),
            _ => (StoreOperation::Replace, upper.as_str()),
        };
        match rest {
            "FLAGS" => Ok((operation, false)),
            "FLAGS.SILENT" => Ok((operation, true)),
            _ => Err(MailError::syntax(format!("Unknown STORE operation: {}", item))),
        }
    }

    /// The right a client needs to change one flag
    fn right_for(flag: &str) -> Rights {
        match flag {
            SEEN => Rights::KEEP_SEEN,
            DELETED => Rights::DELETE,
            _ => Rights::WRITE,
        }
    }
}

#[async_trait]
impl Command for Store {
    fn name(&self) -> &'static str {
        "STORE"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        SELECTED
    }

    fn allows_expunge_notice(&self) -> bool {
        false
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        let set = SequenceSet::parse(&ctx.conn.atom()?)?;
        let (operation, silent) = Self::parse_item(&ctx.conn.atom()?)?;
        let raw = if ctx.conn.peek_char() == Some('(') {
            let flags = ctx.conn.paren_list().await?;
            ctx.conn.end()?;
            flags
        } else {
            ctx.conn.tokens().await?
        };
        let flags: Vec<String> = raw.iter().map(|f| normalize_flag(f)).collect();
        let user = ctx.session.user()?.to_string();

        let mailbox = ctx.session.selected()?.mailbox().clone();
        let missing = flags
            .iter()
            .map(|flag| Self::right_for(flag))
            .find(|right| !mailbox.has_rights(&user, *right));
        if let Some(right) = missing {
            return Err(MailError::Unauthorized(format!("'{}' required for STORE", right)));
        }

        let modified = mailbox.store_flags(&set, ctx.use_uids, operation, &flags);
        if !silent {
            for view in &modified {
                let mut line = format!(
                    "{} FETCH (FLAGS ({})",
                    view.sequence,
                    view.message.flags.join(" ")
                );
                if ctx.use_uids {
                    line.push_str(&format!(" UID {}", view.message.uid));
                }
                line.push(')');
                ctx.conn.untagged(&line).await?;
            }
        }

        debug!("{} stored flags {:?} on {} messages", user, flags, modified.len());
        Ok("STORE completed".to_string())
    }
}

pub struct Copy;

#[async_trait]
impl Command for Copy {
    fn name(&self) -> &'static str {
        "COPY"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        SELECTED
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        let set = SequenceSet::parse(&ctx.conn.atom()?)?;
        let target = ctx.conn.mailbox().await?;
        ctx.conn.end()?;
        let user = ctx.session.user()?.to_string();

        let source = ctx.session.selected()?.mailbox().clone();
        let copied = ctx
            .host
            .copy(&user, &source, &set, ctx.use_uids, &target)
            .await?;

        info!("{} copied {} messages to {}", user, copied, target);
        Ok("COPY completed".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(s: &[&str]) -> Vec<String> {
        s.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_parse_search_simple() {
        assert_eq!(
            Search::parse_criteria(&tokens(&["ALL"])).unwrap(),
            SearchCriteria::All
        );
        assert_eq!(
            Search::parse_criteria(&tokens(&["subject", "test email"])).unwrap(),
            SearchCriteria::Subject("test email".to_string())
        );
    }

    #[test]
    fn test_parse_search_program() {
        let criteria = Search::parse_criteria(&tokens(&[
            "CHARSET", "UTF-8", "UNSEEN", "NOT", "(", "FROM", "bob", "DELETED", ")", "1:*",
        ]))
        .unwrap();
        assert_eq!(
            criteria,
            SearchCriteria::And(vec![
                SearchCriteria::Unseen,
                SearchCriteria::Not(Box::new(SearchCriteria::And(vec![
                    SearchCriteria::From("bob".to_string()),
                    SearchCriteria::Deleted,
                ]))),
                SearchCriteria::Sequence(SequenceSet::parse("1:*").unwrap()),
            ])
        );
    }

    #[test]
    fn test_parse_search_errors() {
        assert!(matches!(
            Search::parse_criteria(&tokens(&["BOGUS"])),
            Err(MailError::ProtocolSyntax(_))
        ));
        assert!(matches!(
            Search::parse_criteria(&tokens(&["SUBJECT"])),
            Err(MailError::ProtocolSyntax(_))
        ));
        assert!(matches!(
            Search::parse_criteria(&tokens(&["(", "SEEN"])),
            Err(MailError::ProtocolSyntax(_))
        ));
        assert!(matches!(
            Search::parse_criteria(&tokens(&["CHARSET", "KOI8-R", "ALL"])),
            Err(MailError::Rejected(_))
        ));
    }

    #[test]
    fn test_store_item() {
        assert_eq!(
            Store::parse_item("+FLAGS.SILENT").unwrap(),
            (StoreOperation::Add, true)
        );
        assert_eq!(
            Store::parse_item("-flags").unwrap(),
            (StoreOperation::Remove, false)
        );
        assert_eq!(
            Store::parse_item("FLAGS").unwrap(),
            (StoreOperation::Replace, false)
        );
        assert!(Store::parse_item("+LABELS").is_err());
    }

    #[test]
    fn test_store_rights_per_flag() {
        assert_eq!(Store::right_for(SEEN), Rights::KEEP_SEEN);
        assert_eq!(Store::right_for(DELETED), Rights::DELETE);
        assert_eq!(Store::right_for("\\Flagged"), Rights::WRITE);
        assert_eq!(Store::right_for("$Junk"), Rights::WRITE);
    }
}
