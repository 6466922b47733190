//! FETCH and its data items

use crate::error::{MailError, Result};
use crate::imap::command::{Command, CommandContext, SELECTED};
use crate::imap::commands::append::DATE_TIME_FORMAT;
use crate::imap::session::SessionState;
use crate::mailbox::{Message, Rights, SequenceSet, SEEN};
use async_trait::async_trait;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySection {
    Full,
    Header,
    Text,
}

/// Fetch data item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchItem {
    Flags,
    Uid,
    Rfc822Size,
    InternalDate,
    /// RFC822 - entire message, sets \Seen
    Rfc822,
    Rfc822Header,
    /// RFC822.TEXT - body only, sets \Seen
    Rfc822Text,
    Body { section: BodySection, peek: bool },
}

impl FetchItem {
    /// Expand one item name; macros become several items
    pub fn parse(name: &str) -> Result<Vec<FetchItem>> {
        let upper = name.to_ascii_uppercase();
        let item = match upper.as_str() {
            "ALL" | "FAST" | "FULL" => {
                return Ok(vec![
                    FetchItem::Flags,
                    FetchItem::InternalDate,
                    FetchItem::Rfc822Size,
                ])
            }
            "FLAGS" => FetchItem::Flags,
            "UID" => FetchItem::Uid,
            "RFC822.SIZE" => FetchItem::Rfc822Size,
            "INTERNALDATE" => FetchItem::InternalDate,
            "RFC822" => FetchItem::Rfc822,
            "RFC822.HEADER" => FetchItem::Rfc822Header,
            "RFC822.TEXT" => FetchItem::Rfc822Text,
            _ => {
                let (peek, section) = if let Some(rest) = upper.strip_prefix("BODY.PEEK[") {
                    (true, rest)
                } else if let Some(rest) = upper.strip_prefix("BODY[") {
                    (false, rest)
                } else {
                    return Err(MailError::syntax(format!("Unknown fetch item: {}", name)));
                };
                let section = match section {
                    "]" => BodySection::Full,
                    "HEADER]" => BodySection::Header,
                    "TEXT]" => BodySection::Text,
                    _ => {
                        return Err(MailError::syntax(format!(
                            "Unsupported body section: {}",
                            name
                        )))
                    }
                };
                FetchItem::Body { section, peek }
            }
        };
        Ok(vec![item])
    }

    /// Whether fetching this item marks the message \Seen
    pub fn sets_seen(&self) -> bool {
        match self {
            FetchItem::Rfc822 | FetchItem::Rfc822Text => true,
            FetchItem::Body { peek, .. } => !peek,
            _ => false,
        }
    }

    fn render(&self, msg: &Message, out: &mut Vec<u8>) {
        match self {
            FetchItem::Flags => {
                out.extend_from_slice(format!("FLAGS ({})", msg.flags.join(" ")).as_bytes())
            }
            FetchItem::Uid => out.extend_from_slice(format!("UID {}", msg.uid).as_bytes()),
            FetchItem::Rfc822Size => {
                out.extend_from_slice(format!("RFC822.SIZE {}", msg.size()).as_bytes())
            }
            FetchItem::InternalDate => out.extend_from_slice(
                format!(
                    "INTERNALDATE \"{}\"",
                    msg.internal_date.format(DATE_TIME_FORMAT)
                )
                .as_bytes(),
            ),
            FetchItem::Rfc822 => literal("RFC822", &msg.content, out),
            FetchItem::Rfc822Header => literal("RFC822.HEADER", msg.header(), out),
            FetchItem::Rfc822Text => literal("RFC822.TEXT", msg.body(), out),
            FetchItem::Body { section, .. } => match section {
                BodySection::Full => literal("BODY[]", &msg.content, out),
                BodySection::Header => literal("BODY[HEADER]", msg.header(), out),
                BodySection::Text => literal("BODY[TEXT]", msg.body(), out),
            },
        }
    }
}

fn literal(label: &str, bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(format!("{} {{{}}}\r\n", label, bytes.len()).as_bytes());
    out.extend_from_slice(bytes);
}

pub struct Fetch;

impl Fetch {
    async fn parse_items(ctx: &mut CommandContext<'_>) -> Result<Vec<FetchItem>> {
        let names = if ctx.conn.peek_char() == Some('(') {
            ctx.conn.paren_list().await?
        } else {
            vec![ctx.conn.atom()?]
        };
        ctx.conn.end()?;

        let mut items = Vec::new();
        for name in names {
            for item in FetchItem::parse(&name)? {
                if !items.contains(&item) {
                    items.push(item);
                }
            }
        }
        if ctx.use_uids && !items.contains(&FetchItem::Uid) {
            items.insert(0, FetchItem::Uid);
        }
        Ok(items)
    }
}

#[async_trait]
impl Command for Fetch {
    fn name(&self) -> &'static str {
        "FETCH"
    }

    fn valid_states(&self) -> &'static [SessionState] {
        SELECTED
    }

    fn allows_expunge_notice(&self) -> bool {
        false
    }

    async fn process(&self, ctx: &mut CommandContext<'_>) -> Result<String> {
        let set = SequenceSet::parse(&ctx.conn.atom()?)?;
        let items = Self::parse_items(ctx).await?;
        let user = ctx.session.user()?.to_string();

        let selected = ctx.session.selected()?;
        let mailbox = selected.mailbox().clone();
        let may_set_seen = !selected.is_read_only()
            && mailbox.has_rights(&user, Rights::KEEP_SEEN)
            && items.iter().any(FetchItem::sets_seen);

        let views = mailbox.fetch(&set, ctx.use_uids);
        for mut view in views {
            let mut items = items.clone();
            if may_set_seen && mailbox.mark_seen(view.message.uid) {
                view.message.add_flag(SEEN);
                if !items.contains(&FetchItem::Flags) {
                    items.push(FetchItem::Flags);
                }
            }

            let mut out = format!("* {} FETCH (", view.sequence).into_bytes();
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(b' ');
                }
                item.render(&view.message, &mut out);
            }
            out.extend_from_slice(b")\r\n");
            ctx.conn.write_raw(&out).await?;
        }

        debug!("{} fetched {:?} from {}", user, items, mailbox.name());
        Ok("FETCH completed".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn message() -> Message {
        Message::new(
            7,
            vec!["\\Flagged".to_string()],
            Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap(),
            b"Subject: hi\r\n\r\nbody".to_vec(),
        )
    }

    #[test]
    fn test_parse_items() {
        assert_eq!(
            FetchItem::parse("fast").unwrap(),
            vec![FetchItem::Flags, FetchItem::InternalDate, FetchItem::Rfc822Size]
        );
        assert_eq!(
            FetchItem::parse("BODY.PEEK[HEADER]").unwrap(),
            vec![FetchItem::Body {
                section: BodySection::Header,
                peek: true
            }]
        );
        assert!(FetchItem::parse("BODYSTRUCTURE").is_err());
        assert!(FetchItem::parse("BODY[1.2]").is_err());
    }

    #[test]
    fn test_sets_seen() {
        assert!(FetchItem::Rfc822.sets_seen());
        assert!(FetchItem::parse("BODY[]").unwrap()[0].sets_seen());
        assert!(!FetchItem::parse("BODY.PEEK[]").unwrap()[0].sets_seen());
        assert!(!FetchItem::Rfc822Header.sets_seen());
    }

    #[test]
    fn test_render() {
        let msg = message();
        let mut out = Vec::new();
        FetchItem::Body {
            section: BodySection::Text,
            peek: true,
        }
        .render(&msg, &mut out);
        assert_eq!(out, b"BODY[TEXT] {4}\r\nbody");

        let mut out = Vec::new();
        FetchItem::InternalDate.render(&msg, &mut out);
        assert_eq!(out, b"INTERNALDATE \"05-Mar-2024 10:00:00 +0000\"");

        let mut out = Vec::new();
        FetchItem::Flags.render(&msg, &mut out);
        assert_eq!(out, b"FLAGS (\\Flagged)");
    }
}
