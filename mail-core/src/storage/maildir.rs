use crate::error::{MailError, Result};
use crate::mailbox::{Message, ANSWERED, DELETED, DRAFT, FLAGGED, SEEN};
use crate::storage::messages::MessageStore;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// One maildir per absolute mailbox name under a common base path
///
/// Filenames are `<uid>.<unix time>.<hostname>:2,<FLAGS>`; keywords have no
/// maildir representation and are not persisted.
pub struct MaildirMessageStore {
    base_path: PathBuf,
}

/// Maildir flag letters, in the order they must appear in a filename
const FLAG_LETTERS: [(char, &str); 5] = [
    ('D', DRAFT),
    ('F', FLAGGED),
    ('R', ANSWERED),
    ('S', SEEN),
    ('T', DELETED),
];

impl MaildirMessageStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn mailbox_path(&self, mailbox: &str) -> PathBuf {
        let mut dir = String::with_capacity(mailbox.len());
        for c in mailbox.chars() {
            match c {
                '%' => dir.push_str("%25"),
                '/' => dir.push_str("%2F"),
                '\\' => dir.push_str("%5C"),
                c => dir.push(c),
            }
        }
        self.base_path.join(dir)
    }

    async fn ensure_maildir_structure(&self, mailbox_path: &Path) -> Result<()> {
        for subdir in &["tmp", "new", "cur"] {
            let dir = mailbox_path.join(subdir);
            if !dir.exists() {
                fs::create_dir_all(&dir).await.map_err(|e| {
                    MailError::Storage(format!("Failed to create directory {:?}: {}", dir, e))
                })?;
            }
        }
        Ok(())
    }

    fn filename(msg: &Message) -> String {
        let hostname = gethostname::gethostname().to_string_lossy().replace(['/', ':', '.'], "_");
        let flags: String = FLAG_LETTERS
            .iter()
            .filter(|(_, flag)| msg.has_flag(flag))
            .map(|(letter, _)| *letter)
            .collect();
        format!(
            "{}.{}.{}:2,{}",
            msg.uid,
            msg.internal_date.timestamp(),
            hostname,
            flags
        )
    }

    /// Parse `uid.timestamp.host[:2,FLAGS]`; files dropped in by other
    /// delivery agents yield uid 0 and get a fresh UID from the mailbox.
    fn parse_filename(filename: &str) -> (u32, Option<DateTime<Utc>>, Vec<String>) {
        let (unique, info) = match filename.split_once(":2,") {
            Some((unique, info)) => (unique, info),
            None => (filename, ""),
        };

        let mut parts = unique.split('.');
        let uid = parts.next().and_then(|p| p.parse::<u32>().ok()).unwrap_or(0);
        let date = parts
            .next()
            .and_then(|p| p.parse::<i64>().ok())
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single());

        let flags = info
            .chars()
            .filter_map(|c| FLAG_LETTERS.iter().find(|(letter, _)| *letter == c))
            .map(|(_, flag)| flag.to_string())
            .collect();

        (uid, date, flags)
    }

    /// uid -> path of every message file currently on disk
    async fn index(&self, mailbox_path: &Path) -> Result<Vec<(u32, PathBuf)>> {
        let mut files = Vec::new();
        for subdir in &["new", "cur"] {
            let dir = mailbox_path.join(subdir);
            if !dir.exists() {
                continue;
            }
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let filename = entry.file_name().to_string_lossy().to_string();
                let (uid, _, _) = Self::parse_filename(&filename);
                files.push((uid, path));
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl MessageStore for MaildirMessageStore {
    async fn load(&self, mailbox: &str) -> Result<Vec<Message>> {
        let mailbox_path = self.mailbox_path(mailbox);
        let mut messages = Vec::new();

        for (_, path) in self.index(&mailbox_path).await? {
            let content = fs::read(&path).await?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let (uid, date, flags) = Self::parse_filename(&filename);
            let internal_date = match date {
                Some(date) => date,
                None => {
                    let modified = fs::metadata(&path).await?.modified()?;
                    DateTime::<Utc>::from(modified)
                }
            };
            messages.push(Message::new(uid, flags, internal_date, content));
        }

        // Foreign files (uid 0) sort last so they receive the newest UIDs
        messages.sort_by_key(|m| if m.uid == 0 { u32::MAX } else { m.uid });
        debug!("Loaded {} messages from {:?}", messages.len(), mailbox_path);
        Ok(messages)
    }

    async fn save(&self, mailbox: &str, messages: &[Message]) -> Result<()> {
        let mailbox_path = self.mailbox_path(mailbox);
        self.ensure_maildir_structure(&mailbox_path).await?;

        let mut on_disk: HashMap<u32, PathBuf> = HashMap::new();
        let mut stale = Vec::new();
        for (uid, path) in self.index(&mailbox_path).await? {
            if uid == 0 || on_disk.contains_key(&uid) {
                stale.push(path);
            } else {
                on_disk.insert(uid, path);
            }
        }

        for msg in messages {
            let target = mailbox_path.join("cur").join(Self::filename(msg));
            match on_disk.remove(&msg.uid) {
                Some(existing) if existing == target => {}
                Some(existing) => fs::rename(&existing, &target).await?,
                None => {
                    // Write to tmp directory first, then move (atomic operation)
                    let tmp_path = mailbox_path.join("tmp").join(Self::filename(msg));
                    fs::write(&tmp_path, &msg.content).await?;
                    fs::rename(&tmp_path, &target).await?;
                }
            }
        }

        stale.extend(on_disk.into_values());
        for path in stale {
            if let Err(e) = fs::remove_file(&path).await {
                warn!("Failed to remove expunged message {:?}: {}", path, e);
            }
        }

        Ok(())
    }

    async fn rename(&self, old: &str, new: &str) -> Result<()> {
        let old_path = self.mailbox_path(old);
        if !old_path.exists() {
            return Ok(());
        }
        let new_path = self.mailbox_path(new);
        fs::rename(&old_path, &new_path).await?;
        info!("Renamed maildir {:?} to {:?}", old_path, new_path);
        Ok(())
    }

    async fn destroy(&self, mailbox: &str) -> Result<()> {
        let path = self.mailbox_path(mailbox);
        if path.exists() {
            fs::remove_dir_all(&path).await?;
            info!("Removed maildir {:?}", path);
        }
        Ok(())
    }
}
