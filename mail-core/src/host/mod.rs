//! Mailbox host
//!
//! Owns the cache of open mailboxes and drives every create, get, release,
//! delete and rename. All of them run under one async mutex that is held
//! across folder-record I/O, so "check then create" and "check cache then
//! acquire" are atomic with respect to each other.
//!
//! Every `get`/`create` must be paired with exactly one `release`. The last
//! release flushes the live mailbox back into its folder record and message
//! store and evicts it.

mod cache;
mod list;

pub use list::{ListEntry, StatusItem, MARKED, NOSELECT, UNMARKED};

use crate::error::{MailError, NotFoundStatus, Result};
use crate::mailbox::{Acl, Mailbox, Rights, SequenceSet, ANYONE, MAIL_DELIVERY_AGENT};
use crate::namespace::{Namespace, INBOX, NAMESPACE_TOKEN, USER_NAMESPACE_PREFIX};
use crate::storage::{FolderRecord, FolderRecordStore, MessageStore};
use crate::users::UsersRepository;
use cache::{MailboxCache, Released};
use chrono::{DateTime, Utc};
use list::{ListPattern, StatusValues};
use std::cmp::Reverse;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

struct HostState {
    cache: MailboxCache,
    last_uid_validity: u32,
}

impl HostState {
    /// Strictly increasing, seeded from the clock
    fn next_uid_validity(&mut self) -> u32 {
        let now = Utc::now().timestamp() as u32;
        self.last_uid_validity = now.max(self.last_uid_validity + 1);
        self.last_uid_validity
    }
}

pub struct MailboxHost {
    state: Mutex<HostState>,
    records: Arc<dyn FolderRecordStore>,
    messages: Arc<dyn MessageStore>,
    users: Arc<dyn UsersRepository>,
    namespace: Namespace,
}

impl MailboxHost {
    pub async fn new(
        records: Arc<dyn FolderRecordStore>,
        messages: Arc<dyn MessageStore>,
        users: Arc<dyn UsersRepository>,
        namespace: Namespace,
    ) -> Result<Self> {
        let host = Self {
            state: Mutex::new(HostState {
                cache: MailboxCache::default(),
                last_uid_validity: 0,
            }),
            records,
            messages,
            users,
            namespace,
        };
        host.ensure_namespace_root().await?;
        Ok(host)
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn users(&self) -> &Arc<dyn UsersRepository> {
        &self.users
    }

    /// The `#user` node every personal hierarchy hangs from
    async fn ensure_namespace_root(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if self.records.load(USER_NAMESPACE_PREFIX).await?.is_some() {
            return Ok(());
        }

        let mut record = FolderRecord::new(
            USER_NAMESPACE_PREFIX,
            MAIL_DELIVERY_AGENT,
            state.next_uid_validity(),
        );
        record.not_selectable_by_anyone = true;
        record
            .acl
            .insert(ANYONE.to_string(), Rights::LOOKUP.to_string());
        record.lookup_rights.insert(ANYONE.to_string());
        self.records.save(&record).await?;
        info!("Created namespace root {}", USER_NAMESPACE_PREFIX);
        Ok(())
    }

    /// Create `#user.<user>` and its INBOX if they are missing
    pub async fn create_user_account(&self, user: &str) -> Result<()> {
        let inbox = self.namespace.to_absolute(user, INBOX)?;
        let root = self.namespace.user_root(user);
        let mut state = self.state.lock().await;

        if self.records.load(&root).await?.is_none() {
            let mut record = FolderRecord::new(&root, user, state.next_uid_validity());
            record.not_selectable_by_anyone = true;
            self.records.save(&record).await?;
            info!("Created account root {}", root);
        }
        if self.records.load(&inbox).await?.is_none() {
            let record = FolderRecord::new(&inbox, user, state.next_uid_validity());
            self.records.save(&record).await?;
            info!("Created {}", inbox);
        }
        Ok(())
    }

    /// Open a mailbox, taking one reference
    pub async fn get(&self, user: &str, name: &str) -> Result<Arc<Mailbox>> {
        let absolute = self.namespace.to_absolute(user, name)?;
        let mut state = self.state.lock().await;
        self.get_locked(&mut state, user, &absolute).await
    }

    async fn get_locked(
        &self,
        state: &mut HostState,
        user: &str,
        absolute: &str,
    ) -> Result<Arc<Mailbox>> {
        let record = self.load_live_record(absolute).await?;

        match state.cache.peek(absolute).map(|m| m.has_lookup_rights(user)) {
            Some(false) => {
                warn!("{} has no lookup rights on {}", user, absolute);
                return Err(MailError::AccessDenied(absolute.to_string()));
            }
            Some(true) => {
                if let Some(mailbox) = state.cache.acquire(absolute) {
                    debug!("Acquired {} ({} refs)", absolute, state.cache.refs(absolute));
                    return Ok(mailbox);
                }
            }
            None => {}
        }

        let messages = self.messages.load(absolute).await.map_err(|e| {
            error!("Failed to load messages of {}: {}", absolute, e);
            e
        })?;
        let mailbox = Arc::new(Mailbox::from_record(&record, messages)?);
        if !mailbox.has_lookup_rights(user) {
            warn!("{} has no lookup rights on {}", user, absolute);
            return Err(MailError::AccessDenied(absolute.to_string()));
        }

        state.cache.insert(absolute, mailbox.clone());
        debug!("Opened {} ({} messages)", absolute, mailbox.exists());
        Ok(mailbox)
    }

    /// Create a mailbox and any missing ancestors, taking one reference
    pub async fn create(&self, user: &str, name: &str) -> Result<Arc<Mailbox>> {
        let absolute = self.namespace.to_absolute(user, name)?;
        check_creatable(&absolute)?;
        let mut state = self.state.lock().await;

        if self.records.load(&absolute).await?.is_some() {
            return Err(MailError::AlreadyExists(absolute));
        }

        let parent = self.ensure_ancestors(&mut state, user, &absolute).await?;
        require_rights(&state, &parent, user, Rights::CREATE)?;

        let record = self.new_record(&mut state, user, &absolute);
        self.records.save(&record).await?;
        let mailbox = Arc::new(Mailbox::from_record(&record, Vec::new())?);
        state.cache.insert(&absolute, mailbox.clone());

        info!("{} created mailbox {}", user, absolute);
        Ok(mailbox)
    }

    /// Walk the ancestors shallowest first, creating the missing ones, and
    /// return the direct parent's record
    ///
    /// Ancestors created before a failing step are kept. A tombstoned
    /// ancestor still counts as a hierarchy node.
    async fn ensure_ancestors(
        &self,
        state: &mut HostState,
        user: &str,
        absolute: &str,
    ) -> Result<FolderRecord> {
        let mut parent: Option<FolderRecord> = None;

        for ancestor in self.namespace.ancestors(absolute) {
            match self.records.load(&ancestor).await? {
                Some(record) => parent = Some(record),
                None => {
                    let existing = parent
                        .as_ref()
                        .ok_or_else(|| MailError::not_local(&ancestor))?;
                    require_rights(state, existing, user, Rights::CREATE)?;

                    let record = self.new_record(state, user, &ancestor);
                    self.records.save(&record).await?;
                    info!("Created missing ancestor {}", ancestor);
                    parent = Some(record);
                }
            }
        }

        parent.ok_or_else(|| MailError::not_local(absolute))
    }

    /// Drop one reference; the last one flushes and evicts
    pub async fn release(&self, user: &str, mailbox: Option<Arc<Mailbox>>) -> Result<()> {
        let Some(mailbox) = mailbox else {
            return Ok(());
        };
        if user != MAIL_DELIVERY_AGENT {
            mailbox.unset_recent();
        }

        let mut state = self.state.lock().await;
        let name = mailbox.name();
        match state.cache.release(&name, &mailbox) {
            None => debug!("Released stale handle on {}", name),
            Some(Released::Held(refs)) => debug!("Released {} ({} refs left)", name, refs),
            Some(Released::Evicted(mailbox)) => self.flush(&name, &mailbox).await?,
        }
        Ok(())
    }

    async fn flush(&self, name: &str, mailbox: &Mailbox) -> Result<()> {
        let Some(mut record) = self.records.load(name).await? else {
            warn!("Folder record of {} vanished while open, not flushing", name);
            return Ok(());
        };

        let messages = mailbox.flush_into(&mut record);
        if !record.deleted {
            self.messages.save(name, &messages).await?;
        }
        self.records.save(&record).await?;
        debug!("Flushed {} ({} messages)", name, messages.len());
        Ok(())
    }

    /// Delete a mailbox
    ///
    /// `held` tells whether the caller itself holds one reference (the
    /// mailbox is its selection). A mailbox with children is only emptied
    /// and tombstoned; a leaf is removed with its storage.
    pub async fn delete(&self, user: &str, name: &str, held: bool) -> Result<bool> {
        let absolute = self.namespace.to_absolute(user, name)?;
        if absolute == self.namespace.to_absolute(user, INBOX)? {
            return Err(MailError::Unauthorized("INBOX cannot be deleted".to_string()));
        }
        let mut state = self.state.lock().await;

        let Some(mut record) = self.records.load(&absolute).await? else {
            return Err(MailError::not_local(&absolute));
        };

        let refs = state.cache.refs(&absolute);
        if refs > usize::from(held) {
            warn!("Refusing to delete {}: {} references outstanding", absolute, refs);
            return Err(MailError::MailboxInUse(absolute));
        }
        require_rights(&state, &record, user, Rights::DELETE)?;

        let has_children = self
            .records
            .names()
            .await?
            .iter()
            .any(|n| self.namespace.parent(n) == Some(absolute.as_str()));

        if has_children {
            if record.not_selectable_by_anyone {
                return Err(MailError::Unauthorized(format!(
                    "{} is not selectable and has children",
                    absolute
                )));
            }
            if let Some(mailbox) = state.cache.peek(&absolute) {
                mailbox.expunge_all();
                mailbox.set_not_selectable(true);
            }
            self.messages.destroy(&absolute).await?;

            record.deleted = true;
            record.not_selectable_by_anyone = true;
            record.exists = 0;
            record.recent = 0;
            record.unseen_by_user.clear();
            self.records.save(&record).await?;
            info!("{} tombstoned {} (children kept)", user, absolute);
            return Ok(true);
        }

        if let Some(mailbox) = state.cache.remove(&absolute) {
            mailbox.expunge_all();
            debug_assert_eq!(mailbox.exists(), 0);
        }
        self.records.remove(&absolute).await?;
        self.messages.destroy(&absolute).await?;
        info!("{} deleted {}", user, absolute);
        Ok(true)
    }

    /// Rename a mailbox and all its descendants
    ///
    /// Preconditions fail with an error. Descendants are then moved deepest
    /// first and the mailbox itself last; the first failing step stops the
    /// walk and yields `Ok(false)` with the steps already done left in place.
    pub async fn rename(&self, user: &str, old: &str, new: &str) -> Result<bool> {
        let old_abs = self.namespace.to_absolute(user, old)?;
        let new_abs = self.namespace.to_absolute(user, new)?;
        check_creatable(&new_abs)?;
        if old_abs == self.namespace.to_absolute(user, INBOX)? {
            return Err(MailError::Unauthorized("INBOX cannot be renamed".to_string()));
        }
        if new_abs == old_abs || self.namespace.is_descendant(&new_abs, &old_abs) {
            return Err(MailError::syntax(format!(
                "cannot rename {} into itself",
                old_abs
            )));
        }

        let mut state = self.state.lock().await;
        let record = self.load_live_record(&old_abs).await?;
        if self.records.load(&new_abs).await?.is_some() {
            return Err(MailError::AlreadyExists(new_abs));
        }
        require_rights(&state, &record, user, Rights::DELETE)?;
        let parent = self.ensure_ancestors(&mut state, user, &new_abs).await?;
        require_rights(&state, &parent, user, Rights::CREATE)?;

        let mut sources: Vec<String> = self
            .records
            .names()
            .await?
            .into_iter()
            .filter(|n| self.namespace.is_descendant(n, &old_abs))
            .collect();
        sources.sort_by_key(|n| Reverse(self.namespace.depth(n)));
        sources.push(old_abs.clone());

        for source in sources {
            let Some(target) = self.namespace.reparent(&source, &old_abs, &new_abs) else {
                continue;
            };
            if let Err(e) = self.rename_one(&mut state, &source, &target).await {
                warn!(
                    "Rename of {} to {} stopped at {}: {}",
                    old_abs, new_abs, source, e
                );
                return Ok(false);
            }
        }

        info!("{} renamed {} to {}", user, old_abs, new_abs);
        Ok(true)
    }

    async fn rename_one(&self, state: &mut HostState, source: &str, target: &str) -> Result<()> {
        let mut record = self
            .records
            .load(source)
            .await?
            .ok_or_else(|| MailError::not_local(source))?;
        if self.records.load(target).await?.is_some() {
            return Err(MailError::AlreadyExists(target.to_string()));
        }

        record.name = target.to_string();
        self.records.save(&record).await?;
        self.records.remove(source).await?;
        self.messages.rename(source, target).await?;
        if let Some(mailbox) = state.cache.rekey(source, target) {
            mailbox.set_name(target);
        }
        debug!("Moved {} to {}", source, target);
        Ok(())
    }

    /// LIST/LSUB
    ///
    /// `Ok(None)` signals a wildcard in an unsupported position. An empty
    /// pattern yields the single delimiter hint entry.
    pub async fn list(
        &self,
        user: &str,
        reference: &str,
        pattern: &str,
        subscribed_only: bool,
    ) -> Result<Option<Vec<ListEntry>>> {
        let delimiter = self.namespace.delimiter();
        if pattern.is_empty() {
            return Ok(Some(vec![ListEntry {
                attributes: vec![NOSELECT],
                delimiter,
                name: String::new(),
            }]));
        }

        let target = format!("{}{}", reference, pattern);
        let Some((prefix, wildcard)) = ListPattern::parse(&target) else {
            return Ok(None);
        };
        let absolute_prefix = if prefix.starts_with(NAMESPACE_TOKEN) {
            prefix
        } else {
            format!("{}{}{}", self.namespace.user_root(user), delimiter, prefix)
        };
        let pattern = ListPattern::new(absolute_prefix, wildcard);

        let state = self.state.lock().await;
        let mut entries = Vec::new();
        for name in self.records.names().await? {
            if !pattern.matches(&name, delimiter) {
                continue;
            }
            let Some(record) = self.records.load(&name).await? else {
                continue;
            };

            let (noselect, marked) = match state.cache.peek(&name) {
                Some(mailbox) => {
                    if !mailbox.has_lookup_rights(user)
                        || (subscribed_only && !mailbox.is_subscribed(user))
                    {
                        continue;
                    }
                    (record.deleted || !mailbox.is_selectable(), mailbox.is_marked())
                }
                None => {
                    if !record.has_lookup_rights(user)
                        || (subscribed_only && !record.subscribers.contains(user))
                    {
                        continue;
                    }
                    (
                        record.deleted || record.not_selectable_by_anyone,
                        record.marked,
                    )
                }
            };

            let attributes = if noselect {
                vec![NOSELECT]
            } else if marked {
                vec![MARKED]
            } else {
                vec![UNMARKED]
            };
            entries.push(ListEntry {
                attributes,
                delimiter,
                name,
            });
        }

        Ok(Some(entries))
    }

    pub async fn subscribe(&self, user: &str, name: &str) -> Result<bool> {
        let mailbox = self.get(user, name).await?;
        let changed = mailbox.subscribe(user);
        self.release(user, Some(mailbox)).await?;
        Ok(changed)
    }

    pub async fn unsubscribe(&self, user: &str, name: &str) -> Result<bool> {
        let mailbox = self.get(user, name).await?;
        let changed = mailbox.unsubscribe(user);
        self.release(user, Some(mailbox)).await?;
        Ok(changed)
    }

    /// STATUS values, read without taking a reference
    pub async fn status(&self, user: &str, name: &str, items: &[StatusItem]) -> Result<String> {
        let absolute = self.namespace.to_absolute(user, name)?;
        let state = self.state.lock().await;
        let record = self.load_live_record(&absolute).await?;

        let values = match state.cache.peek(&absolute) {
            Some(mailbox) => {
                if !mailbox.has_lookup_rights(user) {
                    return Err(MailError::AccessDenied(absolute));
                }
                StatusValues {
                    messages: mailbox.exists(),
                    recent: mailbox.recent_count(),
                    uid_next: mailbox.uid_next(),
                    uid_validity: mailbox.uid_validity(),
                    unseen: mailbox.unseen_count(),
                }
            }
            None => {
                if !record.has_lookup_rights(user) {
                    return Err(MailError::AccessDenied(absolute));
                }
                StatusValues {
                    messages: record.exists,
                    recent: record.recent,
                    uid_next: record.highest_uid + 1,
                    uid_validity: record.uid_validity,
                    unseen: record.unseen_for(user),
                }
            }
        };

        Ok(values.render(items))
    }

    /// APPEND; returns the new UID
    pub async fn append(
        &self,
        user: &str,
        name: &str,
        flags: Vec<String>,
        internal_date: DateTime<Utc>,
        content: Vec<u8>,
    ) -> Result<u32> {
        let mailbox = self.get(user, name).await?;
        let result = if !mailbox.is_selectable() {
            Err(MailError::AccessDenied(mailbox.name()))
        } else if !mailbox.has_insert_rights(user) {
            Err(MailError::Unauthorized(format!(
                "{} may not append to {}",
                user,
                mailbox.name()
            )))
        } else {
            Ok(mailbox.append(flags, internal_date, content, true))
        };
        self.release(user, Some(mailbox)).await?;
        result
    }

    /// Local delivery into a user's INBOX as the mail-delivery agent
    pub async fn deliver(&self, recipient: &str, content: Vec<u8>) -> Result<u32> {
        let inbox = self.namespace.to_absolute(recipient, INBOX)?;
        let mailbox = match self.get(MAIL_DELIVERY_AGENT, &inbox).await {
            Err(MailError::MailboxNotFound {
                status: NotFoundStatus::NotLocal,
                ..
            }) => {
                self.create_user_account(recipient).await?;
                self.get(MAIL_DELIVERY_AGENT, &inbox).await?
            }
            other => other?,
        };

        let uid = mailbox.append(Vec::new(), Utc::now(), content, true);
        self.release(MAIL_DELIVERY_AGENT, Some(mailbox)).await?;
        info!("Delivered message {} to {}", uid, inbox);
        Ok(uid)
    }

    /// COPY from an open mailbox into `target`; returns the number copied
    pub async fn copy(
        &self,
        user: &str,
        source: &Mailbox,
        set: &SequenceSet,
        by_uid: bool,
        target: &str,
    ) -> Result<usize> {
        let views = source.fetch(set, by_uid);
        let mailbox = self.get(user, target).await?;

        let result = if !mailbox.is_selectable() {
            Err(MailError::AccessDenied(mailbox.name()))
        } else if !mailbox.has_insert_rights(user) {
            Err(MailError::Unauthorized(format!(
                "{} may not copy into {}",
                user,
                mailbox.name()
            )))
        } else {
            for view in &views {
                let msg = &view.message;
                mailbox.append(msg.flags.clone(), msg.internal_date, msg.content.clone(), true);
            }
            Ok(views.len())
        };

        self.release(user, Some(mailbox)).await?;
        result
    }

    pub async fn is_home_server(&self, user: &str) -> Result<bool> {
        self.users.contains(user).await
    }

    pub async fn has_local_access(&self, user: &str) -> Result<bool> {
        self.users.contains(user).await
    }

    /// Diagnostics: whether an absolute name is open
    pub async fn is_cached(&self, absolute: &str) -> bool {
        self.state.lock().await.cache.peek(absolute).is_some()
    }

    /// Diagnostics: references held on an absolute name
    pub async fn reference_count(&self, absolute: &str) -> usize {
        self.state.lock().await.cache.refs(absolute)
    }

    async fn load_live_record(&self, absolute: &str) -> Result<FolderRecord> {
        match self.records.load(absolute).await? {
            None => Err(MailError::not_local(absolute)),
            Some(record) if record.deleted => Err(MailError::deleted(absolute)),
            Some(record) => Ok(record),
        }
    }

    fn new_record(&self, state: &mut HostState, user: &str, absolute: &str) -> FolderRecord {
        FolderRecord::new(
            absolute,
            &self.owner_of(absolute, user),
            state.next_uid_validity(),
        )
    }

    /// Mailboxes under `#user.<u>` belong to `u`, whoever creates them
    fn owner_of(&self, absolute: &str, user: &str) -> String {
        let delimiter = self.namespace.delimiter();
        absolute
            .strip_prefix(USER_NAMESPACE_PREFIX)
            .and_then(|rest| rest.strip_prefix(delimiter))
            .and_then(|rest| rest.split(delimiter).next())
            .filter(|owner| !owner.is_empty())
            .unwrap_or(user)
            .to_string()
    }
}

/// Rights from the live mailbox when open, else from the record
fn rights_on(state: &HostState, record: &FolderRecord, user: &str) -> Result<Rights> {
    match state.cache.peek(&record.name) {
        Some(mailbox) => Ok(mailbox.rights(user)),
        None => Ok(Acl::from_strings(&record.acl)?.effective(&record.owner, user)),
    }
}

fn require_rights(
    state: &HostState,
    record: &FolderRecord,
    user: &str,
    rights: Rights,
) -> Result<()> {
    if rights_on(state, record, user)?.contains(rights) {
        return Ok(());
    }
    warn!("{} lacks '{}' on {}", user, rights, record.name);
    Err(MailError::Unauthorized(format!(
        "{} lacks '{}' on {}",
        user, rights, record.name
    )))
}

fn check_creatable(absolute: &str) -> Result<()> {
    if absolute.contains(['*', '%']) {
        return Err(MailError::syntax(format!(
            "wildcards are not allowed in mailbox names: {}",
            absolute
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::{RightsModification, DELETED};
    use crate::storage::{MemoryMessageStore, MemoryRecordStore};
    use crate::users::MemoryUsersRepository;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Record store that counts saves per name
    #[derive(Default)]
    struct CountingRecordStore {
        inner: MemoryRecordStore,
        saves: parking_lot::Mutex<HashMap<String, usize>>,
    }

    impl CountingRecordStore {
        fn saves(&self, name: &str) -> usize {
            self.saves.lock().get(name).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl FolderRecordStore for CountingRecordStore {
        async fn load(&self, name: &str) -> Result<Option<FolderRecord>> {
            self.inner.load(name).await
        }

        async fn save(&self, record: &FolderRecord) -> Result<()> {
            *self.saves.lock().entry(record.name.clone()).or_default() += 1;
            self.inner.save(record).await
        }

        async fn remove(&self, name: &str) -> Result<()> {
            self.inner.remove(name).await
        }

        async fn names(&self) -> Result<Vec<String>> {
            self.inner.names().await
        }
    }

    async fn host_with(records: Arc<dyn FolderRecordStore>) -> MailboxHost {
        let users = Arc::new(MemoryUsersRepository::new());
        users.add_user("alice", "secret").await.unwrap();
        users.add_user("bob", "secret").await.unwrap();

        let host = MailboxHost::new(
            records,
            Arc::new(MemoryMessageStore::new()),
            users,
            Namespace::default(),
        )
        .await
        .unwrap();
        host.create_user_account("alice").await.unwrap();
        host.create_user_account("bob").await.unwrap();
        host
    }

    async fn host() -> MailboxHost {
        host_with(Arc::new(MemoryRecordStore::new())).await
    }

    async fn create_and_release(host: &MailboxHost, user: &str, name: &str) {
        let mailbox = host.create(user, name).await.unwrap();
        host.release(user, Some(mailbox)).await.unwrap();
    }

    fn names(entries: &[ListEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let host = host().await;
        let created = host.create("alice", "Foo").await.unwrap();
        let fetched = host.get("alice", "Foo").await.unwrap();

        assert!(Arc::ptr_eq(&created, &fetched));
        assert_eq!(fetched.name(), "#user.alice.Foo");
        assert_eq!(fetched.exists(), 0);
        assert_eq!(host.reference_count("#user.alice.Foo").await, 2);

        host.release("alice", Some(created)).await.unwrap();
        assert!(host.is_cached("#user.alice.Foo").await);
        host.release("alice", Some(fetched)).await.unwrap();
        assert!(!host.is_cached("#user.alice.Foo").await);

        assert!(matches!(
            host.create("alice", "Foo").await,
            Err(MailError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_release_none_is_noop() {
        let host = host().await;
        host.release("alice", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_flushed_exactly_once_after_last_release() {
        let records = Arc::new(CountingRecordStore::default());
        let host = Arc::new(host_with(records.clone()).await);
        let name = "#user.alice.INBOX";

        let held = host.get("alice", "INBOX").await.unwrap();
        let saves_before = records.saves(name);

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let host = host.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..10 {
                    let mailbox = host.get("alice", "INBOX").await.unwrap();
                    tokio::task::yield_now().await;
                    host.release("alice", Some(mailbox)).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(records.saves(name), saves_before);
        assert_eq!(host.reference_count(name).await, 1);

        host.release("alice", Some(held)).await.unwrap();
        assert_eq!(records.saves(name), saves_before + 1);
        assert!(!host.is_cached(name).await);
    }

    #[tokio::test]
    async fn test_lookup_rights_required() {
        let host = host().await;
        assert!(matches!(
            host.get("bob", "#user.alice.INBOX").await,
            Err(MailError::AccessDenied(_))
        ));

        let inbox = host.get("alice", "INBOX").await.unwrap();
        assert!(matches!(
            host.get("bob", "#user.alice.INBOX").await,
            Err(MailError::AccessDenied(_))
        ));
        assert_eq!(host.reference_count("#user.alice.INBOX").await, 1);
        host.release("alice", Some(inbox)).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_missing_is_not_local() {
        let host = host().await;
        let err = host.get("alice", "Nope").await.unwrap_err();
        assert_eq!(err.not_found_status(), Some(NotFoundStatus::NotLocal));
    }

    #[tokio::test]
    async fn test_create_vivifies_ancestors() {
        let host = host().await;
        create_and_release(&host, "alice", "Work.Q1.Jan").await;

        let entries = host.list("alice", "", "Work*", false).await.unwrap().unwrap();
        assert_eq!(
            names(&entries),
            vec!["#user.alice.Work", "#user.alice.Work.Q1", "#user.alice.Work.Q1.Jan"]
        );
    }

    #[tokio::test]
    async fn test_create_needs_rights_on_parent() {
        let host = host().await;
        assert!(matches!(
            host.create("bob", "#user.alice.Shared").await,
            Err(MailError::Unauthorized(_))
        ));

        let root = host.get("alice", "#user.alice").await.unwrap();
        root.set_rights(
            "alice",
            "bob",
            RightsModification::Add(Rights::LOOKUP | Rights::CREATE),
        )
        .unwrap();
        host.release("alice", Some(root)).await.unwrap();

        let shared = host.create("bob", "#user.alice.Shared").await.unwrap();
        assert_eq!(shared.owner(), "alice");
        host.release("bob", Some(shared)).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_outside_known_namespace() {
        let host = host().await;
        let err = host.create("alice", "#news.rust").await.unwrap_err();
        assert_eq!(err.not_found_status(), Some(NotFoundStatus::NotLocal));
        assert!(host.create("alice", "Bad*").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_blocked_while_open() {
        let host = host().await;
        create_and_release(&host, "alice", "Foo").await;

        let other_session = host.get("alice", "Foo").await.unwrap();
        assert!(matches!(
            host.delete("alice", "Foo", false).await,
            Err(MailError::MailboxInUse(_))
        ));

        // The holder itself may delete its own selection
        assert!(host.delete("alice", "Foo", true).await.unwrap());
        assert!(!host.is_cached("#user.alice.Foo").await);
        host.release("alice", Some(other_session)).await.unwrap();

        let err = host.get("alice", "Foo").await.unwrap_err();
        assert_eq!(err.not_found_status(), Some(NotFoundStatus::NotLocal));

        // Hard-deleted names can be reused
        create_and_release(&host, "alice", "Foo").await;
    }

    #[tokio::test]
    async fn test_stale_handle_after_delete_leaves_new_mailbox_alone() {
        let host = host().await;
        let name = "#user.alice.Foo";
        create_and_release(&host, "alice", "Foo").await;

        let old = host.get("alice", "Foo").await.unwrap();
        assert!(host.delete("alice", "Foo", true).await.unwrap());
        let new = host.create("alice", "Foo").await.unwrap();

        host.release("alice", Some(old)).await.unwrap();
        assert!(host.is_cached(name).await);
        assert_eq!(host.reference_count(name).await, 1);

        new.append(Vec::new(), Utc::now(), b"Subject: a\r\n\r\nb".to_vec(), false);
        let again = host.get("alice", "Foo").await.unwrap();
        assert!(Arc::ptr_eq(&again, &new));
        assert_eq!(again.exists(), 1);

        host.release("alice", Some(again)).await.unwrap();
        host.release("alice", Some(new)).await.unwrap();
        assert!(!host.is_cached(name).await);

        let reopened = host.get("alice", "Foo").await.unwrap();
        assert_eq!(reopened.exists(), 1);
        host.release("alice", Some(reopened)).await.unwrap();
    }

    /// Message store that tracks which mailboxes have backing storage
    #[derive(Default)]
    struct TrackingMessageStore {
        inner: MemoryMessageStore,
        stored: parking_lot::Mutex<std::collections::HashSet<String>>,
    }

    #[async_trait]
    impl MessageStore for TrackingMessageStore {
        async fn load(&self, mailbox: &str) -> Result<Vec<crate::mailbox::Message>> {
            self.inner.load(mailbox).await
        }

        async fn save(&self, mailbox: &str, messages: &[crate::mailbox::Message]) -> Result<()> {
            self.stored.lock().insert(mailbox.to_string());
            self.inner.save(mailbox, messages).await
        }

        async fn rename(&self, old: &str, new: &str) -> Result<()> {
            {
                let mut stored = self.stored.lock();
                if stored.remove(old) {
                    stored.insert(new.to_string());
                }
            }
            self.inner.rename(old, new).await
        }

        async fn destroy(&self, mailbox: &str) -> Result<()> {
            self.stored.lock().remove(mailbox);
            self.inner.destroy(mailbox).await
        }
    }

    #[tokio::test]
    async fn test_tombstone_release_does_not_recreate_storage() {
        let messages = Arc::new(TrackingMessageStore::default());
        let users = Arc::new(MemoryUsersRepository::new());
        users.add_user("alice", "secret").await.unwrap();
        let host = MailboxHost::new(
            Arc::new(MemoryRecordStore::new()),
            messages.clone(),
            users,
            Namespace::default(),
        )
        .await
        .unwrap();
        host.create_user_account("alice").await.unwrap();
        create_and_release(&host, "alice", "Work").await;
        create_and_release(&host, "alice", "Work.Q1").await;
        assert!(messages.stored.lock().contains("#user.alice.Work"));

        let work = host.get("alice", "Work").await.unwrap();
        assert!(host.delete("alice", "Work", true).await.unwrap());
        assert!(!messages.stored.lock().contains("#user.alice.Work"));

        host.release("alice", Some(work)).await.unwrap();
        assert!(!host.is_cached("#user.alice.Work").await);
        assert!(!messages.stored.lock().contains("#user.alice.Work"));
        assert!(messages.stored.lock().contains("#user.alice.Work.Q1"));
    }

    #[tokio::test]
    async fn test_delete_with_children_tombstones() {
        let host = host().await;
        create_and_release(&host, "alice", "Work.Q1").await;
        host.append("alice", "Work", Vec::new(), Utc::now(), b"Subject: a\r\n\r\nb".to_vec())
            .await
            .unwrap();

        assert!(host.delete("alice", "Work", false).await.unwrap());

        let err = host.get("alice", "Work").await.unwrap_err();
        assert_eq!(err.not_found_status(), Some(NotFoundStatus::LocalButDeleted));

        let entries = host.list("alice", "", "Work*", false).await.unwrap().unwrap();
        assert_eq!(entries[0].name, "#user.alice.Work");
        assert_eq!(entries[0].attributes, vec![NOSELECT]);
        assert!(entries[1].is_selectable());

        // Tombstones block reuse and cannot be deleted again while children remain
        assert!(matches!(
            host.create("alice", "Work").await,
            Err(MailError::AlreadyExists(_))
        ));
        assert!(matches!(
            host.delete("alice", "Work", false).await,
            Err(MailError::Unauthorized(_))
        ));

        assert!(host.delete("alice", "Work.Q1", false).await.unwrap());
        assert!(host.delete("alice", "Work", false).await.unwrap());
        assert!(host.list("alice", "", "Work*", false).await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_requires_rights() {
        let host = host().await;
        create_and_release(&host, "alice", "Foo").await;
        let foo = host.get("alice", "Foo").await.unwrap();
        foo.set_rights("alice", "bob", RightsModification::Replace(Rights::LOOKUP))
            .unwrap();
        host.release("alice", Some(foo)).await.unwrap();

        assert!(matches!(
            host.delete("bob", "#user.alice.Foo", false).await,
            Err(MailError::Unauthorized(_))
        ));
        assert!(matches!(
            host.delete("alice", "INBOX", false).await,
            Err(MailError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_wildcard_list() {
        let host = host().await;
        create_and_release(&host, "alice", "Drafts").await;
        create_and_release(&host, "alice", "Work.Q1.Jan").await;

        let all = host.list("alice", "", "*", false).await.unwrap().unwrap();
        assert_eq!(
            names(&all),
            vec![
                "#user.alice.Drafts",
                "#user.alice.INBOX",
                "#user.alice.Work",
                "#user.alice.Work.Q1",
                "#user.alice.Work.Q1.Jan"
            ]
        );

        let top = host.list("alice", "", "%", false).await.unwrap().unwrap();
        assert_eq!(
            names(&top),
            vec!["#user.alice.Drafts", "#user.alice.INBOX", "#user.alice.Work"]
        );

        let children = host.list("alice", "Work.", "%", false).await.unwrap().unwrap();
        assert_eq!(names(&children), vec!["#user.alice.Work.Q1"]);

        assert!(host.list("alice", "", "W*rk", false).await.unwrap().is_none());

        let hint = host.list("alice", "", "", false).await.unwrap().unwrap();
        assert_eq!(hint.len(), 1);
        assert_eq!(hint[0].name, "");
        assert_eq!(hint[0].delimiter, '.');

        // bob sees nothing of alice's
        let theirs = host.list("bob", "", "#user.alice.*", false).await.unwrap().unwrap();
        assert!(theirs.is_empty());
    }

    #[tokio::test]
    async fn test_subscriptions() {
        let host = host().await;
        create_and_release(&host, "alice", "News").await;
        assert!(host.subscribe("alice", "News").await.unwrap());
        assert!(!host.subscribe("alice", "News").await.unwrap());

        let subscribed = host.list("alice", "", "*", true).await.unwrap().unwrap();
        assert_eq!(names(&subscribed), vec!["#user.alice.News"]);

        assert!(host.unsubscribe("alice", "News").await.unwrap());
        assert!(host.list("alice", "", "*", true).await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rename_moves_descendants() {
        let host = host().await;
        create_and_release(&host, "alice", "Old.A.Deep").await;
        host.append("alice", "Old.A", Vec::new(), Utc::now(), b"x".to_vec())
            .await
            .unwrap();
        let open = host.get("alice", "Old.A").await.unwrap();

        assert!(host.rename("alice", "Old", "Archive.New").await.unwrap());
        assert_eq!(open.name(), "#user.alice.Archive.New.A");
        assert_eq!(host.reference_count("#user.alice.Archive.New.A").await, 1);
        host.release("alice", Some(open)).await.unwrap();

        let entries = host.list("alice", "", "*", false).await.unwrap().unwrap();
        assert_eq!(
            names(&entries),
            vec![
                "#user.alice.Archive",
                "#user.alice.Archive.New",
                "#user.alice.Archive.New.A",
                "#user.alice.Archive.New.A.Deep",
                "#user.alice.INBOX"
            ]
        );
        let moved = host.get("alice", "Archive.New.A").await.unwrap();
        assert_eq!(moved.exists(), 1);
        host.release("alice", Some(moved)).await.unwrap();
    }

    #[tokio::test]
    async fn test_rename_preconditions() {
        let host = host().await;
        create_and_release(&host, "alice", "A").await;
        create_and_release(&host, "alice", "B").await;

        assert!(matches!(
            host.rename("alice", "A", "B").await,
            Err(MailError::AlreadyExists(_))
        ));
        assert!(host.rename("alice", "Missing", "C").await.is_err());
        assert!(host.rename("alice", "A", "A.Sub").await.is_err());
        assert!(matches!(
            host.rename("alice", "INBOX", "Old").await,
            Err(MailError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_rename_partial_failure_is_not_rolled_back() {
        let records = Arc::new(MemoryRecordStore::new());
        let host = host_with(records.clone()).await;
        create_and_release(&host, "alice", "Old.A").await;
        create_and_release(&host, "alice", "Old.B").await;

        // A stray record occupying one of the targets
        records
            .save(&FolderRecord::new("#user.alice.New.B", "alice", 1))
            .await
            .unwrap();

        assert!(!host.rename("alice", "Old", "New").await.unwrap());

        let entries = host.list("alice", "", "*", false).await.unwrap().unwrap();
        let listed = names(&entries);
        assert!(listed.contains(&"#user.alice.New.A"));
        assert!(!listed.contains(&"#user.alice.Old.A"));
        assert!(listed.contains(&"#user.alice.Old.B"));
        assert!(listed.contains(&"#user.alice.Old"));
        assert!(!listed.contains(&"#user.alice.New"));
    }

    #[tokio::test]
    async fn test_status_from_record_and_live() {
        let host = host().await;
        host.deliver("alice", b"Subject: one\r\n\r\n1".to_vec()).await.unwrap();
        host.deliver("alice", b"Subject: two\r\n\r\n2".to_vec()).await.unwrap();

        let items = [StatusItem::Messages, StatusItem::Recent, StatusItem::UidNext];
        assert_eq!(
            host.status("alice", "INBOX", &items).await.unwrap(),
            "MESSAGES 2 RECENT 2 UIDNEXT 3"
        );

        let inbox = host.get("alice", "INBOX").await.unwrap();
        inbox.store_flags(
            &SequenceSet::parse("1").unwrap(),
            false,
            crate::mailbox::StoreOperation::Add,
            &[DELETED.to_string()],
        );
        inbox.expunge();
        assert_eq!(
            host.status("alice", "INBOX", &[StatusItem::Messages, StatusItem::Unseen])
                .await
                .unwrap(),
            "MESSAGES 1 UNSEEN 1"
        );
        assert_eq!(host.reference_count("#user.alice.INBOX").await, 1);
        host.release("alice", Some(inbox)).await.unwrap();

        // Released by a user: recent is gone
        assert_eq!(
            host.status("alice", "INBOX", &[StatusItem::Recent]).await.unwrap(),
            "RECENT 0"
        );
    }

    #[tokio::test]
    async fn test_deliver_creates_account() {
        let host = host().await;
        host.deliver("carol", b"hello".to_vec()).await.unwrap();
        let inbox = host.get("carol", "INBOX").await.unwrap();
        assert_eq!(inbox.exists(), 1);
        assert_eq!(inbox.recent_count(), 1);
        host.release("carol", Some(inbox)).await.unwrap();
    }

    #[tokio::test]
    async fn test_copy_needs_insert_rights() {
        let host = host().await;
        host.deliver("alice", b"Subject: a\r\n\r\nb".to_vec()).await.unwrap();
        create_and_release(&host, "alice", "Saved").await;

        let inbox = host.get("alice", "INBOX").await.unwrap();
        let all = SequenceSet::parse("1:*").unwrap();
        assert_eq!(host.copy("alice", &inbox, &all, false, "Saved").await.unwrap(), 1);
        assert!(host.copy("alice", &inbox, &all, false, "Missing").await.is_err());
        host.release("alice", Some(inbox)).await.unwrap();

        let bob_inbox = host.get("bob", "INBOX").await.unwrap();
        let saved = host.get("alice", "Saved").await.unwrap();
        saved
            .set_rights("alice", "bob", RightsModification::Replace(Rights::LOOKUP))
            .unwrap();
        host.release("alice", Some(saved)).await.unwrap();
        assert!(matches!(
            host.copy("bob", &bob_inbox, &all, false, "#user.alice.Saved").await,
            Err(MailError::Unauthorized(_))
        ));
        host.release("bob", Some(bob_inbox)).await.unwrap();
    }

    #[tokio::test]
    async fn test_home_server() {
        let host = host().await;
        assert!(host.is_home_server("alice").await.unwrap());
        assert!(host.has_local_access("bob").await.unwrap());
        assert!(!host.is_home_server("mallory").await.unwrap());
    }
}
