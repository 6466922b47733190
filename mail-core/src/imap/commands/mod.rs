//! The IMAP command set, one unit per verb
//!
//! - [`any`]: CAPABILITY, NOOP, LOGOUT
//! - [`auth`]: LOGIN, AUTHENTICATE
//! - [`mailboxes`]: SELECT/EXAMINE, CREATE, DELETE, RENAME, SUBSCRIBE,
//!   LIST/LSUB, STATUS, NAMESPACE
//! - [`append`]: APPEND
//! - [`acl`]: GETACL, SETACL, DELETEACL, LISTRIGHTS, MYRIGHTS
//! - [`selected`]: CHECK, CLOSE, EXPUNGE, SEARCH, STORE, COPY
//! - [`fetch`]: FETCH
//! - [`uid`]: the UID prefix

pub mod acl;
pub mod any;
pub mod append;
pub mod auth;
pub mod fetch;
pub mod mailboxes;
pub mod selected;
pub mod uid;

use crate::imap::command::{Command, RightsGuard};
use crate::mailbox::Rights;
use std::sync::Arc;

fn guarded(inner: impl Command + 'static, rights: Rights, needs_write: bool) -> Arc<dyn Command> {
    Arc::new(RightsGuard::new(Arc::new(inner), rights, needs_write))
}

/// Every command, selected-state ones wrapped in their rights guard
pub fn all() -> Vec<Arc<dyn Command>> {
    vec![
        Arc::new(any::Capability),
        Arc::new(any::Noop),
        Arc::new(any::Logout),
        Arc::new(auth::Login),
        Arc::new(auth::Authenticate),
        Arc::new(mailboxes::Select { read_only: false }),
        Arc::new(mailboxes::Select { read_only: true }),
        Arc::new(mailboxes::Create),
        Arc::new(mailboxes::Delete),
        Arc::new(mailboxes::Rename),
        Arc::new(mailboxes::Subscribe { subscribe: true }),
        Arc::new(mailboxes::Subscribe { subscribe: false }),
        Arc::new(mailboxes::List { subscribed_only: false }),
        Arc::new(mailboxes::List { subscribed_only: true }),
        Arc::new(mailboxes::Status),
        Arc::new(mailboxes::Namespace),
        Arc::new(append::Append),
        Arc::new(acl::GetAcl),
        Arc::new(acl::SetAcl),
        Arc::new(acl::DeleteAcl),
        Arc::new(acl::ListRights),
        Arc::new(acl::MyRights),
        Arc::new(selected::Check),
        Arc::new(selected::Close),
        guarded(selected::Expunge, Rights::DELETE, true),
        guarded(selected::Search, Rights::READ, false),
        guarded(fetch::Fetch, Rights::READ, false),
        // STORE checks s/w/d per flag itself
        guarded(selected::Store, Rights::empty(), true),
        guarded(selected::Copy, Rights::READ, false),
        Arc::new(uid::Uid),
    ]
}
