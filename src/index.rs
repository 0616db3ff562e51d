// Search Index
// A live, named projection instance: the pairing of an index definition
// with one authorization context. Mutation of the backing backend index is
// serialised on the per-index write lock; the status word is the only
// record of the index's lifecycle position.

use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use tokio::sync::Mutex;

use crate::authorization::AllowedGroups;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Valid,
    Invalid,
    Updating,
    Deleted,
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexStatus::Valid => "valid",
            IndexStatus::Invalid => "invalid",
            IndexStatus::Updating => "updating",
            IndexStatus::Deleted => "deleted",
        };
        write!(f, "{name}")
    }
}

/// A search index bound to one `(type, allowed groups)` identity.
///
/// # Invariants
/// - `name` is the pure function `index_name(type_name, allowed_groups)`
/// - document writes and rebuilds hold `write_lock`
/// - `Deleted` is terminal; no transition leaves it
pub struct SearchIndex {
    pub uri: String,
    pub name: String,
    pub type_name: String,
    pub allowed_groups: AllowedGroups,
    pub used_groups: AllowedGroups,
    pub is_eager: bool,
    status: RwLock<IndexStatus>,
    write_lock: Mutex<()>,
}

impl SearchIndex {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        uri: String,
        name: String,
        type_name: String,
        allowed_groups: AllowedGroups,
        used_groups: AllowedGroups,
        is_eager: bool,
        status: IndexStatus,
    ) -> Self {
        Self {
            uri,
            name,
            type_name,
            allowed_groups,
            used_groups,
            is_eager,
            status: RwLock::new(status),
            write_lock: Mutex::new(()),
        }
    }

    pub fn status(&self) -> IndexStatus {
        *self.status.read()
    }

    /// Transition the status word, returning the previous status.
    /// Transitions out of `Deleted` are refused.
    pub fn transition(&self, next: IndexStatus) -> IndexStatus {
        let mut status = self.status.write();
        let previous = *status;
        if previous != IndexStatus::Deleted {
            *status = next;
        }
        previous
    }

    /// The mutex serialising bulk rebuilds, single-document writes, and the
    /// status transitions around them.
    pub fn write_lock(&self) -> &Mutex<()> {
        &self.write_lock
    }
}

impl fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchIndex")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("allowed_groups", &self.allowed_groups.cache_key())
            .field("is_eager", &self.is_eager)
            .field("status", &self.status())
            .finish()
    }
}
