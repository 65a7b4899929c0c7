//! Session Persistence Seam
//!
//! Storage of session records is owned by an outside collaborator. The
//! registry calls it after each state-changing critical section; it is never
//! used to synchronise concurrent updates.
//!
//! Because calls happen outside the session lock, they can arrive out of
//! order. Every record and every delete carries a revision, and a
//! repository keeps only the highest one it has seen per key. A delete
//! leaves a tombstone so a late save cannot bring a destroyed session back.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::game::state::SessionKey;
use crate::network::session::SessionRecord;

/// Where session records go.
///
/// Calls happen on the async runtime outside any session lock, so
/// implementations must return quickly.
pub trait SessionRepository: Send + Sync {
    /// Store a record unless something newer is already stored for its key.
    fn save(&self, record: &SessionRecord);

    /// Forget a destroyed session as of `revision`.
    fn delete(&self, key: &SessionKey, revision: u64);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRepository;

impl SessionRepository for NullRepository {
    fn save(&self, _record: &SessionRecord) {}

    fn delete(&self, _key: &SessionKey, _revision: u64) {}
}

/// Latest entry for a key: a live record, or a tombstone.
#[derive(Debug)]
struct Stored {
    revision: u64,
    record: Option<SessionRecord>,
}

/// Keeps the latest record per session in memory.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    entries: Mutex<BTreeMap<SessionKey, Stored>>,
}

impl InMemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest record for a live session.
    pub fn get(&self, key: &SessionKey) -> Option<SessionRecord> {
        self.lock().get(key).and_then(|stored| stored.record.clone())
    }

    /// Number of live sessions stored.
    pub fn len(&self) -> usize {
        self.lock().values().filter(|stored| stored.record.is_some()).count()
    }

    /// Nothing live stored?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<SessionKey, Stored>> {
        // A panic while holding the guard leaves plain data behind; keep going.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn put(&self, key: SessionKey, stored: Stored) {
        let mut entries = self.lock();
        if let Some(current) = entries.get(&key) {
            if current.revision >= stored.revision {
                debug!(
                    "Ignoring stale write for session {} (rev {} <= {})",
                    key.short(),
                    stored.revision,
                    current.revision,
                );
                return;
            }
        }
        entries.insert(key, stored);
    }
}

impl SessionRepository for InMemoryRepository {
    fn save(&self, record: &SessionRecord) {
        self.put(record.state.key, Stored { revision: record.revision, record: Some(record.clone()) });
    }

    fn delete(&self, key: &SessionKey, revision: u64) {
        self.put(*key, Stored { revision, record: None });
    }
}
