//! Session Registry
//!
//! The process-wide arena of live sessions, keyed by session key. Sessions
//! are created on first connect and destroyed when their last occupant
//! leaves.
//!
//! Lock order: the map lock is never held while waiting on a session lock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{info, debug};

use crate::game::state::{PlayerIdentity, SessionKey, Slot, SlotAssignment};
use crate::network::broadcast::ConnectionId;
use crate::network::protocol::ServerMessage;
use crate::network::repository::{NullRepository, SessionRepository};
use crate::network::session::{GameSession, SessionConfig, SessionError, SessionHandle, SessionRecord};

/// A successful slot request.
pub struct Assignment {
    /// The session joined.
    pub session: SessionHandle,
    /// Slot granted.
    pub slot: Slot,
    /// Whether this assignment filled the second slot.
    pub both_filled: bool,
}

/// What happened when a connection let go of its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Slot cleared; the other slot is still occupied.
    Vacated(Slot),
    /// Last occupant left; the session is gone.
    Destroyed,
    /// The identity held no slot (already released, or session already closed).
    NotSeated,
}

/// Repository write owed after a release.
enum Persist {
    Save(SessionRecord),
    Delete(u64),
    Nothing,
}

/// Owns every live session.
pub struct SessionRegistry {
    sessions: RwLock<BTreeMap<SessionKey, SessionHandle>>,
    config: SessionConfig,
    repository: Arc<dyn SessionRepository>,
    next_connection_id: AtomicU64,
}

impl SessionRegistry {
    /// Create a registry that persists nothing.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_repository(config, Arc::new(NullRepository))
    }

    /// Create a registry backed by a repository.
    pub fn with_repository(config: SessionConfig, repository: Arc<dyn SessionRepository>) -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            config,
            repository,
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Configuration for new sessions.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Repository handle.
    pub fn repository(&self) -> Arc<dyn SessionRepository> {
        self.repository.clone()
    }

    /// Allocate a connection identifier.
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Get a live session.
    pub async fn get(&self, key: &SessionKey) -> Option<SessionHandle> {
        self.sessions.read().await.get(key).cloned()
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Get a session, creating it with the default config if absent.
    pub async fn get_or_create(&self, key: SessionKey) -> SessionHandle {
        if let Some(session) = self.get(&key).await {
            return session;
        }

        let (session, created) = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(&key) {
                Some(existing) => (existing.clone(), None),
                None => {
                    let session = GameSession::new(key, &self.config);
                    let record = session.record();
                    let handle = Arc::new(RwLock::new(session));
                    sessions.insert(key, handle.clone());
                    (handle, Some(record))
                }
            }
        };

        if let Some(record) = created {
            info!("Created session {}", key);
            self.repository.save(&record);
        }

        session
    }

    /// Seat an identity in the session for `key` and subscribe its connection.
    ///
    /// A session closed by a concurrent teardown is skipped and a fresh one
    /// is created in its place.
    pub async fn assign_slot(
        &self,
        key: SessionKey,
        identity: PlayerIdentity,
        connection: ConnectionId,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<Assignment, SessionError> {
        loop {
            let session = self.get_or_create(key).await;

            let outcome = {
                let mut s = session.write().await;
                if s.is_closed() {
                    None
                } else {
                    let outcome = match s.join(identity.clone(), connection, sender.clone()) {
                        SlotAssignment::Assigned(slot) => Ok((slot, s.state().is_full(), s.record())),
                        SlotAssignment::Rejected(reason) => Err(reason),
                    };
                    Some(outcome)
                }
            };

            match outcome {
                None => {
                    debug!("Session {} closed during join, retrying", key.short());
                    self.remove_if_current(&key, &session).await;
                }
                Some(Ok((slot, both_filled, record))) => {
                    self.repository.save(&record);
                    return Ok(Assignment { session, slot, both_filled });
                }
                Some(Err(reason)) => return Err(SessionError::Rejected(reason)),
            }
        }
    }

    /// Release an identity's slot; destroy the session if both slots are now empty.
    pub async fn release_slot(
        &self,
        session: &SessionHandle,
        identity: &PlayerIdentity,
        connection: ConnectionId,
    ) -> ReleaseOutcome {
        let (key, outcome, persist) = {
            let mut s = session.write().await;
            let key = s.key();
            if s.is_closed() {
                return ReleaseOutcome::NotSeated;
            }

            match s.leave(identity, connection) {
                None => (key, ReleaseOutcome::NotSeated, Persist::Nothing),
                Some(_) if s.state().is_empty() => {
                    let tombstone = s.close();
                    (key, ReleaseOutcome::Destroyed, Persist::Delete(tombstone))
                }
                Some(slot) => (key, ReleaseOutcome::Vacated(slot), Persist::Save(s.record())),
            }
        };

        if outcome == ReleaseOutcome::Destroyed {
            self.remove_if_current(&key, session).await;
            info!("Destroyed session {}", key);
        }

        match persist {
            Persist::Save(record) => self.repository.save(&record),
            Persist::Delete(revision) => self.repository.delete(&key, revision),
            Persist::Nothing => {}
        }

        outcome
    }

    /// Drop the map entry for `key` only if it still points at `session`.
    async fn remove_if_current(&self, key: &SessionKey, session: &SessionHandle) {
        let mut sessions = self.sessions.write().await;
        if sessions.get(key).is_some_and(|current| Arc::ptr_eq(current, session)) {
            sessions.remove(key);
        }
    }
}
