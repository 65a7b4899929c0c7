//! Game Session
//!
//! One live match: the simulation state plus everything the network layer
//! needs around it (serve RNG, held paddle intents, readiness, broadcast
//! group, timestamps). A session is shared as `Arc<RwLock<GameSession>>`;
//! every read-modify-write on it happens under that lock.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, debug};

use crate::core::rng::{entropy_salt, DeterministicRng};
use crate::game::events::GameEvent;
use crate::game::input::{Direction, PaddleIntents};
use crate::game::state::{
    BoardConfig, ConfigError, MatchState, PlayerIdentity, RejectReason, SessionKey,
    SessionStatus, Slot, SlotAssignment, StatusError,
};
use crate::game::tick::{apply_intents, move_paddle, serve_ball, tick, Serve, TickResult};
use crate::network::broadcast::{Broadcaster, ConnectionId};
use crate::network::protocol::{ServerMessage, Snapshot};
use crate::network::repository::SessionRepository;

/// Shared handle to a live session.
pub type SessionHandle = Arc<RwLock<GameSession>>;

/// Notice sent to both players when the match starts.
pub const GAME_START_MESSAGE: &str = "Game is starting!";

// =============================================================================
// CONFIGURATION
// =============================================================================

/// When the simulation advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickMode {
    /// Per-session loop at `tick_rate` Hz.
    #[default]
    FixedRate,
    /// One tick per accepted move.
    OnInput,
}

impl FromStr for TickMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed_rate" => Ok(TickMode::FixedRate),
            "on_input" => Ok(TickMode::OnInput),
            other => Err(ConfigError::InvalidValue { name: "tick_mode", value: other.to_string() }),
        }
    }
}

/// When a full session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPolicy {
    /// As soon as both slots are filled.
    #[default]
    Auto,
    /// Once both seated players have sent `ready`.
    Ready,
}

impl FromStr for StartPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(StartPolicy::Auto),
            "ready" => Ok(StartPolicy::Ready),
            other => Err(ConfigError::InvalidValue { name: "start_policy", value: other.to_string() }),
        }
    }
}

/// Configuration applied to every new session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Board geometry and ball tuning.
    pub board: BoardConfig,
    /// Tick cadence.
    pub tick_mode: TickMode,
    /// Start policy.
    pub start_policy: StartPolicy,
    /// Tick rate for the fixed-rate loop (Hz).
    pub tick_rate: u32,
    /// Fixed seed salt for reproducible serves. Fresh entropy when unset.
    pub rng_seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            board: BoardConfig::default(),
            tick_mode: TickMode::default(),
            start_policy: StartPolicy::default(),
            tick_rate: crate::DEFAULT_TICK_RATE,
            rng_seed: None,
        }
    }
}

impl SessionConfig {
    /// Validate board and tick rate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.board.validate()?;
        if self.tick_rate == 0 || self.tick_rate > 1000 {
            return Err(ConfigError::InvalidValue {
                name: "tick_rate",
                value: self.tick_rate.to_string(),
            });
        }
        Ok(())
    }

    /// Interval between fixed-rate ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.tick_rate.max(1) as u64)
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Session errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// Slot request refused.
    #[error("Slot request rejected: {0}")]
    Rejected(#[from] RejectReason),

    /// Connection holds no slot.
    #[error("Not seated in a session")]
    NotSeated,

    /// Illegal status transition.
    #[error("{0}")]
    Status(#[from] StatusError),
}

// =============================================================================
// SESSION RECORD
// =============================================================================

/// Process-wide record revision clock.
static REVISION_CLOCK: AtomicU64 = AtomicU64::new(1);

/// Next revision. Drawn under the session lock, so revisions for one key
/// follow the order of its state changes, across incarnations too.
fn next_revision() -> u64 {
    REVISION_CLOCK.fetch_add(1, Ordering::Relaxed)
}

/// Serialisable view of a session handed to the repository.
///
/// Saves happen after the session lock is released and can arrive out of
/// order; `revision` lets the repository keep only the newest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Ordering stamp, higher is newer.
    pub revision: u64,
    /// Match state.
    #[serde(flatten)]
    pub state: MatchState,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Last state change.
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// GAME SESSION
// =============================================================================

/// A live match session.
pub struct GameSession {
    state: MatchState,
    rng: DeterministicRng,
    intents: PaddleIntents,
    ready: BTreeSet<Slot>,
    connections: Broadcaster,
    /// Set once the session is destroyed; holders of a stale handle must let go.
    closed: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl GameSession {
    /// Create a pending session.
    pub fn new(key: SessionKey, config: &SessionConfig) -> Self {
        let salt = config.rng_seed.unwrap_or_else(entropy_salt);
        let now = Utc::now();

        Self {
            state: MatchState::new(key, config.board.clone()),
            rng: DeterministicRng::for_session(key.as_bytes(), salt),
            intents: PaddleIntents::new(),
            ready: BTreeSet::new(),
            connections: Broadcaster::new(),
            closed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Session key.
    pub fn key(&self) -> SessionKey {
        self.state.key
    }

    /// Match state.
    pub fn state(&self) -> &MatchState {
        &self.state
    }

    /// Match state, mutably. Status and slots stay behind `MatchState`'s own transitions.
    pub fn state_mut(&mut self) -> &mut MatchState {
        &mut self.state
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    /// Has the session been destroyed?
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Mark destroyed. Tick loops and late joiners observe this and back off.
    ///
    /// Returns the tombstone revision for the repository.
    pub(crate) fn close(&mut self) -> u64 {
        self.closed = true;
        self.intents = PaddleIntents::new();
        next_revision()
    }

    /// Number of connections in the broadcast group.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Held intent of a slot.
    pub fn intent(&self, slot: Slot) -> Direction {
        self.intents.get(slot)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    // -------------------------------------------------------------------------
    // Membership
    // -------------------------------------------------------------------------

    /// Seat an identity and, on success, join its connection to the broadcast group.
    pub fn join(
        &mut self,
        identity: PlayerIdentity,
        connection: ConnectionId,
        sender: mpsc::Sender<ServerMessage>,
    ) -> SlotAssignment {
        let assignment = self.state.assign_slot(identity);
        if let SlotAssignment::Assigned(slot) = assignment {
            self.connections.subscribe(connection, sender);
            self.intents.clear(slot);
            self.ready.remove(&slot);
            self.touch();
            info!("Session {} seated {} ({}/2)", self.key().short(), slot, self.state.occupied_count());
        }
        assignment
    }

    /// Leave the broadcast group and release the identity's slot.
    pub fn leave(&mut self, identity: &PlayerIdentity, connection: ConnectionId) -> Option<Slot> {
        self.connections.unsubscribe(connection);
        let slot = self.state.release_slot(identity)?;
        self.intents.clear(slot);
        self.ready.remove(&slot);
        self.touch();
        info!("Session {} released {}", self.key().short(), slot);
        Some(slot)
    }

    /// Record that a slot is ready. Returns whether both seated players are now ready.
    pub fn mark_ready(&mut self, slot: Slot) -> bool {
        if self.state.occupant(slot).is_some() {
            self.ready.insert(slot);
        }
        self.state.is_full() && Slot::ALL.iter().all(|s| self.ready.contains(s))
    }

    // -------------------------------------------------------------------------
    // Simulation
    // -------------------------------------------------------------------------

    /// Pending -> InProgress, with the opening serve in a random direction.
    pub fn start(&mut self) -> Result<(), StatusError> {
        self.state.start()?;
        serve_ball(&mut self.state, &mut self.rng, Serve::Random);
        self.touch();
        info!("Session {} started", self.key().short());
        Ok(())
    }

    /// Store a slot's held direction for the fixed-rate loop.
    pub fn set_intent(&mut self, slot: Slot, direction: Direction) {
        self.intents.set(slot, direction);
    }

    /// Move one paddle, then run one tick.
    pub fn apply_move(&mut self, slot: Slot, direction: Direction) -> TickResult {
        move_paddle(&mut self.state, slot, direction);
        let result = tick(&mut self.state, &mut self.rng);
        self.after_tick(&result);
        result
    }

    /// Apply both held intents, then run one tick.
    pub fn run_tick(&mut self) -> TickResult {
        apply_intents(&mut self.state, &self.intents);
        let result = tick(&mut self.state, &mut self.rng);
        self.after_tick(&result);
        result
    }

    fn after_tick(&mut self, result: &TickResult) {
        if !result.events.is_empty() {
            self.touch();
        }
        for event in &result.events {
            match event {
                GameEvent::Scored { slot, score } => {
                    info!("Session {}: {} scored ({})", self.key().short(), slot, score);
                }
                GameEvent::GameOver { winner } => {
                    info!(
                        "Session {} finished, {} wins {}-{}",
                        self.key().short(),
                        winner,
                        self.state.score(Slot::Player1),
                        self.state.score(Slot::Player2),
                    );
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Output
    // -------------------------------------------------------------------------

    /// Current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::from(&self.state)
    }

    /// Send a message to every connection in the group.
    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        self.connections.send(message)
    }

    /// Send the current snapshot to every connection in the group.
    pub fn broadcast_snapshot(&self) -> usize {
        self.broadcast(&ServerMessage::GameUpdate(self.snapshot()))
    }

    /// Record for the repository.
    pub fn record(&self) -> SessionRecord {
        SessionRecord {
            revision: next_revision(),
            state: self.state.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

// =============================================================================
// FIXED-RATE TICK LOOP
// =============================================================================

/// Spawn the fixed-rate loop for a session that has just started.
pub fn spawn_tick_loop(
    session: SessionHandle,
    tick_interval: Duration,
    repository: Arc<dyn SessionRepository>,
) -> JoinHandle<()> {
    tokio::spawn(run_tick_loop(session, tick_interval, repository))
}

/// Tick until the session finishes or is destroyed.
async fn run_tick_loop(
    session: SessionHandle,
    tick_interval: Duration,
    repository: Arc<dyn SessionRepository>,
) {
    let mut ticker = interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let key = session.read().await.key();
    debug!("Tick loop for session {} running every {:?}", key.short(), tick_interval);

    loop {
        ticker.tick().await;

        let (record, match_ended) = {
            let mut s = session.write().await;
            if s.is_closed() || s.status() != SessionStatus::InProgress {
                break;
            }

            let result = s.run_tick();
            s.broadcast_snapshot();

            let record = (!result.events.is_empty()).then(|| s.record());
            (record, result.match_ended)
        };

        if let Some(record) = record {
            repository.save(&record);
        }

        if match_ended {
            break;
        }
    }

    debug!("Tick loop for session {} stopped", key.short());
}
