//! Connection Handler
//!
//! Per-client protocol state machine, independent of the transport. The
//! WebSocket server feeds it text frames; tests drive it directly.
//!
//! Phases: Connecting -> Joined -> Active -> Closed.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn, debug};

use crate::game::input::Direction;
use crate::game::state::{PlayerIdentity, SessionKey, SessionStatus, Slot};
use crate::network::broadcast::ConnectionId;
use crate::network::protocol::{ClientMessage, ProtocolError, ServerMessage};
use crate::network::registry::{ReleaseOutcome, SessionRegistry};
use crate::network::session::{
    spawn_tick_loop, SessionError, SessionHandle, StartPolicy, TickMode, GAME_START_MESSAGE,
};

/// Notice sent to the remaining player when the opponent leaves.
pub const PLAYER_LEFT_MESSAGE: &str = "Your opponent has left the game.";

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Not yet seated.
    Connecting,
    /// Seated, match not running.
    Joined,
    /// Seated, match running or over.
    Active,
    /// Rejected or disconnected.
    Closed,
}

/// Protocol handler for one client connection.
pub struct ConnectionHandler {
    registry: Arc<SessionRegistry>,
    key: SessionKey,
    identity: PlayerIdentity,
    id: ConnectionId,
    outbound: mpsc::Sender<ServerMessage>,
    session: Option<SessionHandle>,
    slot: Option<Slot>,
    phase: ConnectionPhase,
}

impl ConnectionHandler {
    /// Create a handler. Without an external identity the connection gets an anonymous one.
    pub fn new(
        registry: Arc<SessionRegistry>,
        key: SessionKey,
        identity: Option<PlayerIdentity>,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Self {
        let id = registry.next_connection_id();
        Self {
            registry,
            key,
            identity: identity.unwrap_or_else(PlayerIdentity::anonymous),
            id,
            outbound,
            session: None,
            slot: None,
            phase: ConnectionPhase::Connecting,
        }
    }

    /// Connection identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Session key this connection targets.
    pub fn key(&self) -> SessionKey {
        self.key
    }

    /// Identity of this connection.
    pub fn identity(&self) -> &PlayerIdentity {
        &self.identity
    }

    /// Slot held, once joined.
    pub fn slot(&self) -> Option<Slot> {
        self.slot
    }

    /// Session joined, if any.
    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    /// Current phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Find or create the session and take a slot.
    ///
    /// On rejection the connection is closed and nothing is sent.
    pub async fn connect(&mut self) -> Result<Slot, SessionError> {
        if self.phase != ConnectionPhase::Connecting {
            return self.slot.ok_or(SessionError::NotSeated);
        }

        let assignment = match self
            .registry
            .assign_slot(self.key, self.identity.clone(), self.id, self.outbound.clone())
            .await
        {
            Ok(assignment) => assignment,
            Err(e) => {
                warn!("Connection {} refused by session {}: {}", self.id, self.key.short(), e);
                self.phase = ConnectionPhase::Closed;
                return Err(e);
            }
        };

        let slot = assignment.slot;
        self.session = Some(assignment.session.clone());
        self.slot = Some(slot);
        self.phase = ConnectionPhase::Joined;
        info!("Connection {} joined session {} as {}", self.id, self.key.short(), slot);

        if assignment.both_filled && self.registry.config().start_policy == StartPolicy::Auto {
            self.start_match(&assignment.session).await;
        }
        self.refresh_phase().await;

        Ok(slot)
    }

    /// Handle an inbound text frame. Bad payloads get an error reply.
    pub async fn handle_text(&mut self, text: &str) {
        match ClientMessage::parse(text) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => self.reply_error(&e).await,
        }
    }

    /// Reply to this connection only.
    pub async fn reply_error(&self, err: &ProtocolError) {
        debug!("Connection {} protocol error: {}", self.id, err);
        let _ = self.outbound.send(ServerMessage::error(err)).await;
    }

    /// Handle a parsed client message.
    pub async fn handle_message(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Move { direction } => self.handle_move(direction).await,
            ClientMessage::Ready => self.handle_ready().await,
        }
        self.refresh_phase().await;
    }

    async fn handle_move(&mut self, direction: Direction) {
        let (Some(session), Some(slot)) = (self.session.as_ref(), self.slot) else {
            debug!("Connection {} moved without a slot", self.id);
            return;
        };

        let record = {
            let mut s = session.write().await;
            if s.is_closed() || s.state().is_finished() {
                return;
            }

            match self.registry.config().tick_mode {
                TickMode::OnInput => {
                    let result = s.apply_move(slot, direction);
                    s.broadcast_snapshot();
                    (!result.events.is_empty()).then(|| s.record())
                }
                TickMode::FixedRate => {
                    s.set_intent(slot, direction);
                    None
                }
            }
        };

        if let Some(record) = record {
            self.registry.repository().save(&record);
        }
    }

    async fn handle_ready(&mut self) {
        let (Some(session), Some(slot)) = (self.session.clone(), self.slot) else {
            return;
        };

        let both_ready = {
            let mut s = session.write().await;
            !s.is_closed() && s.mark_ready(slot)
        };
        debug!("Connection {} ready in session {}", self.id, self.key.short());

        if both_ready {
            self.start_match(&session).await;
        }
    }

    /// Start a full pending session and tell both players.
    async fn start_match(&self, session: &SessionHandle) {
        let record = {
            let mut s = session.write().await;
            if s.is_closed() || !s.state().is_full() || s.status() != SessionStatus::Pending {
                return;
            }
            if let Err(e) = s.start() {
                warn!("Session {} could not start: {}", self.key.short(), e);
                return;
            }

            s.broadcast(&ServerMessage::GameStart { message: GAME_START_MESSAGE.to_string() });
            s.broadcast_snapshot();
            s.record()
        };

        self.registry.repository().save(&record);

        let config = self.registry.config();
        if config.tick_mode == TickMode::FixedRate {
            spawn_tick_loop(session.clone(), config.tick_interval(), self.registry.repository());
        }
    }

    async fn refresh_phase(&mut self) {
        if self.phase != ConnectionPhase::Joined {
            return;
        }
        if let Some(session) = &self.session {
            if session.read().await.status() != SessionStatus::Pending {
                self.phase = ConnectionPhase::Active;
            }
        }
    }

    /// Release the slot and notify the remaining player.
    pub async fn disconnect(&mut self) {
        if self.phase == ConnectionPhase::Closed {
            return;
        }
        self.phase = ConnectionPhase::Closed;
        self.slot = None;

        let Some(session) = self.session.take() else {
            return;
        };

        match self.registry.release_slot(&session, &self.identity, self.id).await {
            ReleaseOutcome::Vacated(slot) => {
                info!("Connection {} left session {} ({})", self.id, self.key.short(), slot);
                let s = session.read().await;
                s.broadcast(&ServerMessage::PlayerDisconnect {
                    message: PLAYER_LEFT_MESSAGE.to_string(),
                });
            }
            ReleaseOutcome::Destroyed => {
                debug!("Connection {} was the last in session {}", self.id, self.key.short());
            }
            ReleaseOutcome::NotSeated => {}
        }
    }
}
