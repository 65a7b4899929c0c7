//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are JSON text frames.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer, Deserialize};
use thiserror::Error;

use crate::game::input::Direction;
use crate::game::state::{BallState, MatchState, SessionStatus, Slot};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessage {
    /// Paddle move intent.
    Move {
        /// Requested direction.
        direction: Direction,
    },
    /// Player is ready to start.
    Ready,
}

/// Inbound envelope before validation. Extra fields are ignored.
#[derive(Debug, Deserialize)]
struct RawClientMessage {
    action: String,
    #[serde(default)]
    direction: Option<String>,
}

impl ClientMessage {
    /// Parse and validate an inbound text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawClientMessage = serde_json::from_str(text)?;

        match raw.action.as_str() {
            "move" => {
                let direction = raw
                    .direction
                    .ok_or(ProtocolError::MissingDirection)?
                    .parse::<Direction>()
                    .map_err(ProtocolError::InvalidDirection)?;
                Ok(ClientMessage::Move { direction })
            }
            "ready" => Ok(ClientMessage::Ready),
            _ => Err(ProtocolError::UnknownAction(raw.action)),
        }
    }
}

/// Inbound message errors. Reported back to the sender; the connection stays open.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not JSON, or missing the `action` field.
    #[error("Invalid message format: {0}")]
    Malformed(#[from] serde_json::Error),

    /// `action` is neither `move` nor `ready`.
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// A `move` without a direction.
    #[error("Missing direction")]
    MissingDirection,

    /// A `move` with a direction other than UP, DOWN or STOP.
    #[error("Invalid direction: {0}")]
    InvalidDirection(String),

    /// Binary frame.
    #[error("binary frames are not supported")]
    BinaryFrame,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Authoritative state after a tick.
    GameUpdate(Snapshot),
    /// Both players are in; the match is running.
    GameStart {
        /// Human-readable notice.
        message: String,
    },
    /// The opponent left.
    PlayerDisconnect {
        /// Human-readable notice.
        message: String,
    },
    /// Request could not be handled.
    Error {
        /// Error text.
        message: String,
    },
    /// Server is going down.
    Shutdown {
        /// Reason.
        message: String,
    },
}

impl ServerMessage {
    /// Error reply from any displayable error.
    pub fn error(err: impl std::fmt::Display) -> Self {
        ServerMessage::Error { message: err.to_string() }
    }

    /// `type` field, if the message carries one.
    pub fn kind(&self) -> Option<&'static str> {
        match self {
            ServerMessage::GameUpdate(_) => Some("game_update"),
            ServerMessage::GameStart { .. } => Some("game_start"),
            ServerMessage::PlayerDisconnect { .. } => Some("player_disconnect"),
            ServerMessage::Error { .. } => None,
            ServerMessage::Shutdown { .. } => Some("server_shutdown"),
        }
    }

    /// `status` field.
    pub fn status(&self) -> &'static str {
        match self {
            ServerMessage::GameUpdate(_) => "game_update",
            ServerMessage::GameStart { .. } => "game_starting",
            ServerMessage::PlayerDisconnect { .. } => "player_disconnected",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Shutdown { .. } => "server_shutdown",
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for ServerMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(kind) = self.kind() {
            map.serialize_entry("type", kind)?;
        }
        map.serialize_entry("status", self.status())?;
        match self {
            ServerMessage::GameUpdate(snapshot) => map.serialize_entry("state", snapshot)?,
            ServerMessage::GameStart { message }
            | ServerMessage::PlayerDisconnect { message }
            | ServerMessage::Error { message }
            | ServerMessage::Shutdown { message } => map.serialize_entry("message", message)?,
        }
        map.end()
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// One paddle as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    /// Paddle x.
    pub x: f64,
    /// Paddle y.
    pub y: f64,
    /// Slot score.
    pub score: u32,
    /// Occupant identity, `null` when the slot is empty.
    pub identity: Option<String>,
}

/// Both paddles keyed by slot name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayersSnapshot {
    /// Left paddle.
    pub player1: PlayerSnapshot,
    /// Right paddle.
    pub player2: PlayerSnapshot,
}

/// Full match state broadcast after each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Paddles, scores and occupants.
    pub players: PlayersSnapshot,
    /// Ball.
    pub ball: BallState,
    /// Session status.
    pub status: SessionStatus,
    /// Winner, once finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Slot>,
}

impl Snapshot {
    fn player(state: &MatchState, slot: Slot) -> PlayerSnapshot {
        let paddle = state.paddle(slot);
        PlayerSnapshot {
            x: paddle.x,
            y: paddle.y,
            score: state.score(slot),
            identity: state.occupant(slot).map(|id| id.as_str().to_string()),
        }
    }
}

impl From<&MatchState> for Snapshot {
    fn from(state: &MatchState) -> Self {
        Self {
            players: PlayersSnapshot {
                player1: Snapshot::player(state, Slot::Player1),
                player2: Snapshot::player(state, Slot::Player2),
            },
            ball: state.ball,
            status: state.status(),
            winner: state.winner(),
        }
    }
}
