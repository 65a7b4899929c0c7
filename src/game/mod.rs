//! Game Logic Module
//!
//! All match simulation code. Given the same seed and the same inputs the
//! simulation replays identically.
//!
//! ## Module Structure
//!
//! - `state`: Match state, slots, board configuration
//! - `input`: Move directions and held paddle intents
//! - `collision`: Ball/paddle contact and rebound
//! - `tick`: Authoritative simulation step
//! - `events`: Score and game-over events

pub mod input;
pub mod state;
pub mod tick;
pub mod collision;
pub mod events;

// Re-export key types
pub use input::{Direction, PaddleIntents};
pub use state::{
    BallState, BoardConfig, ConfigError, MatchState, PlayerIdentity, Position, RejectReason,
    SessionKey, SessionStatus, Slot, SlotAssignment,
};
pub use tick::{TickResult, Serve, tick, move_paddle, apply_intents, serve_ball};
pub use events::GameEvent;
