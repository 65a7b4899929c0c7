//! Game Events
//!
//! Events emitted by the physics tick.

use serde::{Serialize, Deserialize};
use crate::game::state::Slot;

/// Something that happened during a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    /// A slot scored one point.
    Scored {
        /// Scoring slot.
        slot: Slot,
        /// Score after the point.
        score: u32,
    },
    /// A slot reached points-to-win.
    GameOver {
        /// Winning slot.
        winner: Slot,
    },
}
