//! Paddle Input
//!
//! Move directions as sent by clients, and the per-slot intent buffer the
//! fixed-rate tick loop samples.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Deserialize};
use crate::game::state::Slot;

/// Paddle move direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Towards y = 0.
    Up,
    /// Towards the bottom edge.
    Down,
    /// Hold position.
    #[default]
    Stop,
}

impl Direction {
    /// Sign of the y change for one step.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Direction::Up => -1.0,
            Direction::Down => 1.0,
            Direction::Stop => 0.0,
        }
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
            Direction::Stop => "STOP",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(Direction::Up),
            "DOWN" => Ok(Direction::Down),
            "STOP" => Ok(Direction::Stop),
            other => Err(other.to_string()),
        }
    }
}

/// Latest direction per slot.
///
/// A client sends a direction on key-down and STOP on key-up, so the intent
/// is held until replaced rather than consumed by a single tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PaddleIntents {
    player1: Direction,
    player2: Direction,
}

impl PaddleIntents {
    /// Create with both paddles stopped.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a slot's intent.
    pub fn set(&mut self, slot: Slot, direction: Direction) {
        match slot {
            Slot::Player1 => self.player1 = direction,
            Slot::Player2 => self.player2 = direction,
        }
    }

    /// Current intent of a slot.
    pub fn get(&self, slot: Slot) -> Direction {
        match slot {
            Slot::Player1 => self.player1,
            Slot::Player2 => self.player2,
        }
    }

    /// Stop a slot's paddle.
    pub fn clear(&mut self, slot: Slot) {
        self.set(slot, Direction::Stop);
    }
}
