//! Core primitives.
//!
//! Seeded randomness shared by every session's simulation.

pub mod rng;

// Re-export core types
pub use rng::{DeterministicRng, derive_session_seed};
