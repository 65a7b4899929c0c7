//! # Pong Game Server
//!
//! Authoritative server for real-time two-player paddle-and-ball matches,
//! kept in sync with browser clients over WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       PONG SERVER                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  └── rng.rs      - Seeded Xorshift128+ serve randomness      │
//! │                                                              │
//! │  game/           - Match simulation (no I/O, no locks)       │
//! │  ├── state.rs    - Match state, slots, board config          │
//! │  ├── input.rs    - Move directions and held intents          │
//! │  ├── collision.rs- Ball/paddle contact and rebound           │
//! │  ├── tick.rs     - Authoritative physics step                │
//! │  └── events.rs   - Score and game-over events                │
//! │                                                              │
//! │  network/        - Concurrency and transport                 │
//! │  ├── registry.rs - Live session arena                        │
//! │  ├── session.rs  - Locked session + fixed-rate tick loop     │
//! │  ├── connection.rs- Per-client protocol state machine        │
//! │  ├── broadcast.rs- Snapshot fan-out                          │
//! │  ├── repository.rs- Persistence seam                         │
//! │  ├── protocol.rs - Wire messages                             │
//! │  └── server.rs   - WebSocket server                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency
//!
//! Each session lives behind its own `RwLock`. Slot assignment, paddle
//! moves, ticks, readiness and disconnect all run as read-modify-write
//! sequences under that lock, so two players' concurrent messages never
//! overwrite each other. Persistence happens after the lock is released.
//!
//! Given the same seed and the same sequence of moves, the `game/` modules
//! replay a match identically.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::core::rng::DeterministicRng;
pub use crate::game::state::{BoardConfig, MatchState, PlayerIdentity, SessionKey, SessionStatus, Slot};
pub use crate::game::input::Direction;
pub use crate::network::{GameServer, ServerConfig, SessionConfig, SessionRegistry, ConnectionHandler};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default fixed-rate tick rate (Hz)
pub const DEFAULT_TICK_RATE: u32 = 60;
