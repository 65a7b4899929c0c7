//! Network Layer
//!
//! WebSocket server, session registry and per-connection protocol handling.
//! All match simulation runs through `game/`; this layer owns locking,
//! fan-out and transport.

pub mod broadcast;
pub mod connection;
pub mod protocol;
pub mod registry;
pub mod repository;
pub mod session;
pub mod server;

pub use broadcast::{Broadcaster, ConnectionId};
pub use connection::{ConnectionHandler, ConnectionPhase};
pub use protocol::{ClientMessage, ServerMessage, ProtocolError, Snapshot};
pub use registry::{Assignment, ReleaseOutcome, SessionRegistry};
pub use repository::{InMemoryRepository, NullRepository, SessionRepository};
pub use session::{
    GameSession, SessionConfig, SessionError, SessionHandle, SessionRecord, StartPolicy, TickMode,
};
pub use server::{GameServer, ServerConfig, GameServerError, UpgradeTarget, parse_upgrade_target};
