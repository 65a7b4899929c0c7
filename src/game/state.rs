//! Match State Definitions
//!
//! The mutable record for one match: board configuration, slot occupants,
//! paddle positions, ball, score and status. Everything here is plain data
//! plus the transitions that guard its invariants; locking lives in
//! `network::session`.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Deserialize};
use thiserror::Error;

// =============================================================================
// SESSION KEY
// =============================================================================

/// Unique session identifier (UUID).
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(pub uuid::Uuid);

impl SessionKey {
    /// Generate a fresh random key.
    pub fn new_v4() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionKey {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

// =============================================================================
// PLAYER IDENTITY
// =============================================================================

/// Identity of a slot occupant.
///
/// Anonymous connections get a UUID; externally identified players keep
/// whatever string the collaborator handed them.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerIdentity(String);

impl PlayerIdentity {
    /// Wrap an externally supplied identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Issue a fresh anonymous identity.
    pub fn anonymous() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// SLOT & STATUS
// =============================================================================

/// One of the two player positions in a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    /// Left paddle.
    Player1,
    /// Right paddle.
    Player2,
}

impl Slot {
    /// Both slots in assignment order.
    pub const ALL: [Slot; 2] = [Slot::Player1, Slot::Player2];

    /// The other slot.
    pub fn opponent(self) -> Slot {
        match self {
            Slot::Player1 => Slot::Player2,
            Slot::Player2 => Slot::Player1,
        }
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Player1 => "player1",
            Slot::Player2 => "player2",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session status. Only ever moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Waiting for players.
    Pending,
    /// Match running.
    InProgress,
    /// Someone reached points-to-win.
    Finished,
}

impl SessionStatus {
    /// The single status this one may advance to.
    pub fn successor(self) -> Option<SessionStatus> {
        match self {
            SessionStatus::Pending => Some(SessionStatus::InProgress),
            SessionStatus::InProgress => Some(SessionStatus::Finished),
            SessionStatus::Finished => None,
        }
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// BOARD CONFIG
// =============================================================================

/// Board geometry and ball tuning for one session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Board width.
    pub width: f64,
    /// Board height.
    pub height: f64,
    /// Paddle height.
    pub paddle_height: f64,
    /// Paddle width.
    pub paddle_width: f64,
    /// Paddle travel per step.
    pub paddle_speed: f64,
    /// Ball side length (the ball is square).
    pub ball_side: f64,
    /// Ball speed after every serve.
    pub start_speed: f64,
    /// Speed multiplier applied on each paddle contact.
    pub speed_up_multiple: f64,
    /// Hard cap on ball speed.
    pub max_speed: f64,
    /// Score that ends the match.
    pub points_to_win: u32,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            width: 700.0,
            height: 500.0,
            paddle_height: 50.0,
            paddle_width: 12.0,
            paddle_speed: 5.0,
            ball_side: 10.0,
            start_speed: 7.5,
            speed_up_multiple: 1.02,
            max_speed: 20.0,
            points_to_win: 3,
        }
    }
}

impl BoardConfig {
    /// Gap between a board edge and its paddle.
    pub fn x_margin(&self) -> f64 {
        self.ball_side * 1.2
    }

    /// Left edge of the player2 paddle.
    pub fn p2_xpos(&self) -> f64 {
        self.width - self.x_margin() - self.paddle_width
    }

    /// Paddle y that centres it vertically.
    pub fn p_y_mid(&self) -> f64 {
        self.height / 2.0 - self.paddle_height / 2.0
    }

    /// Ball x that centres it horizontally.
    pub fn b_x_mid(&self) -> f64 {
        self.width / 2.0 - self.ball_side / 2.0
    }

    /// Ball y that centres it vertically.
    pub fn b_y_mid(&self) -> f64 {
        self.height / 2.0 - self.ball_side / 2.0
    }

    /// Lowest legal paddle y.
    pub fn max_paddle_y(&self) -> f64 {
        self.height - self.paddle_height
    }

    /// Fixed x of a slot's paddle.
    pub fn paddle_x(&self, slot: Slot) -> f64 {
        match slot {
            Slot::Player1 => self.x_margin(),
            Slot::Player2 => self.p2_xpos(),
        }
    }

    /// Starting position of a slot's paddle.
    pub fn paddle_start(&self, slot: Slot) -> Position {
        Position {
            x: self.paddle_x(slot),
            y: self.p_y_mid(),
        }
    }

    /// Clamp a paddle y into the board.
    pub fn clamp_paddle_y(&self, y: f64) -> f64 {
        y.clamp(0.0, self.max_paddle_y())
    }

    /// Check that the physics can run without degenerate geometry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("width", self.width),
            ("height", self.height),
            ("paddle_height", self.paddle_height),
            ("paddle_width", self.paddle_width),
            ("paddle_speed", self.paddle_speed),
            ("ball_side", self.ball_side),
            ("start_speed", self.start_speed),
            ("max_speed", self.max_speed),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NotPositive(name));
            }
        }

        if self.paddle_height > self.height {
            return Err(ConfigError::PaddleTooTall);
        }
        if self.ball_side >= self.height || self.p2_xpos() <= self.x_margin() + self.paddle_width {
            return Err(ConfigError::BoardTooSmall);
        }
        if self.start_speed > self.max_speed {
            return Err(ConfigError::StartAboveMax);
        }
        if !(self.speed_up_multiple.is_finite() && self.speed_up_multiple >= 1.0) {
            return Err(ConfigError::SpeedUpBelowOne);
        }
        if self.points_to_win == 0 {
            return Err(ConfigError::ZeroPointsToWin);
        }

        Ok(())
    }
}

/// Board configuration errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A dimension or speed is zero, negative or not finite.
    #[error("{0} must be a positive number")]
    NotPositive(&'static str),
    /// Paddle taller than the board.
    #[error("paddle_height exceeds board height")]
    PaddleTooTall,
    /// Paddles would overlap or the ball cannot fit.
    #[error("board too small for paddles and ball")]
    BoardTooSmall,
    /// Serve speed already above the cap.
    #[error("start_speed exceeds max_speed")]
    StartAboveMax,
    /// Contacts would slow the ball down.
    #[error("speed_up_multiple must be >= 1")]
    SpeedUpBelowOne,
    /// A match nobody can win.
    #[error("points_to_win must be at least 1")]
    ZeroPointsToWin,
    /// Unparseable setting value.
    #[error("invalid value for {name}: {value}")]
    InvalidValue {
        /// Setting name.
        name: &'static str,
        /// Raw value supplied.
        value: String,
    },
}

// =============================================================================
// POSITIONS
// =============================================================================

/// Top-left corner of a paddle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
}

/// Both paddle positions, keyed by slot name on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerPositions {
    /// Left paddle.
    pub player1: Position,
    /// Right paddle.
    pub player2: Position,
}

impl PlayerPositions {
    /// Get a slot's paddle.
    pub fn get(&self, slot: Slot) -> Position {
        match slot {
            Slot::Player1 => self.player1,
            Slot::Player2 => self.player2,
        }
    }

    /// Get a slot's paddle mutably.
    pub fn get_mut(&mut self, slot: Slot) -> &mut Position {
        match slot {
            Slot::Player1 => &mut self.player1,
            Slot::Player2 => &mut self.player2,
        }
    }
}

/// Ball position (top-left corner), velocity and scalar speed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallState {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Horizontal velocity per tick.
    pub x_vel: f64,
    /// Vertical velocity per tick.
    pub y_vel: f64,
    /// Scalar speed.
    pub speed: f64,
}

// =============================================================================
// SLOT ASSIGNMENT
// =============================================================================

/// Why a slot request was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum RejectReason {
    /// Both slots already occupied.
    #[error("session is full")]
    Full,
    /// Match already over.
    #[error("session is finished")]
    Finished,
    /// The identity already holds a slot in this session.
    #[error("identity already seated in session")]
    DuplicateIdentity,
}

/// Outcome of a slot request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotAssignment {
    /// Seated in this slot.
    Assigned(Slot),
    /// Refused.
    Rejected(RejectReason),
}

/// Attempted to move status backwards or skip a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("invalid status transition from {from} to {to}")]
pub struct StatusError {
    /// Status before the attempt.
    pub from: SessionStatus,
    /// Requested status.
    pub to: SessionStatus,
}

// =============================================================================
// MATCH STATE
// =============================================================================

/// Complete state of one match.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchState {
    /// Session key.
    pub key: SessionKey,
    /// Lifecycle status.
    status: SessionStatus,
    /// Left slot occupant.
    player1: Option<PlayerIdentity>,
    /// Right slot occupant.
    player2: Option<PlayerIdentity>,
    /// Left score.
    score1: u32,
    /// Right score.
    score2: u32,
    /// Winner once finished.
    winner: Option<Slot>,
    /// Board configuration.
    pub config: BoardConfig,
    /// Paddle positions.
    pub player_positions: PlayerPositions,
    /// Ball.
    pub ball: BallState,
}

impl MatchState {
    /// Create a pending match with paddles and ball centred.
    ///
    /// The ball starts at rest; the physics engine serves it.
    pub fn new(key: SessionKey, config: BoardConfig) -> Self {
        let player_positions = PlayerPositions {
            player1: config.paddle_start(Slot::Player1),
            player2: config.paddle_start(Slot::Player2),
        };
        let ball = BallState {
            x: config.b_x_mid(),
            y: config.b_y_mid(),
            x_vel: 0.0,
            y_vel: 0.0,
            speed: config.start_speed,
        };

        Self {
            key,
            status: SessionStatus::Pending,
            player1: None,
            player2: None,
            score1: 0,
            score2: 0,
            winner: None,
            config,
            player_positions,
            ball,
        }
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Winner, once finished.
    pub fn winner(&self) -> Option<Slot> {
        self.winner
    }

    /// Is the match over?
    pub fn is_finished(&self) -> bool {
        self.status == SessionStatus::Finished
    }

    /// Occupant of a slot.
    pub fn occupant(&self, slot: Slot) -> Option<&PlayerIdentity> {
        match slot {
            Slot::Player1 => self.player1.as_ref(),
            Slot::Player2 => self.player2.as_ref(),
        }
    }

    fn occupant_mut(&mut self, slot: Slot) -> &mut Option<PlayerIdentity> {
        match slot {
            Slot::Player1 => &mut self.player1,
            Slot::Player2 => &mut self.player2,
        }
    }

    /// Slot held by an identity.
    pub fn slot_of(&self, identity: &PlayerIdentity) -> Option<Slot> {
        Slot::ALL
            .into_iter()
            .find(|slot| self.occupant(*slot) == Some(identity))
    }

    /// Number of occupied slots.
    pub fn occupied_count(&self) -> usize {
        Slot::ALL.iter().filter(|s| self.occupant(**s).is_some()).count()
    }

    /// Both slots occupied?
    pub fn is_full(&self) -> bool {
        self.occupied_count() == 2
    }

    /// Both slots empty?
    pub fn is_empty(&self) -> bool {
        self.occupied_count() == 0
    }

    /// Score of a slot.
    pub fn score(&self, slot: Slot) -> u32 {
        match slot {
            Slot::Player1 => self.score1,
            Slot::Player2 => self.score2,
        }
    }

    /// Award one point to a slot. Returns the new score.
    pub(crate) fn award_point(&mut self, slot: Slot) -> u32 {
        let score = match slot {
            Slot::Player1 => &mut self.score1,
            Slot::Player2 => &mut self.score2,
        };
        *score += 1;
        *score
    }

    /// Paddle position of a slot.
    pub fn paddle(&self, slot: Slot) -> Position {
        self.player_positions.get(slot)
    }

    /// Seat an identity in the first free slot.
    pub fn assign_slot(&mut self, identity: PlayerIdentity) -> SlotAssignment {
        if self.is_finished() {
            return SlotAssignment::Rejected(RejectReason::Finished);
        }

        if self.slot_of(&identity).is_some() {
            return SlotAssignment::Rejected(RejectReason::DuplicateIdentity);
        }

        match Slot::ALL.into_iter().find(|s| self.occupant(*s).is_none()) {
            Some(slot) => {
                *self.occupant_mut(slot) = Some(identity);
                SlotAssignment::Assigned(slot)
            }
            None => SlotAssignment::Rejected(RejectReason::Full),
        }
    }

    /// Clear an identity's slot. Returns the slot it held.
    pub fn release_slot(&mut self, identity: &PlayerIdentity) -> Option<Slot> {
        let slot = self.slot_of(identity)?;
        *self.occupant_mut(slot) = None;
        Some(slot)
    }

    /// Pending -> InProgress.
    pub fn start(&mut self) -> Result<(), StatusError> {
        self.advance(SessionStatus::InProgress)
    }

    /// InProgress -> Finished with a winner.
    pub(crate) fn finish(&mut self, winner: Slot) -> Result<(), StatusError> {
        self.advance(SessionStatus::Finished)?;
        self.winner = Some(winner);
        Ok(())
    }

    fn advance(&mut self, to: SessionStatus) -> Result<(), StatusError> {
        if self.status.successor() != Some(to) {
            return Err(StatusError { from: self.status, to });
        }
        self.status = to;
        Ok(())
    }
}
