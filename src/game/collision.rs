//! Collision Detection
//!
//! Axis-aligned box tests between the ball and the paddles, and the rebound
//! that follows a contact.

use std::f64::consts::FRAC_PI_4;

use crate::game::state::{BallState, BoardConfig, Position, Slot};

/// Axis-aligned rectangle (top-left origin).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub w: f64,
    /// Height.
    pub h: f64,
}

impl Rect {
    /// Box occupied by the ball.
    pub fn ball(ball: &BallState, config: &BoardConfig) -> Self {
        Self { x: ball.x, y: ball.y, w: config.ball_side, h: config.ball_side }
    }

    /// Box occupied by a paddle.
    pub fn paddle(paddle: Position, config: &BoardConfig) -> Self {
        Self { x: paddle.x, y: paddle.y, w: config.paddle_width, h: config.paddle_height }
    }
}

/// Check if two boxes overlap. Touching edges do not count.
#[inline]
pub fn rects_overlap(a: Rect, b: Rect) -> bool {
    a.x < b.x + b.w
        && a.x + a.w > b.x
        && a.y < b.y + b.h
        && a.y + a.h > b.y
}

/// Offset of the ball centre from the paddle centre, normalized to [-1, 1].
///
/// Negative means the ball struck the upper half.
pub fn normalized_offset(ball: &BallState, paddle: Position, config: &BoardConfig) -> f64 {
    let half = config.paddle_height / 2.0;
    let offset = (ball.y + config.ball_side / 2.0) - (paddle.y + half);
    offset.clamp(-half, half) / half
}

/// Rebound the ball off a slot's paddle.
///
/// The contact point picks an angle in [-45°, 45°], speed grows by the
/// speed-up factor up to the cap, and the horizontal velocity always points
/// away from the paddle that was hit.
pub fn rebound(ball: &mut BallState, paddle: Position, slot: Slot, config: &BoardConfig) {
    let angle = FRAC_PI_4 * normalized_offset(ball, paddle, config);

    ball.speed = (ball.speed * config.speed_up_multiple).min(config.max_speed);

    let x_vel = (ball.speed * angle.cos()).abs();
    ball.x_vel = match slot {
        Slot::Player1 => x_vel,
        Slot::Player2 => -x_vel,
    };
    ball.y_vel = ball.speed * angle.sin();
}

/// Test one paddle against the ball and rebound on contact.
///
/// Returns whether a contact was registered.
pub fn resolve_paddle_contact(
    ball: &mut BallState,
    paddle: Position,
    slot: Slot,
    config: &BoardConfig,
) -> bool {
    if !rects_overlap(Rect::ball(ball, config), Rect::paddle(paddle, config)) {
        return false;
    }

    rebound(ball, paddle, slot, config);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ball_at(x: f64, y: f64, x_vel: f64, speed: f64) -> BallState {
        BallState { x, y, x_vel, y_vel: 0.0, speed }
    }

    #[test]
    fn test_rects_overlap() {
        let a = Rect { x: 0.0, y: 0.0, w: 10.0, h: 10.0 };
        let b = Rect { x: 5.0, y: 5.0, w: 10.0, h: 10.0 };
        assert!(rects_overlap(a, b));

        // Shared edge is not an overlap
        let c = Rect { x: 10.0, y: 0.0, w: 10.0, h: 10.0 };
        assert!(!rects_overlap(a, c));

        let d = Rect { x: 0.0, y: 30.0, w: 10.0, h: 10.0 };
        assert!(!rects_overlap(a, d));
    }

    #[test]
    fn test_centre_hit_rebounds_flat() {
        let config = BoardConfig::default();
        let paddle = config.paddle_start(Slot::Player1);
        // Ball centre (y + 5) level with paddle centre (225 + 25)
        let mut ball = ball_at(19.5, 245.0, -7.5, 7.5);

        assert!(resolve_paddle_contact(&mut ball, paddle, Slot::Player1, &config));
        assert!((ball.speed - 7.65).abs() < 1e-9);
        assert!((ball.x_vel - 7.65).abs() < 1e-9);
        assert!(ball.y_vel.abs() < 1e-9);
    }

    #[test]
    fn test_edge_hit_rebounds_at_45_degrees() {
        let config = BoardConfig::default();
        let paddle = config.paddle_start(Slot::Player2);
        // Ball near the paddle's bottom edge: offset clamps to +1
        let mut ball = ball_at(670.0, 274.0, 7.5, 7.5);

        assert_eq!(normalized_offset(&ball, paddle, &config), 1.0);
        assert!(resolve_paddle_contact(&mut ball, paddle, Slot::Player2, &config));

        assert!(ball.x_vel < 0.0);
        assert!(ball.y_vel > 0.0);
        assert!((ball.x_vel.abs() - ball.y_vel).abs() < 1e-9);
    }

    #[test]
    fn test_upper_half_hit_goes_up() {
        let config = BoardConfig::default();
        let paddle = config.paddle_start(Slot::Player1);
        let mut ball = ball_at(19.5, 222.0, -7.5, 7.5);

        assert!(resolve_paddle_contact(&mut ball, paddle, Slot::Player1, &config));
        assert!(ball.x_vel > 0.0);
        assert!(ball.y_vel < 0.0);
    }

    #[test]
    fn test_speed_is_capped() {
        let config = BoardConfig::default();
        let paddle = config.paddle_start(Slot::Player1);
        let mut ball = ball_at(19.5, 245.0, -19.9, 19.9);

        rebound(&mut ball, paddle, Slot::Player1, &config);
        assert_eq!(ball.speed, config.max_speed);
        assert!((ball.x_vel - config.max_speed).abs() < 1e-9);
    }

    #[test]
    fn test_miss_leaves_ball_untouched() {
        let config = BoardConfig::default();
        let paddle = config.paddle_start(Slot::Player1);
        let mut ball = ball_at(19.5, 100.0, -7.5, 7.5);
        let before = ball;

        assert!(!resolve_paddle_contact(&mut ball, paddle, Slot::Player1, &config));
        assert_eq!(ball, before);
    }
}
