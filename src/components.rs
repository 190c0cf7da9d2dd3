//! Core data types shared by every part of the simulation.
//!
//! These are plain values: identifiers, category and state tags, and the
//! immutable kinematics snapshot that each tick publishes.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// IDENTITY
// ============================================================================

/// Unique identifier for a body. Allocated by the store, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BodyId(pub u64);

impl fmt::Display for BodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier for an emitter attached to a body (trail, weapon, generic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmitterId(pub u32);

/// What kind of body this is. Drives batching, collision and removal rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BodyCategory {
    /// Free-moving body, capacity bounded by `max_dynamic_bodies`.
    Dynamic,
    /// Player-controlled ship. Ticked in its own batch.
    Player,
    /// Emitted by a shooter; immune to it for a short window.
    Projectile,
    /// Static visual. Never collides.
    Decorator,
    /// Static collider. Never initiates collision checks.
    Gravity,
}

impl BodyCategory {
    /// Categories that integrate physics every tick.
    #[inline]
    pub fn is_moving(self) -> bool {
        matches!(self, Self::Dynamic | Self::Player | Self::Projectile)
    }

    /// Categories that never integrate.
    #[inline]
    pub fn is_static(self) -> bool {
        !self.is_moving()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dynamic => "Dynamic",
            Self::Player => "Player",
            Self::Projectile => "Projectile",
            Self::Decorator => "Decorator",
            Self::Gravity => "Gravity",
        }
    }
}

/// Lifecycle state of a body.
///
/// Legal transitions: `Starting -> Alive -> (HandsOff -> Alive)* -> Dead`.
/// `HandsOff -> Dead` happens when a body dies inside its own tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BodyState {
    Starting = 0,
    Alive = 1,
    HandsOff = 2,
    Dead = 3,
}

impl BodyState {
    #[inline]
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Starting,
            1 => Self::Alive,
            2 => Self::HandsOff,
            _ => Self::Dead,
        }
    }
}

/// Lightweight reference carried by domain events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BodyRef {
    pub id: BodyId,
    pub category: BodyCategory,
}

impl BodyRef {
    pub fn new(id: BodyId, category: BodyCategory) -> Self {
        Self { id, category }
    }
}

// ============================================================================
// KINEMATICS
// ============================================================================

/// World boundary a body has crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LimitEdge {
    /// `x < 0`
    West,
    /// `x >= width`
    East,
    /// `y < 0`
    North,
    /// `y >= height`
    South,
}

/// Immutable kinematic state of a body at a point in time.
///
/// Angles are in degrees. Each tick builds a new value and publishes it;
/// a published value is never edited while another thread can see it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Kinematics {
    /// Clock reading (nanoseconds) this snapshot was computed for.
    pub timestamp_ns: u64,
    pub pos_x: f64,
    pub pos_y: f64,
    pub angle: f64,
    pub size: f64,
    pub speed_x: f64,
    pub speed_y: f64,
    pub acc_x: f64,
    pub acc_y: f64,
    pub angular_speed: f64,
    pub angular_acc: f64,
    pub thrust: f64,
}

impl Kinematics {
    /// Snapshot at rest at the given position.
    pub fn at(timestamp_ns: u64, pos_x: f64, pos_y: f64, size: f64) -> Self {
        Self {
            timestamp_ns,
            pos_x,
            pos_y,
            size,
            ..Default::default()
        }
    }

    pub fn with_timestamp(mut self, timestamp_ns: u64) -> Self {
        self.timestamp_ns = timestamp_ns;
        self
    }

    pub fn with_speed(mut self, speed_x: f64, speed_y: f64) -> Self {
        self.speed_x = speed_x;
        self.speed_y = speed_y;
        self
    }

    pub fn with_acceleration(mut self, acc_x: f64, acc_y: f64) -> Self {
        self.acc_x = acc_x;
        self.acc_y = acc_y;
        self
    }

    pub fn with_angle(mut self, angle: f64) -> Self {
        self.angle = angle;
        self
    }

    /// Unit vector pointing along the heading.
    #[inline]
    pub fn heading(&self) -> (f64, f64) {
        let rad = self.angle.to_radians();
        (rad.cos(), rad.sin())
    }

    /// Radius of the collision circle: half the size, shrunk by 10%.
    #[inline]
    pub fn collision_radius(&self) -> f64 {
        self.size * 0.5 * 0.9
    }

    #[inline]
    pub fn is_thrusting(&self) -> bool {
        self.thrust != 0.0
    }
}

/// Circle-circle overlap test on the shrunken collision radii.
pub fn circles_intersect(a: &Kinematics, b: &Kinematics) -> bool {
    let dx = a.pos_x - b.pos_x;
    let dy = a.pos_y - b.pos_y;
    let reach = a.collision_radius() + b.collision_radius();
    dx * dx + dy * dy <= reach * reach
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip_through_u8() {
        for state in [
            BodyState::Starting,
            BodyState::Alive,
            BodyState::HandsOff,
            BodyState::Dead,
        ] {
            assert_eq!(BodyState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_collision_radius_is_shrunk() {
        let k = Kinematics::at(0, 0.0, 0.0, 20.0);
        assert!((k.collision_radius() - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_circles_intersect() {
        let a = Kinematics::at(0, 0.0, 0.0, 20.0);
        // Radii are 9 each, so 18 apart touches and 18.5 does not
        let b = Kinematics::at(0, 18.0, 0.0, 20.0);
        let c = Kinematics::at(0, 18.5, 0.0, 20.0);
        assert!(circles_intersect(&a, &b));
        assert!(!circles_intersect(&a, &c));
    }

    #[test]
    fn test_heading() {
        let k = Kinematics::default().with_angle(90.0);
        let (dx, dy) = k.heading();
        assert!(dx.abs() < 1e-12);
        assert!((dy - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_category_groups() {
        assert!(BodyCategory::Player.is_moving());
        assert!(BodyCategory::Projectile.is_moving());
        assert!(BodyCategory::Gravity.is_static());
        assert!(BodyCategory::Decorator.is_static());
    }
}
