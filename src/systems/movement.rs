//! Movement: physics integration, controls and boundary responses.
//!
//! Every function here is pure: it takes a [`Kinematics`] value and returns
//! a new one. Publishing the result is the store's job.

use crate::clock::secs_between;
use crate::components::Kinematics;
use tracing::warn;

/// Distance a rebounding body is placed inside the boundary.
pub const REBOUND_EPSILON: f64 = 0.0001;

/// Steps above this many seconds are logged as suspicious.
pub const MAX_SANE_DT: f64 = 0.5;

/// Physics model attached to a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrator {
    /// Thrust, acceleration and velocity are integrated every tick.
    Integrating,
    /// The body never moves; snapshots only get a fresh timestamp.
    Null,
}

impl Integrator {
    /// Compute the snapshot for time `now_ns` from `old`.
    ///
    /// Velocity uses `v1 = v0 + a*dt` and position advances by the average
    /// of old and new velocity (trapezoidal). `dt` outside `(0, 0.5]` is
    /// logged but integrated as-is.
    pub fn integrate(self, old: &Kinematics, now_ns: u64) -> Kinematics {
        match self {
            Integrator::Null => old.with_timestamp(now_ns),
            Integrator::Integrating => {
                let dt = secs_between(old.timestamp_ns, now_ns);
                if dt <= 0.0 || dt > MAX_SANE_DT {
                    warn!(dt, "integrator step outside the expected range");
                }
                integrate_step(old, dt, now_ns)
            }
        }
    }

    /// Whether boundary rebounds apply to bodies with this integrator.
    #[inline]
    pub fn is_reboundable(self) -> bool {
        matches!(self, Integrator::Integrating)
    }
}

fn integrate_step(old: &Kinematics, dt: f64, now_ns: u64) -> Kinematics {
    let (hx, hy) = old.heading();
    let acc_x = old.acc_x + old.thrust * hx;
    let acc_y = old.acc_y + old.thrust * hy;

    let speed_x = old.speed_x + acc_x * dt;
    let speed_y = old.speed_y + acc_y * dt;

    let pos_x = old.pos_x + (old.speed_x + speed_x) * 0.5 * dt;
    let pos_y = old.pos_y + (old.speed_y + speed_y) * 0.5 * dt;

    let angular_speed = old.angular_speed + old.angular_acc * dt;
    let angle = (old.angle + old.angular_speed * dt + 0.5 * old.angular_acc * dt * dt).rem_euclid(360.0);

    Kinematics {
        timestamp_ns: now_ns,
        pos_x,
        pos_y,
        angle,
        speed_x,
        speed_y,
        angular_speed,
        ..*old
    }
}

// ============================================================================
// CONTROLS
// ============================================================================

/// Change to a body's motion requested from outside its tick.
///
/// Controls are queued on the body and folded into its kinematics at the
/// start of its next tick, by the thread that owns it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Control {
    SetThrust(f64),
    /// Zero acceleration and thrust.
    StopPushing,
    AngularAccelerationInc(f64),
    SetAngularSpeed(f64),
    SetAngularAcceleration(f64),
    ResetAcceleration,
    SetDirectAcceleration { acc_x: f64, acc_y: f64 },
    SetAngle(f64),
    /// Add `acc_inc` to the angular acceleration, first giving a body at
    /// rest `kickoff_speed` of angular speed.
    Rotate { acc_inc: f64, kickoff_speed: f64 },
}

impl Control {
    pub fn apply(self, k: Kinematics) -> Kinematics {
        match self {
            Control::SetThrust(thrust) => Kinematics { thrust, ..k },
            Control::StopPushing => Kinematics { acc_x: 0.0, acc_y: 0.0, thrust: 0.0, ..k },
            Control::AngularAccelerationInc(inc) => Kinematics { angular_acc: k.angular_acc + inc, ..k },
            Control::SetAngularSpeed(angular_speed) => Kinematics { angular_speed, ..k },
            Control::SetAngularAcceleration(angular_acc) => Kinematics { angular_acc, ..k },
            Control::ResetAcceleration => Kinematics { acc_x: 0.0, acc_y: 0.0, ..k },
            Control::SetDirectAcceleration { acc_x, acc_y } => Kinematics { acc_x, acc_y, ..k },
            Control::SetAngle(angle) => Kinematics { angle: angle.rem_euclid(360.0), ..k },
            Control::Rotate { acc_inc, kickoff_speed } => {
                let angular_speed = if k.angular_speed == 0.0 { kickoff_speed } else { k.angular_speed };
                Kinematics {
                    angular_speed,
                    angular_acc: k.angular_acc + acc_inc,
                    ..k
                }
            }
        }
    }
}

// ============================================================================
// BOUNDARY RESPONSES
// ============================================================================

/// Direction a body travels after bouncing off a world edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rebound {
    /// Bounced off the west edge.
    East,
    /// Bounced off the east edge.
    West,
    /// Bounced off the south edge.
    North,
    /// Bounced off the north edge.
    South,
}

/// Flip one velocity axis and snap the position just inside the edge.
/// Everything else is preserved.
pub fn rebound(k: &Kinematics, towards: Rebound, width: f64, height: f64) -> Kinematics {
    let mut out = *k;
    match towards {
        Rebound::East => {
            out.speed_x = -k.speed_x;
            out.pos_x = REBOUND_EPSILON;
        }
        Rebound::West => {
            out.speed_x = -k.speed_x;
            out.pos_x = width - REBOUND_EPSILON;
        }
        Rebound::South => {
            out.speed_y = -k.speed_y;
            out.pos_y = REBOUND_EPSILON;
        }
        Rebound::North => {
            out.speed_y = -k.speed_y;
            out.pos_y = height - REBOUND_EPSILON;
        }
    }
    out
}

/// Park at the world centre with no acceleration or thrust. Velocity and
/// angle are kept.
pub fn move_to_center(k: &Kinematics, width: f64, height: f64) -> Kinematics {
    Kinematics {
        pos_x: width / 2.0,
        pos_y: height / 2.0,
        acc_x: 0.0,
        acc_y: 0.0,
        thrust: 0.0,
        ..*k
    }
}

/// Keep the previous position (clamped into the world) and stop dead.
/// Angle and angular terms are kept.
pub fn freeze(old: &Kinematics, now_ns: u64, width: f64, height: f64) -> Kinematics {
    Kinematics {
        timestamp_ns: now_ns,
        pos_x: clamp_axis(old.pos_x, width),
        pos_y: clamp_axis(old.pos_y, height),
        speed_x: 0.0,
        speed_y: 0.0,
        acc_x: 0.0,
        acc_y: 0.0,
        ..*old
    }
}

#[inline]
fn clamp_axis(v: f64, limit: f64) -> f64 {
    if v < 0.0 {
        0.0
    } else if v >= limit {
        limit - 1.0
    } else {
        v
    }
}
