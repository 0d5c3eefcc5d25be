//! Barrage - pooled entity kernel for bullet-hell simulations
//!
//! Core modules:
//! - `sim`: Deterministic simulation kernel (clock, pool, kinematics, behaviors)
//! - `settings`: Clock, playfield and RNG configuration
//! - `error`: Error taxonomy and diagnostic reporting
//!
//! Angles are in degrees everywhere: 0 points along +X, positive is
//! counter-clockwise.

pub mod error;
pub mod settings;
pub mod sim;

pub use error::{Error, ErrorCategory, Result};
pub use settings::{ClockSettings, Playfield, Settings};

use glam::Vec2;

/// Kernel configuration constants
pub mod consts {
    /// Target logical tick rate used when nothing else is configured
    pub const DEFAULT_TARGET_RATE: u32 = 60;
    /// Reference rate assumed by frame-counted waits
    pub const DEFAULT_REFERENCE_RATE: u32 = 60;
    /// Seconds between measured frame rate updates
    pub const DEFAULT_MEASUREMENT_WINDOW: f32 = 1.0;

    /// Tolerance when comparing accumulated simulated time against a deadline
    pub const WAIT_EPSILON: f64 = 1e-9;
    /// Upper bound on behavior steps taken within one resumption
    pub const MAX_STEPS_PER_RESUME: usize = 1024;
    /// Diagnostics kept before the oldest is dropped
    pub const MAX_DIAGNOSTICS: usize = 256;
}

/// Unit vector pointing along `degrees`
#[inline]
pub fn direction(degrees: f32) -> Vec2 {
    let (sin, cos) = degrees.to_radians().sin_cos();
    Vec2::new(cos, sin)
}

/// Signed angle of `v` measured from +X, in degrees within (-180, 180]
#[inline]
pub fn signed_angle(v: Vec2) -> f32 {
    v.y.atan2(v.x).to_degrees()
}

/// Normalize an angle to [-180, 180)
#[inline]
pub fn normalize_degrees(mut angle: f32) -> f32 {
    while angle >= 180.0 {
        angle -= 360.0;
    }
    while angle < -180.0 {
        angle += 360.0;
    }
    angle
}
