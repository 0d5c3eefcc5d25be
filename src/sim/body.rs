//! Per-entity kinematic state
//!
//! Every pooled instance carries one [`Body`]. It is integrated once per tick
//! against the clock's delta and reset to template defaults whenever the
//! instance is reactivated, so nothing leaks between reuses.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::{direction, signed_angle};

/// Prototype an instance is cloned from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    /// Radius at which this entity's shots appear
    pub fire_radius: f32,
    /// Radius used when placing the entity itself (e.g. just off-screen)
    pub body_radius: f32,
    /// Initial heading-link flag after every reset
    pub heading_link: bool,
}

impl Template {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fire_radius: 0.0,
            body_radius: 0.0,
            heading_link: true,
        }
    }

    pub fn with_radii(mut self, fire_radius: f32, body_radius: f32) -> Self {
        self.fire_radius = fire_radius;
        self.body_radius = body_radius;
        self
    }

    pub fn with_heading_link(mut self, heading_link: bool) -> Self {
        self.heading_link = heading_link;
        self
    }
}

/// Full set of motion parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Motion {
    pub speed: f32,
    pub acceleration: f32,
    pub speed_limit: f32,
    pub heading: f32,
    pub angular_speed: f32,
    pub angular_acceleration: f32,
    pub angular_speed_limit: f32,
}

/// Kinematic state of one entity (angles in degrees, speeds in units/s)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub position: Vec2,
    heading: f32,
    /// Visual orientation
    pub body_heading: f32,
    /// When set, `body_heading` follows `heading`
    pub heading_link: bool,
    pub speed: f32,
    pub acceleration: f32,
    pub speed_limit: f32,
    pub angular_speed: f32,
    pub angular_acceleration: f32,
    pub angular_speed_limit: f32,
    fire_radius: f32,
    body_radius: f32,
}

impl Body {
    /// Neutral body for a freshly constructed instance of `template`
    pub fn from_template(template: &Template) -> Self {
        let mut body = Self {
            position: Vec2::ZERO,
            heading: 0.0,
            body_heading: 0.0,
            heading_link: template.heading_link,
            speed: 0.0,
            acceleration: 0.0,
            speed_limit: 0.0,
            angular_speed: 0.0,
            angular_acceleration: 0.0,
            angular_speed_limit: 0.0,
            fire_radius: template.fire_radius,
            body_radius: template.body_radius,
        };
        body.reset(template);
        body
    }

    /// Clear motion state back to neutral; position is left alone
    pub fn reset(&mut self, template: &Template) {
        self.speed = 0.0;
        self.acceleration = 0.0;
        self.speed_limit = 0.0;
        self.angular_speed = 0.0;
        self.angular_acceleration = 0.0;
        self.angular_speed_limit = 0.0;
        self.heading_link = template.heading_link;
        self.heading = 0.0;
        self.body_heading = 0.0;
        self.fire_radius = template.fire_radius;
        self.body_radius = template.body_radius;
    }

    /// Movement heading in degrees
    pub fn heading(&self) -> f32 {
        self.heading
    }

    /// Set the movement heading; a linked body turns with it
    pub fn set_heading(&mut self, heading: f32) {
        self.heading = heading;
        if self.heading_link {
            self.body_heading = heading;
        }
    }

    pub fn fire_radius(&self) -> f32 {
        self.fire_radius
    }

    pub fn body_radius(&self) -> f32 {
        self.body_radius
    }

    /// Current velocity vector
    pub fn velocity(&self) -> Vec2 {
        direction(self.heading) * self.speed
    }

    pub fn is_stopped(&self) -> bool {
        self.speed == 0.0
    }

    /// Advance by `dt` seconds: turn, move, then accelerate toward the limits
    pub fn integrate(&mut self, dt: f32) {
        self.heading += self.angular_speed * dt;
        self.position += direction(self.heading) * self.speed * dt;
        if self.heading_link {
            self.body_heading = self.heading;
        }

        self.speed = approach_limit(self.speed, self.acceleration, self.speed_limit, dt);
        self.angular_speed = approach_limit(
            self.angular_speed,
            self.angular_acceleration,
            self.angular_speed_limit,
            dt,
        );
    }

    pub fn set_movement(&mut self, speed: f32, heading: f32) {
        self.speed = speed;
        self.set_heading(heading);
    }

    pub fn set_motion(&mut self, motion: Motion) {
        self.speed = motion.speed;
        self.acceleration = motion.acceleration;
        self.speed_limit = motion.speed_limit;
        self.set_heading(motion.heading);
        self.angular_speed = motion.angular_speed;
        self.angular_acceleration = motion.angular_acceleration;
        self.angular_speed_limit = motion.angular_speed_limit;
    }

    pub fn motion(&self) -> Motion {
        Motion {
            speed: self.speed,
            acceleration: self.acceleration,
            speed_limit: self.speed_limit,
            heading: self.heading,
            angular_speed: self.angular_speed,
            angular_acceleration: self.angular_acceleration,
            angular_speed_limit: self.angular_speed_limit,
        }
    }

    /// Decelerate so the body comes to rest on `dest` after `t` seconds.
    ///
    /// Uses `a = -2|s|/t²`, `speed = -a·t` with a speed limit of zero; pair it
    /// with a stop wait.
    pub fn set_dest_at_time(&mut self, dest: Vec2, t: f32) {
        let s = dest - self.position;
        self.acceleration = -2.0 * s.length() / (t * t);
        self.speed = -self.acceleration * t;
        self.speed_limit = 0.0;
        self.set_heading(signed_angle(s));
    }

    /// Signed angle from this body to `point`
    pub fn angle_to(&self, point: Vec2) -> f32 {
        signed_angle(point - self.position)
    }
}

/// Move `value` toward `limit` at `rate` without crossing it.
///
/// Accelerating only applies while below the limit, decelerating only while
/// above; zero rate leaves the value unchanged.
pub fn approach_limit(value: f32, rate: f32, limit: f32, dt: f32) -> f32 {
    if rate > 0.0 && value < limit {
        (value + rate * dt).min(limit)
    } else if rate < 0.0 && value > limit {
        (value + rate * dt).max(limit)
    } else {
        value
    }
}
