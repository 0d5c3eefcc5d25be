//! Kernel settings
//!
//! Loaded from JSON by the host; every field has a default so partial files work.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::consts::*;
use crate::error::{Error, Result};
use crate::sim::RateAdaptation;

/// Clock configuration (the debug-tooling surface)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockSettings {
    /// Desired logical ticks per real second (0 = uncapped real frame delta)
    pub target_rate: u32,
    /// Seconds per measured frame rate window
    pub measurement_window_seconds: f32,
    /// How the real frame-rate cap follows the measured rate
    pub rate_adaptation: RateAdaptation,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            target_rate: DEFAULT_TARGET_RATE,
            measurement_window_seconds: DEFAULT_MEASUREMENT_WINDOW,
            rate_adaptation: RateAdaptation::None,
        }
    }
}

/// Axis-aligned play area in world units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Playfield {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
}

impl Default for Playfield {
    fn default() -> Self {
        // Portrait field centred on the origin
        Self {
            left: -192.0,
            right: 192.0,
            bottom: -224.0,
            top: 224.0,
        }
    }
}

impl Playfield {
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.top - self.bottom
    }

    /// Point at fractional coordinates, (0, 0) is the centre and (1, 1) the top-right corner
    pub fn at(&self, fx: f32, fy: f32) -> Vec2 {
        let center = Vec2::new(
            (self.left + self.right) * 0.5,
            (self.bottom + self.top) * 0.5,
        );
        center + Vec2::new(fx * self.width() * 0.5, fy * self.height() * 0.5)
    }

    /// True if `pos` lies within the field grown by `margin` on every side
    pub fn contains(&self, pos: Vec2, margin: f32) -> bool {
        pos.x >= self.left - margin
            && pos.x <= self.right + margin
            && pos.y >= self.bottom - margin
            && pos.y <= self.top + margin
    }
}

/// Kernel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub clock: ClockSettings,
    /// Seed for the simulation RNG
    pub seed: u64,
    pub playfield: Playfield,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            clock: ClockSettings::default(),
            seed: 0x5eed,
            playfield: Playfield::default(),
        }
    }
}

impl Settings {
    /// Parse settings from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Settings =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))?;
        let settings = Self::from_json(&json)?;
        log::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let window = self.clock.measurement_window_seconds;
        if !(window > 0.0 && window.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "measurement_window_seconds must be positive, got {window}"
            )));
        }
        if self.playfield.width() <= 0.0 || self.playfield.height() <= 0.0 {
            return Err(Error::InvalidConfig("playfield has no area".into()));
        }
        Ok(())
    }
}
