//! Deterministic simulation clock
//!
//! Converts the desired logical rate and the host's time scale into one
//! `tick_delta` per tick, and measures the real frame rate over fixed windows.

use serde::{Deserialize, Serialize};

use crate::consts::*;
use crate::error::{self, Error, Result};
use crate::settings::ClockSettings;

/// How the host's real frame-rate cap follows the measured rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RateAdaptation {
    /// Cap tracks `target_rate` directly
    #[default]
    None,
    /// Cap is nudged by desired/measured after each measurement window
    AdaptFromMeasuredRate,
}

/// Clock lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Uninitialized,
    Running,
}

/// Real-time facts the host supplies for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostFrame {
    /// Unscaled wall-clock duration of the frame in seconds
    pub real_delta: f32,
    /// Host time scale (1 = normal, 0 = paused)
    pub time_scale: f32,
}

impl HostFrame {
    pub fn new(real_delta: f32, time_scale: f32) -> Self {
        Self {
            real_delta,
            time_scale,
        }
    }

    /// A frame that took exactly one period of `rate` at normal speed
    pub fn at_rate(rate: u32) -> Self {
        Self::new(1.0 / rate.max(1) as f32, 1.0)
    }
}

/// Simulation clock
#[derive(Debug, Clone)]
pub struct Clock {
    state: ClockState,
    target_rate: u32,
    measurement_window: f32,
    rate_adaptation: RateAdaptation,
    /// Time scale observed on the latest tick
    time_scale: f32,
    tick_delta: f32,
    measured_rate: f32,
    frames_since_window: u32,
    time_since_window: f32,
    /// Real frame-rate cap the host should apply
    frame_cap: u32,
    ticks: u64,
    elapsed: f64,
}

impl Clock {
    /// Create a clock from settings; it starts on the first tick.
    ///
    /// Only a [`World`](crate::sim::World) builds one, so every simulation
    /// context has exactly one clock.
    pub(crate) fn new(settings: &ClockSettings) -> Self {
        Self {
            state: ClockState::Uninitialized,
            target_rate: settings.target_rate,
            measurement_window: if settings.measurement_window_seconds > 0.0 {
                settings.measurement_window_seconds
            } else {
                DEFAULT_MEASUREMENT_WINDOW
            },
            rate_adaptation: settings.rate_adaptation,
            time_scale: 1.0,
            tick_delta: 0.0,
            measured_rate: 0.0,
            frames_since_window: 0,
            time_since_window: 0.0,
            frame_cap: settings.target_rate,
            ticks: 0,
            elapsed: 0.0,
        }
    }

    /// Move to `Running`; later calls do nothing
    pub fn start(&mut self) {
        if self.state == ClockState::Uninitialized {
            self.state = ClockState::Running;
            self.frame_cap = self.target_rate;
            log::debug!("Clock running at target rate {}", self.target_rate);
        }
    }

    /// Advance one tick and return the delta every entity integrates against
    pub fn tick(&mut self, frame: HostFrame) -> f32 {
        self.start();

        let real_delta = frame.real_delta.max(0.0);
        self.time_scale = frame.time_scale;
        self.tick_delta = if self.target_rate > 0 {
            (1.0 / self.target_rate as f32) * self.time_scale
        } else {
            real_delta
        };
        self.ticks += 1;
        self.elapsed += self.tick_delta as f64;

        // Measured rate
        self.frames_since_window += 1;
        self.time_since_window += real_delta;
        let window_closed = self.time_since_window >= self.measurement_window;
        if window_closed {
            self.measured_rate = self.frames_since_window as f32 / self.time_since_window;
            self.frames_since_window = 0;
            self.time_since_window = 0.0;
        }

        match self.rate_adaptation {
            RateAdaptation::None => {
                if self.frame_cap != self.target_rate {
                    self.frame_cap = self.target_rate;
                }
            }
            RateAdaptation::AdaptFromMeasuredRate => {
                if window_closed {
                    self.adapt_frame_cap();
                }
            }
        }

        self.tick_delta
    }

    fn adapt_frame_cap(&mut self) {
        if !(self.measured_rate > 0.0) {
            error::report(&Error::ConfigurationWarning(format!(
                "measured rate {} cannot drive rate adaptation, window skipped",
                self.measured_rate
            )));
            return;
        }
        let base = if self.frame_cap == 0 {
            self.target_rate
        } else {
            self.frame_cap
        };
        let nudged = base as f32 * self.target_rate as f32 / self.measured_rate;
        self.frame_cap = nudged as u32;
        log::debug!(
            "Frame cap nudged to {} (measured {:.2}, target {})",
            self.frame_cap,
            self.measured_rate,
            self.target_rate
        );
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    /// Delta of the latest tick
    pub fn tick_delta(&self) -> f32 {
        self.tick_delta
    }

    /// Time scale seen on the latest tick
    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Takes effect on the next tick
    pub fn set_target_rate(&mut self, rate: u32) {
        self.target_rate = rate;
    }

    pub fn measurement_window(&self) -> f32 {
        self.measurement_window
    }

    pub fn set_measurement_window(&mut self, seconds: f32) -> Result<()> {
        if !(seconds > 0.0 && seconds.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "measurement window must be positive, got {seconds}"
            )));
        }
        self.measurement_window = seconds;
        Ok(())
    }

    pub fn rate_adaptation(&self) -> RateAdaptation {
        self.rate_adaptation
    }

    pub fn set_rate_adaptation(&mut self, mode: RateAdaptation) {
        self.rate_adaptation = mode;
    }

    /// Real frames per second over the last completed window
    pub fn measured_rate(&self) -> f32 {
        self.measured_rate
    }

    /// Real frame-rate cap the host should apply
    pub fn frame_cap(&self) -> u32 {
        self.frame_cap
    }

    /// Ticks since start
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Accumulated simulated seconds
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// True while frame-counted waits at `reference_rate` are exact
    pub fn runs_at(&self, reference_rate: u32) -> bool {
        self.target_rate == reference_rate && self.time_scale == 1.0
    }
}
