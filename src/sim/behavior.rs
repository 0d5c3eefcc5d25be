//! Resumable behavior sequences
//!
//! A behavior is a small state machine. Each call to [`Behavior::resume`] runs
//! synchronous logic against its entity through an [`Act`] and returns a
//! [`Step`]: wait on a condition, call a nested behavior, or finish. The world
//! keeps the wait bookkeeping ([`Pending`]) and resumes the behavior on the
//! first tick the condition holds.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::body::Body;
use super::clock::Clock;
use super::world::Act;
use crate::consts::*;
use crate::error::BehaviorError;
use crate::normalize_degrees;

/// Identity of one attached sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceId(pub u64);

/// Suspension conditions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Wait {
    /// Resume on the next tick
    NextTick,
    /// Resume after this many ticks (0 continues immediately)
    Ticks(u32),
    /// Resume once this much simulated time has accumulated
    Seconds(f32),
    /// Resume on the first tick the entity's speed is exactly zero
    Stopped,
    /// Resume after `frames` frames at `reference_rate`.
    ///
    /// Measured in simulated time while the clock runs at the reference rate
    /// with a time scale of 1. Once either stops holding, the remainder is
    /// counted in raw ticks.
    Frames { frames: u32, reference_rate: u32 },
}

impl Wait {
    /// Frame wait against the default reference rate
    pub fn frames(frames: u32) -> Self {
        Wait::Frames {
            frames,
            reference_rate: DEFAULT_REFERENCE_RATE,
        }
    }
}

/// What a behavior wants after one resumption
pub enum Step {
    Wait(Wait),
    /// Run a nested behavior to completion, then resume this one
    Call(Box<dyn Behavior>),
    Done,
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Wait(w) => f.debug_tuple("Wait").field(w).finish(),
            Step::Call(b) => f.debug_tuple("Call").field(&b.name()).finish(),
            Step::Done => f.write_str("Done"),
        }
    }
}

impl From<Wait> for Step {
    fn from(wait: Wait) -> Self {
        Step::Wait(wait)
    }
}

pub type BehaviorResult = Result<Step, BehaviorError>;

/// A resumable procedure bound to one entity
pub trait Behavior {
    fn resume(&mut self, act: &mut Act<'_>) -> BehaviorResult;

    /// Name used in diagnostics
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<B: Behavior + ?Sized> Behavior for Box<B> {
    fn resume(&mut self, act: &mut Act<'_>) -> BehaviorResult {
        (**self).resume(act)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Wait bookkeeping for a suspended sequence
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Pending {
    NextTick,
    Ticks {
        remaining: u32,
    },
    /// Simulated time is summed in f64 so long waits land on the exact tick
    Seconds {
        target: f64,
        elapsed: f64,
    },
    Stopped,
    Frames {
        frames: u32,
        reference_rate: u32,
        target: f64,
        elapsed: f64,
        ticks: u32,
        degraded: bool,
    },
}

impl Pending {
    /// Start waiting; `None` if the condition is already met
    pub(crate) fn begin(wait: Wait, body: &Body) -> Option<Pending> {
        match wait {
            Wait::NextTick => Some(Pending::NextTick),
            Wait::Ticks(0) => None,
            Wait::Ticks(n) => Some(Pending::Ticks { remaining: n }),
            Wait::Seconds(s) if s <= 0.0 => None,
            Wait::Seconds(s) => Some(Pending::Seconds {
                target: s as f64,
                elapsed: 0.0,
            }),
            Wait::Stopped if body.is_stopped() => None,
            Wait::Stopped => Some(Pending::Stopped),
            Wait::Frames { frames: 0, .. } => None,
            Wait::Frames {
                frames,
                reference_rate,
            } => Some(Pending::Frames {
                frames,
                reference_rate,
                target: frames as f64 / reference_rate.max(1) as f64,
                elapsed: 0.0,
                ticks: 0,
                degraded: false,
            }),
        }
    }

    /// Account for one tick; true once the wait is over
    pub(crate) fn poll(&mut self, clock: &Clock, body: &Body) -> bool {
        match self {
            Pending::NextTick => true,
            Pending::Ticks { remaining } => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
            Pending::Seconds { target, elapsed } => {
                *elapsed += clock.tick_delta() as f64;
                *elapsed >= *target - WAIT_EPSILON
            }
            Pending::Stopped => body.is_stopped(),
            Pending::Frames {
                frames,
                reference_rate,
                target,
                elapsed,
                ticks,
                degraded,
            } => {
                *ticks += 1;
                *elapsed += clock.tick_delta() as f64;
                if !*degraded && !clock.runs_at(*reference_rate) {
                    *degraded = true;
                    log::trace!(
                        "Frame wait fell back to tick counting after {} ticks",
                        ticks
                    );
                }
                if *degraded {
                    *ticks >= *frames
                } else {
                    *elapsed >= *target - WAIT_EPSILON
                }
            }
        }
    }
}

/// Behavior backed by a closure
pub struct FnBehavior<F> {
    f: F,
}

/// Build a behavior from a closure called on every resumption
pub fn from_fn<F>(f: F) -> FnBehavior<F>
where
    F: FnMut(&mut Act<'_>) -> BehaviorResult,
{
    FnBehavior { f }
}

impl<F> Behavior for FnBehavior<F>
where
    F: FnMut(&mut Act<'_>) -> BehaviorResult,
{
    fn resume(&mut self, act: &mut Act<'_>) -> BehaviorResult {
        (self.f)(act)
    }

    fn name(&self) -> &str {
        "from_fn"
    }
}

/// Suspend once on `wait`, then finish
pub struct Pause {
    wait: Option<Wait>,
}

pub fn wait(wait: Wait) -> Pause {
    Pause { wait: Some(wait) }
}

impl Behavior for Pause {
    fn resume(&mut self, _act: &mut Act<'_>) -> BehaviorResult {
        Ok(match self.wait.take() {
            Some(w) => Step::Wait(w),
            None => Step::Done,
        })
    }
}

/// Runs behaviors one after another, each to completion
#[derive(Default)]
pub struct Sequence {
    steps: VecDeque<Box<dyn Behavior>>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, behavior: impl Behavior + 'static) -> Self {
        self.steps.push_back(Box::new(behavior));
        self
    }

    /// Convenience for a closure step that runs once and finishes
    pub fn then_do<F>(self, mut f: F) -> Self
    where
        F: FnMut(&mut Act<'_>) -> Result<(), BehaviorError> + 'static,
    {
        self.then(from_fn(move |act| {
            f(act)?;
            Ok(Step::Done)
        }))
    }

    pub fn then_wait(self, w: Wait) -> Self {
        self.then(wait(w))
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Behavior for Sequence {
    fn resume(&mut self, _act: &mut Act<'_>) -> BehaviorResult {
        Ok(match self.steps.pop_front() {
            Some(next) => Step::Call(next),
            None => Step::Done,
        })
    }
}

/// Runs a freshly built behavior again each time the previous one finishes
pub struct Repeat<F> {
    make: F,
    remaining: Option<u32>,
}

/// Repeat forever (until cancelled)
pub fn repeat<F>(make: F) -> Repeat<F>
where
    F: FnMut() -> Box<dyn Behavior>,
{
    Repeat {
        make,
        remaining: None,
    }
}

/// Repeat `times` times
pub fn repeat_n<F>(times: u32, make: F) -> Repeat<F>
where
    F: FnMut() -> Box<dyn Behavior>,
{
    Repeat {
        make,
        remaining: Some(times),
    }
}

impl<F> Behavior for Repeat<F>
where
    F: FnMut() -> Box<dyn Behavior>,
{
    fn resume(&mut self, _act: &mut Act<'_>) -> BehaviorResult {
        match &mut self.remaining {
            Some(0) => return Ok(Step::Done),
            Some(n) => *n -= 1,
            None => {}
        }
        Ok(Step::Call((self.make)()))
    }

    fn name(&self) -> &str {
        "repeat"
    }
}

/// Keeps the body turned toward the world target until cancelled
pub struct LookAtTarget;

pub fn look_at_target() -> LookAtTarget {
    LookAtTarget
}

impl Behavior for LookAtTarget {
    fn resume(&mut self, act: &mut Act<'_>) -> BehaviorResult {
        let angle = act.angle_to_target();
        let body = act.body_mut();
        body.heading_link = false;
        body.body_heading = angle;
        Ok(Step::Wait(Wait::NextTick))
    }
}

/// Spins the body at a fixed angular rate until cancelled
pub struct BodyRoll {
    degrees_per_second: f32,
}

pub fn body_roll(degrees_per_second: f32) -> BodyRoll {
    BodyRoll { degrees_per_second }
}

impl Behavior for BodyRoll {
    fn resume(&mut self, act: &mut Act<'_>) -> BehaviorResult {
        let delta = act.delta();
        let body = act.body_mut();
        body.body_heading =
            normalize_degrees(body.body_heading + self.degrees_per_second * delta);
        Ok(Step::Wait(Wait::NextTick))
    }
}
