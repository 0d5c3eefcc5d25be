//! Deterministic simulation module
//!
//! All kernel logic lives here. It must stay pure and deterministic:
//! - Tick delta comes from the clock only
//! - Seeded RNG only
//! - Stable iteration order (slot order, then attachment order)
//! - No rendering or platform dependencies

pub mod behavior;
pub mod body;
pub mod clock;
pub mod fire;
pub mod pool;
pub mod world;

pub use behavior::{
    Behavior, BehaviorResult, BodyRoll, FnBehavior, LookAtTarget, Pause, Repeat, Sequence,
    SequenceId, Step, Wait, body_roll, from_fn, look_at_target, repeat, repeat_n, wait,
};
pub use body::{Body, Motion, Template, approach_limit};
pub use clock::{Clock, ClockState, HostFrame, RateAdaptation};
pub use fire::{Offset, Shot, fan_angles, ring_angles};
pub use pool::{Acquired, Handle, Membership, Pool, PoolStats, TemplateId};
pub use world::{Act, World};
