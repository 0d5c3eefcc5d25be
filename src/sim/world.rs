//! Simulation context and tick driver
//!
//! The [`World`] owns the single [`Clock`], the [`Pool`] and the per-instance
//! entity table (indexed by handle slot). Each tick it fixes the delta,
//! integrates every active body, then resumes every sequence whose wait is
//! over. Everything runs on the caller's thread; behaviors reach back into the
//! world through an [`Act`].

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

use glam::Vec2;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

use super::behavior::{Behavior, Pending, SequenceId, Step};
use super::body::{Body, Template};
use super::clock::{Clock, HostFrame};
use super::pool::{Handle, Membership, Pool, PoolStats, TemplateId};
use crate::consts::*;
use crate::error::{self, Error, Result};
use crate::settings::{Playfield, Settings};

/// A sequence in flight: the call stack of nested behaviors and its wait
struct Run {
    stack: Vec<Box<dyn Behavior>>,
    pending: Option<Pending>,
    /// Tick on which the current wait began
    since_tick: u64,
}

struct SeqEntry {
    id: SequenceId,
    /// Empty while the sequence is being resumed
    run: Option<Run>,
}

/// Per-instance storage, kept for the slot's lifetime
struct EntitySlot {
    template: TemplateId,
    body: Body,
    /// Attachment order is resumption order
    sequences: Vec<SeqEntry>,
}

enum Outcome {
    Suspended(Run),
    Finished,
    Cancelled,
    Faulted(String),
}

/// Simulation kernel state.
///
/// A `World` is one simulation context and owns its only [`Clock`]; there is
/// no global clock to share or duplicate.
pub struct World {
    clock: Clock,
    pool: Pool,
    templates: Vec<Template>,
    entities: Vec<EntitySlot>,
    playfield: Playfield,
    /// Aim point (usually the player)
    target: Option<Vec2>,
    rng: Pcg32,
    next_sequence: u64,
    diagnostics: VecDeque<Error>,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("clock", &self.clock)
            .field("templates", &self.templates.len())
            .field("instances", &self.entities.len())
            .field("active", &self.active_count())
            .finish()
    }
}

impl World {
    pub fn new(settings: &Settings) -> Self {
        let mut clock = Clock::new(&settings.clock);
        clock.start();
        log::info!(
            "World created (target rate {}, seed {:#x})",
            settings.clock.target_rate,
            settings.seed
        );
        Self {
            clock,
            pool: Pool::new(),
            templates: Vec::new(),
            entities: Vec::new(),
            playfield: settings.playfield,
            target: None,
            rng: Pcg32::seed_from_u64(settings.seed),
            next_sequence: 1,
            diagnostics: VecDeque::new(),
        }
    }

    // === Templates & instances ===

    pub fn register_template(&mut self, template: Template) -> TemplateId {
        let id = TemplateId(self.templates.len() as u32);
        log::debug!("Registered template {:?} as {:?}", template.name, id);
        self.templates.push(template);
        self.pool.register(id);
        id
    }

    pub fn template(&self, id: TemplateId) -> Option<&Template> {
        self.templates.get(id.0 as usize)
    }

    /// Produce an active instance of `template` at `position` with neutral motion
    pub fn spawn(&mut self, template: TemplateId, position: Vec2) -> Result<Handle> {
        let acquired = match self.pool.acquire(template) {
            Ok(a) => a,
            Err(e) => return Err(self.fail(e)),
        };
        let handle = acquired.handle;
        let proto = &self.templates[template.0 as usize];

        if acquired.fresh {
            let slot = EntitySlot {
                template,
                body: Body::from_template(proto),
                sequences: Vec::new(),
            };
            if handle.index() == self.entities.len() {
                self.entities.push(slot);
            } else {
                self.entities[handle.index()] = slot;
            }
        } else {
            let slot = &mut self.entities[handle.index()];
            slot.body.reset(proto);
            slot.sequences.clear();
        }
        self.entities[handle.index()].body.position = position;
        Ok(handle)
    }

    /// Produce another instance from the pool `like` came from
    pub fn spawn_like(&mut self, like: Handle, position: Vec2) -> Result<Handle> {
        match self.pool.template_of(like) {
            Some(template) => self.spawn(template, position),
            None => Err(self.fail(Error::StaleHandle(like))),
        }
    }

    /// Pre-warm the pool for `template` with `n` idle instances
    pub fn prime(&mut self, template: TemplateId, n: usize) -> Result<()> {
        let handles = (0..n)
            .map(|_| self.spawn(template, Vec2::ZERO))
            .collect::<Result<Vec<_>>>()?;
        for handle in handles {
            self.deactivate(handle)?;
        }
        log::debug!("Primed {:?} with {} instances", template, n);
        Ok(())
    }

    /// Cancel the instance's sequences and return it to its idle list
    pub fn deactivate(&mut self, handle: Handle) -> Result<()> {
        match self.pool.membership(handle) {
            None => return Err(self.fail(Error::StaleHandle(handle))),
            Some(Membership::Idle) => return Err(self.fail(Error::AlreadyIdle(handle))),
            Some(Membership::Active) => {}
        }
        self.entities[handle.index()].sequences.clear();
        if let Err(e) = self.pool.release(handle) {
            return Err(self.fail(e));
        }
        Ok(())
    }

    /// Destroy the instance for good; its handle goes stale
    pub fn dispose(&mut self, handle: Handle) -> Result<()> {
        if self.pool.membership(handle).is_none() {
            return Err(self.fail(Error::StaleHandle(handle)));
        }
        self.entities[handle.index()].sequences.clear();
        if let Err(e) = self.pool.dispose(handle) {
            return Err(self.fail(e));
        }
        Ok(())
    }

    /// Deactivate active instances more than `margin` outside the playfield
    pub fn deactivate_outside(&mut self, margin: f32) -> usize {
        let outside: Vec<Handle> = self
            .active_handles()
            .into_iter()
            .filter(|h| {
                !self
                    .playfield
                    .contains(self.entities[h.index()].body.position, margin)
            })
            .collect();
        for &handle in &outside {
            // Only active handles were collected
            let _ = self.deactivate(handle);
        }
        outside.len()
    }

    pub fn is_active(&self, handle: Handle) -> bool {
        self.pool.is_active(handle)
    }

    /// Body of an active instance
    pub fn body(&self, handle: Handle) -> Option<&Body> {
        self.pool
            .is_active(handle)
            .then(|| &self.entities[handle.index()].body)
    }

    pub fn body_mut(&mut self, handle: Handle) -> Option<&mut Body> {
        if self.pool.is_active(handle) {
            Some(&mut self.entities[handle.index()].body)
        } else {
            None
        }
    }

    pub fn template_of(&self, handle: Handle) -> Option<TemplateId> {
        self.pool.template_of(handle)
    }

    /// Active instances in slot order
    pub fn active_handles(&self) -> Vec<Handle> {
        (0..self.pool.capacity())
            .filter_map(|i| self.pool.handle_at(i))
            .filter(|h| self.pool.is_active(*h))
            .collect()
    }

    pub fn active_count(&self) -> usize {
        (0..self.entities.len())
            .filter_map(|i| self.pool.handle_at(i))
            .filter(|h| self.pool.is_active(*h))
            .count()
    }

    pub fn pool_stats(&self, template: TemplateId) -> Option<PoolStats> {
        self.pool.stats(template)
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    // === Sequences ===

    /// Attach a behavior and run it up to its first suspension
    pub fn attach(
        &mut self,
        handle: Handle,
        behavior: impl Behavior + 'static,
    ) -> Result<SequenceId> {
        self.attach_boxed(handle, Box::new(behavior))
    }

    pub fn attach_boxed(
        &mut self,
        handle: Handle,
        behavior: Box<dyn Behavior>,
    ) -> Result<SequenceId> {
        match self.pool.membership(handle) {
            None => return Err(self.fail(Error::StaleHandle(handle))),
            Some(Membership::Idle) => return Err(self.fail(Error::NotActive(handle))),
            Some(Membership::Active) => {}
        }
        let id = SequenceId(self.next_sequence);
        self.next_sequence += 1;
        self.entities[handle.index()]
            .sequences
            .push(SeqEntry { id, run: None });

        let run = Run {
            stack: vec![behavior],
            pending: None,
            since_tick: self.clock.ticks(),
        };
        let outcome = self.drive(handle, id, run);
        self.settle(handle, id, outcome);
        Ok(id)
    }

    /// Stop a sequence immediately, including any nested behavior it awaits
    pub fn cancel(&mut self, handle: Handle, id: SequenceId) -> bool {
        if self.pool.membership(handle).is_none() {
            return false;
        }
        let sequences = &mut self.entities[handle.index()].sequences;
        let before = sequences.len();
        sequences.retain(|e| e.id != id);
        sequences.len() != before
    }

    pub fn cancel_all(&mut self, handle: Handle) {
        if self.pool.membership(handle).is_some() {
            self.entities[handle.index()].sequences.clear();
        }
    }

    /// Sequences still attached to `handle`
    pub fn sequence_count(&self, handle: Handle) -> usize {
        if self.pool.is_active(handle) {
            self.entities[handle.index()].sequences.len()
        } else {
            0
        }
    }

    pub fn is_running(&self, handle: Handle, id: SequenceId) -> bool {
        self.pool.is_active(handle)
            && self.entities[handle.index()]
                .sequences
                .iter()
                .any(|e| e.id == id)
    }

    // === Tick ===

    /// Advance the simulation one tick; returns the delta used
    pub fn tick(&mut self, frame: HostFrame) -> f32 {
        let dt = self.clock.tick(frame);
        let now = self.clock.ticks();

        for index in 0..self.entities.len() {
            if self.active_at(index).is_some() {
                self.entities[index].body.integrate(dt);
            }
        }

        for index in 0..self.entities.len() {
            let Some(handle) = self.active_at(index) else {
                continue;
            };
            let ids: Vec<SequenceId> = self.entities[index]
                .sequences
                .iter()
                .map(|e| e.id)
                .collect();
            for id in ids {
                if !self.pool.is_active(handle) {
                    break;
                }
                let Some(run) = self.take_if_due(index, id, now) else {
                    continue;
                };
                let outcome = self.drive(handle, id, run);
                self.settle(handle, id, outcome);
            }
        }

        dt
    }

    fn active_at(&self, index: usize) -> Option<Handle> {
        self.pool
            .handle_at(index)
            .filter(|h| self.pool.is_active(*h))
    }

    /// Poll a suspended sequence and take it out if its wait is over
    fn take_if_due(&mut self, index: usize, id: SequenceId, now: u64) -> Option<Run> {
        let slot = &mut self.entities[index];
        let entry = slot.sequences.iter_mut().find(|e| e.id == id)?;
        let run = entry.run.as_mut()?;
        if run.since_tick >= now {
            return None;
        }
        let ready = match run.pending.as_mut() {
            Some(pending) => pending.poll(&self.clock, &slot.body),
            None => true,
        };
        if !ready {
            return None;
        }
        let mut run = entry.run.take()?;
        run.pending = None;
        Some(run)
    }

    /// Resume a sequence until it suspends, finishes, faults or is cancelled
    fn drive(&mut self, handle: Handle, id: SequenceId, mut run: Run) -> Outcome {
        for _ in 0..MAX_STEPS_PER_RESUME {
            let Some(top) = run.stack.last_mut() else {
                return Outcome::Finished;
            };
            let resumed = {
                let mut act = Act {
                    world: self,
                    me: handle,
                    sequence: id,
                };
                panic::catch_unwind(AssertUnwindSafe(|| top.resume(&mut act)))
            };
            if !self.is_running(handle, id) {
                return Outcome::Cancelled;
            }
            let result = match resumed {
                Ok(result) => result,
                Err(payload) => {
                    let name = run.stack.last().map(|b| b.name().to_string());
                    return Outcome::Faulted(format!(
                        "{} panicked: {}",
                        name.as_deref().unwrap_or("behavior"),
                        panic_message(payload.as_ref())
                    ));
                }
            };
            match result {
                Ok(Step::Done) => {
                    run.stack.pop();
                }
                Ok(Step::Call(child)) => run.stack.push(child),
                Ok(Step::Wait(wait)) => {
                    let body = &self.entities[handle.index()].body;
                    if let Some(pending) = Pending::begin(wait, body) {
                        run.pending = Some(pending);
                        run.since_tick = self.clock.ticks();
                        return Outcome::Suspended(run);
                    }
                }
                Err(e) => {
                    let name = run.stack.last().map(|b| b.name().to_string());
                    return Outcome::Faulted(match name {
                        Some(name) => format!("{name}: {e}"),
                        None => e.to_string(),
                    });
                }
            }
        }
        Outcome::Faulted(format!(
            "exceeded {MAX_STEPS_PER_RESUME} steps without suspending"
        ))
    }

    fn settle(&mut self, handle: Handle, id: SequenceId, outcome: Outcome) {
        let sequences = &mut self.entities[handle.index()].sequences;
        match outcome {
            Outcome::Suspended(run) => {
                if let Some(entry) = sequences.iter_mut().find(|e| e.id == id) {
                    entry.run = Some(run);
                }
            }
            Outcome::Finished | Outcome::Cancelled => sequences.retain(|e| e.id != id),
            Outcome::Faulted(message) => {
                sequences.retain(|e| e.id != id);
                self.fail(Error::BehaviorFault {
                    handle,
                    sequence: id,
                    message,
                });
            }
        }
    }

    // === Context ===

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Debug-tooling access to rate, window and adaptation mode
    pub fn clock_mut(&mut self) -> &mut Clock {
        &mut self.clock
    }

    pub fn playfield(&self) -> &Playfield {
        &self.playfield
    }

    pub fn target(&self) -> Option<Vec2> {
        self.target
    }

    pub fn set_target(&mut self, target: Option<Vec2>) {
        self.target = target;
    }

    pub fn rng_mut(&mut self) -> &mut Pcg32 {
        &mut self.rng
    }

    /// Report an error and keep it for [`World::take_diagnostics`]
    pub(crate) fn fail(&mut self, err: Error) -> Error {
        error::report(&err);
        if self.diagnostics.len() == MAX_DIAGNOSTICS {
            self.diagnostics.pop_front();
        }
        self.diagnostics.push_back(err.clone());
        err
    }

    /// Drain reported errors, oldest first
    pub fn take_diagnostics(&mut self) -> Vec<Error> {
        self.diagnostics.drain(..).collect()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string payload"
    }
}

/// A behavior's view of the world while it runs
pub struct Act<'w> {
    pub(crate) world: &'w mut World,
    me: Handle,
    sequence: SequenceId,
}

impl Act<'_> {
    /// The entity this behavior is bound to
    pub fn handle(&self) -> Handle {
        self.me
    }

    /// The sequence being resumed
    pub fn sequence(&self) -> SequenceId {
        self.sequence
    }

    pub fn body(&self) -> &Body {
        &self.world.entities[self.me.index()].body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.world.entities[self.me.index()].body
    }

    pub fn template(&self) -> TemplateId {
        self.world.entities[self.me.index()].template
    }

    pub fn world(&self) -> &World {
        &*self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut *self.world
    }

    /// Delta of the current tick
    pub fn delta(&self) -> f32 {
        self.world.clock.tick_delta()
    }

    pub fn clock(&self) -> &Clock {
        &self.world.clock
    }

    pub fn playfield(&self) -> Playfield {
        self.world.playfield
    }

    /// Angle from this entity to the world target; straight down without one
    pub fn angle_to_target(&self) -> f32 {
        match self.world.target {
            Some(target) => self.body().angle_to(target),
            None => -90.0,
        }
    }

    /// Uniform angle in [0, 360)
    pub fn random_angle(&mut self) -> f32 {
        self.world.rng.random_range(0.0..360.0)
    }

    /// Uniform offset in [-amount, amount]
    pub fn shake(&mut self, amount: f32) -> f32 {
        if amount <= 0.0 {
            return 0.0;
        }
        self.world.rng.random_range(-amount..=amount)
    }

    pub fn random_range(&mut self, min: f32, max: f32) -> f32 {
        if max <= min {
            return min;
        }
        self.world.rng.random_range(min..max)
    }

    pub fn set_dest_at_time(&mut self, dest: Vec2, t: f32) {
        self.body_mut().set_dest_at_time(dest, t);
    }

    /// Head for a random point in the box, kept inside the playfield
    pub fn set_ranged_dest(&mut self, min_x: f32, max_x: f32, min_y: f32, max_y: f32, t: f32) {
        let field = self.world.playfield;
        let x = self.random_range(min_x.max(field.left), max_x.min(field.right));
        let y = self.random_range(min_y.max(field.bottom), max_y.min(field.top));
        self.set_dest_at_time(Vec2::new(x, y), t);
    }

    /// Head for a random point within `dx`, `dy` of the current position
    pub fn set_ranged_dest_around(&mut self, dx: f32, dy: f32, t: f32) {
        let pos = self.body().position;
        self.set_ranged_dest(pos.x - dx, pos.x + dx, pos.y - dy, pos.y + dy, t);
    }

    pub fn spawn(&mut self, template: TemplateId, position: Vec2) -> Result<Handle> {
        self.world.spawn(template, position)
    }

    /// Spawn another instance of this entity's own template
    pub fn spawn_like_self(&mut self, position: Vec2) -> Result<Handle> {
        self.world.spawn_like(self.me, position)
    }

    pub fn attach(
        &mut self,
        handle: Handle,
        behavior: impl Behavior + 'static,
    ) -> Result<SequenceId> {
        self.world.attach(handle, behavior)
    }

    /// Start a concurrent sequence on this entity
    pub fn start(&mut self, behavior: impl Behavior + 'static) -> Result<SequenceId> {
        self.world.attach(self.me, behavior)
    }

    /// Cancel one of this entity's sequences
    pub fn cancel(&mut self, id: SequenceId) -> bool {
        self.world.cancel(self.me, id)
    }

    pub fn deactivate(&mut self, handle: Handle) -> Result<()> {
        self.world.deactivate(handle)
    }

    /// Deactivate this entity; the running sequence ends here
    pub fn deactivate_self(&mut self) -> Result<()> {
        self.world.deactivate(self.me)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::error::{BehaviorError, ErrorCategory};
    use crate::sim::behavior::{Sequence, Wait, from_fn, wait};

    const FRAME: HostFrame = HostFrame {
        real_delta: 1.0 / 60.0,
        time_scale: 1.0,
    };

    fn world() -> (World, TemplateId) {
        let mut world = World::new(&Settings::default());
        let t = world.register_template(Template::new("enemy").with_radii(10.0, 16.0));
        (world, t)
    }

    type Log = Rc<RefCell<Vec<String>>>;

    fn note(log: &Log, s: impl Into<String>) {
        log.borrow_mut().push(s.into());
    }

    #[test]
    fn test_spawn_positions_and_integrates() {
        let (mut world, t) = world();
        let h = world.spawn(t, Vec2::new(5.0, 0.0)).unwrap();
        world.body_mut(h).unwrap().set_movement(60.0, 0.0);
        world.tick(FRAME);
        let pos = world.body(h).unwrap().position;
        assert!((pos.x - 6.0).abs() < 1e-4);
    }

    #[test]
    fn test_invalid_template_is_reported() {
        let (mut world, _) = world();
        let err = world.spawn(TemplateId(99), Vec2::ZERO).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ProgrammerError);
        assert_eq!(world.take_diagnostics(), vec![err]);
    }

    #[test]
    fn test_reset_on_reuse() {
        let (mut world, t) = world();
        let h = world.spawn(t, Vec2::ZERO).unwrap();
        {
            let body = world.body_mut(h).unwrap();
            body.set_movement(100.0, 45.0);
            body.acceleration = 5.0;
            body.speed_limit = 200.0;
            body.angular_speed = 30.0;
            body.heading_link = false;
        }
        world.deactivate(h).unwrap();
        assert!(world.body(h).is_none());

        let again = world.spawn(t, Vec2::new(1.0, 2.0)).unwrap();
        assert_eq!(again, h);
        let body = world.body(again).unwrap();
        assert_eq!(body.speed, 0.0);
        assert_eq!(body.acceleration, 0.0);
        assert_eq!(body.speed_limit, 0.0);
        assert_eq!(body.angular_speed, 0.0);
        assert_eq!(body.heading(), 0.0);
        assert!(body.heading_link);
        assert_eq!(body.position, Vec2::new(1.0, 2.0));
    }

    #[test]
    fn test_reuse_clears_unlinked_orientation() {
        let mut world = World::new(&Settings::default());
        let t = world.register_template(Template::new("turret").with_heading_link(false));
        let h = world.spawn(t, Vec2::ZERO).unwrap();
        world.body_mut(h).unwrap().body_heading = 123.0;
        world.deactivate(h).unwrap();
        let again = world.spawn(t, Vec2::ZERO).unwrap();
        assert_eq!(again, h);
        assert_eq!(world.body(again).unwrap().body_heading, 0.0);
    }

    #[test]
    fn test_each_world_drives_its_own_clock() {
        let mut a = World::new(&Settings::default());
        let b = World::new(&Settings::default());
        a.tick(FRAME);
        a.tick(FRAME);
        assert_eq!(a.clock().ticks(), 2);
        assert_eq!(b.clock().ticks(), 0);
        assert_eq!(a.clock().state(), crate::sim::ClockState::Running);
    }

    #[test]
    fn test_double_deactivate_is_diagnostic() {
        let (mut world, t) = world();
        let h = world.spawn(t, Vec2::ZERO).unwrap();
        world.deactivate(h).unwrap();
        assert_eq!(world.deactivate(h), Err(Error::AlreadyIdle(h)));
        assert_eq!(world.pool_stats(t).unwrap().idle, 1);
        assert_eq!(world.take_diagnostics().len(), 1);
    }

    #[test]
    fn test_attach_runs_until_first_wait() {
        let (mut world, t) = world();
        let h = world.spawn(t, Vec2::ZERO).unwrap();
        let log: Log = Rc::default();
        let l = log.clone();
        let mut stage = 0;
        world
            .attach(
                h,
                from_fn(move |_act| {
                    stage += 1;
                    note(&l, format!("stage {stage}"));
                    Ok(if stage < 3 {
                        Step::Wait(Wait::NextTick)
                    } else {
                        Step::Done
                    })
                }),
            )
            .unwrap();
        assert_eq!(*log.borrow(), vec!["stage 1"]);
        world.tick(FRAME);
        world.tick(FRAME);
        assert_eq!(*log.borrow(), vec!["stage 1", "stage 2", "stage 3"]);
        assert_eq!(world.sequence_count(h), 0);
    }

    #[test]
    fn test_attach_to_idle_or_disposed() {
        let (mut world, t) = world();
        let h = world.spawn(t, Vec2::ZERO).unwrap();
        world.deactivate(h).unwrap();
        assert_eq!(
            world.attach(h, wait(Wait::NextTick)).unwrap_err(),
            Error::NotActive(h)
        );
        world.dispose(h).unwrap();
        assert_eq!(
            world.attach(h, wait(Wait::NextTick)).unwrap_err(),
            Error::StaleHandle(h)
        );
    }

    #[test]
    fn test_wait_seconds_counts_simulated_time() {
        let (mut world, t) = world();
        let h = world.spawn(t, Vec2::ZERO).unwrap();
        let log: Log = Rc::default();
        let l = log.clone();
        world
            .attach(
                h,
                Sequence::new()
                    .then_wait(Wait::Seconds(0.5))
                    .then_do(move |act| {
                        note(&l, format!("{}", act.clock().ticks()));
                        Ok(())
                    }),
            )
            .unwrap();
        for _ in 0..40 {
            world.tick(FRAME);
        }
        // World::new starts the clock at tick 0; 30 ticks of 1/60
        assert_eq!(*log.borrow(), vec!["30"]);
    }

    #[test]
    fn test_nested_sequence_then_continue() {
        let (mut world, t) = world();
        let h = world.spawn(t, Vec2::ZERO).unwrap();
        let log: Log = Rc::default();
        let (a, b, c) = (log.clone(), log.clone(), log.clone());
        let inner = Sequence::new()
            .then_do(move |_| {
                note(&a, "inner start");
                Ok(())
            })
            .then_wait(Wait::Ticks(2))
            .then_do(move |_| {
                note(&b, "inner end");
                Ok(())
            });
        let mut inner = Some(inner);
        let mut called = false;
        world
            .attach(
                h,
                from_fn(move |_| {
                    if !called {
                        called = true;
                        let child = inner.take().ok_or_else(|| BehaviorError::new("gone"))?;
                        return Ok(Step::Call(Box::new(child)));
                    }
                    note(&c, "outer after");
                    Ok(Step::Done)
                }),
            )
            .unwrap();
        assert_eq!(*log.borrow(), vec!["inner start"]);
        world.tick(FRAME);
        assert_eq!(log.borrow().len(), 1);
        world.tick(FRAME);
        assert_eq!(
            *log.borrow(),
            vec!["inner start", "inner end", "outer after"]
        );
    }

    #[test]
    fn test_concurrent_sequences_resume_in_attach_order() {
        let (mut world, t) = world();
        let h = world.spawn(t, Vec2::ZERO).unwrap();
        let log: Log = Rc::default();
        for name in ["first", "second"] {
            let l = log.clone();
            world
                .attach(
                    h,
                    from_fn(move |act| {
                        act.body_mut().speed = if name == "first" { 1.0 } else { 2.0 };
                        note(&l, name);
                        Ok(Step::Wait(Wait::NextTick))
                    }),
                )
                .unwrap();
        }
        log.borrow_mut().clear();
        world.tick(FRAME);
        assert_eq!(*log.borrow(), vec!["first", "second"]);
        // Last write wins
        assert_eq!(world.body(h).unwrap().speed, 2.0);
    }

    #[test]
    fn test_cancel_stops_nested() {
        let (mut world, t) = world();
        let h = world.spawn(t, Vec2::ZERO).unwrap();
        let log: Log = Rc::default();
        let l = log.clone();
        let child = Sequence::new()
            .then_wait(Wait::Ticks(3))
            .then_do(move |_| {
                note(&l, "child done");
                Ok(())
            });
        let id = world.attach(h, Sequence::new().then(child)).unwrap();
        world.tick(FRAME);
        assert!(world.cancel(h, id));
        for _ in 0..5 {
            world.tick(FRAME);
        }
        assert!(log.borrow().is_empty());
        assert!(!world.cancel(h, id));
    }

    #[test]
    fn test_deactivate_cancels_sequences() {
        let (mut world, t) = world();
        let h = world.spawn(t, Vec2::ZERO).unwrap();
        let log: Log = Rc::default();
        let l = log.clone();
        world
            .attach(
                h,
                from_fn(move |_| {
                    note(&l, "tick");
                    Ok(Step::Wait(Wait::NextTick))
                }),
            )
            .unwrap();
        world.deactivate(h).unwrap();
        world.tick(FRAME);
        assert_eq!(log.borrow().len(), 1);

        // Reused instance starts with no sequences
        let again = world.spawn(t, Vec2::ZERO).unwrap();
        assert_eq!(again, h);
        assert_eq!(world.sequence_count(again), 0);
    }

    #[test]
    fn test_self_deactivation_ends_sequence() {
        let (mut world, t) = world();
        let h = world.spawn(t, Vec2::ZERO).unwrap();
        let log: Log = Rc::default();
        let l = log.clone();
        world
            .attach(
                h,
                Sequence::new()
                    .then_wait(Wait::NextTick)
                    .then_do(|act| {
                        act.deactivate_self()?;
                        Ok(())
                    })
                    .then_do(move |_| {
                        note(&l, "unreachable");
                        Ok(())
                    }),
            )
            .unwrap();
        world.tick(FRAME);
        assert!(!world.is_active(h));
        world.tick(FRAME);
        assert!(log.borrow().is_empty());
        assert!(world.take_diagnostics().is_empty());
    }

    #[test]
    fn test_fault_is_contained() {
        let (mut world, t) = world();
        let bad = world.spawn(t, Vec2::ZERO).unwrap();
        let good = world.spawn(t, Vec2::ZERO).unwrap();
        world
            .attach(
                bad,
                from_fn(|act| {
                    if act.clock().ticks() == 0 {
                        act.body_mut().speed = 7.0;
                        return Ok(Step::Wait(Wait::NextTick));
                    }
                    Err(BehaviorError::new("bad pattern"))
                }),
            )
            .unwrap();
        let ticks: Rc<RefCell<u32>> = Rc::default();
        let counter = ticks.clone();
        world
            .attach(
                good,
                from_fn(move |_| {
                    *counter.borrow_mut() += 1;
                    Ok(Step::Wait(Wait::NextTick))
                }),
            )
            .unwrap();
        world.tick(FRAME);
        world.tick(FRAME);

        assert_eq!(world.sequence_count(bad), 0);
        assert_eq!(world.body(bad).unwrap().speed, 7.0);
        assert_eq!(*ticks.borrow(), 3);
        let diags = world.take_diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].category(), ErrorCategory::BehaviorFault);
    }

    #[test]
    fn test_panicking_behavior_is_contained() {
        let (mut world, t) = world();
        let bad = world.spawn(t, Vec2::ZERO).unwrap();
        let good = world.spawn(t, Vec2::ZERO).unwrap();
        world.body_mut(good).unwrap().set_movement(60.0, 0.0);
        world
            .attach(
                bad,
                from_fn(|act| {
                    if act.clock().ticks() == 0 {
                        return Ok(Step::Wait(Wait::NextTick));
                    }
                    panic!("pattern blew up");
                }),
            )
            .unwrap();
        let ticks: Rc<RefCell<u32>> = Rc::default();
        let counter = ticks.clone();
        world
            .attach(
                good,
                from_fn(move |_| {
                    *counter.borrow_mut() += 1;
                    Ok(Step::Wait(Wait::NextTick))
                }),
            )
            .unwrap();

        world.tick(FRAME);
        world.tick(FRAME);

        assert!(world.is_active(bad));
        assert_eq!(world.sequence_count(bad), 0);
        assert_eq!(*ticks.borrow(), 3);
        assert!((world.body(good).unwrap().position.x - 2.0).abs() < 1e-4);
        let diags = world.take_diagnostics();
        assert_eq!(diags.len(), 1);
        assert!(diags[0].to_string().contains("pattern blew up"));
    }

    #[test]
    fn test_runaway_behavior_faults() {
        let (mut world, t) = world();
        let h = world.spawn(t, Vec2::ZERO).unwrap();
        world
            .attach(h, from_fn(|_| Ok(Step::Wait(Wait::Ticks(0)))))
            .unwrap();
        assert_eq!(world.sequence_count(h), 0);
        assert!(matches!(
            world.take_diagnostics().as_slice(),
            [Error::BehaviorFault { .. }]
        ));
    }

    #[test]
    fn test_wait_for_stop_hits_exact_tick() {
        let (mut world, t) = world();
        let h = world.spawn(t, Vec2::new(0.0, 100.0)).unwrap();
        let resumed_at: Rc<RefCell<Option<(u64, f32)>>> = Rc::default();
        let r = resumed_at.clone();
        world
            .attach(
                h,
                Sequence::new()
                    .then_do(|act| {
                        act.set_dest_at_time(Vec2::new(0.0, 40.0), 1.0);
                        Ok(())
                    })
                    .then_wait(Wait::Stopped)
                    .then_do(move |act| {
                        *r.borrow_mut() = Some((act.clock().ticks(), act.body().speed));
                        Ok(())
                    }),
            )
            .unwrap();

        let mut first_zero = None;
        for _ in 0..120 {
            world.tick(FRAME);
            if first_zero.is_none() && world.body(h).unwrap().speed == 0.0 {
                first_zero = Some(world.clock().ticks());
            }
        }
        let (tick, speed) = resumed_at.borrow().unwrap();
        assert_eq!(Some(tick), first_zero);
        assert_eq!(speed, 0.0);
        assert!((60..=61).contains(&tick));
    }

    #[test]
    fn test_deactivate_outside() {
        let (mut world, t) = world();
        let inside = world.spawn(t, Vec2::ZERO).unwrap();
        let outside = world.spawn(t, Vec2::new(1000.0, 0.0)).unwrap();
        assert_eq!(world.deactivate_outside(32.0), 1);
        assert!(world.is_active(inside));
        assert!(!world.is_active(outside));
    }

    #[test]
    fn test_prime_then_spawn_reuses() {
        let (mut world, t) = world();
        world.prime(t, 4).unwrap();
        assert_eq!(world.active_count(), 0);
        for _ in 0..4 {
            world.spawn(t, Vec2::ZERO).unwrap();
        }
        assert_eq!(world.pool_stats(t).unwrap().constructed, 4);
        world.spawn(t, Vec2::ZERO).unwrap();
        assert_eq!(world.pool_stats(t).unwrap().constructed, 5);
    }

    #[test]
    fn test_spawn_like_uses_same_pool() {
        let (mut world, t) = world();
        let other = world.register_template(Template::new("shot"));
        let a = world.spawn(other, Vec2::ZERO).unwrap();
        let b = world.spawn_like(a, Vec2::ONE).unwrap();
        assert_eq!(world.template_of(b), Some(other));
        assert_ne!(world.template_of(b), Some(t));
    }

    #[test]
    fn test_dispose_removes_instance() {
        let (mut world, t) = world();
        let h = world.spawn(t, Vec2::ZERO).unwrap();
        world.dispose(h).unwrap();
        assert!(!world.is_active(h));
        assert_eq!(world.dispose(h).unwrap_err(), Error::StaleHandle(h));
        assert_eq!(world.pool_stats(t).unwrap().live(), 0);
    }
}
