//! Keyed object-recycling store
//!
//! Instances live in a slot table addressed by generational [`Handle`]s.
//! Each template owns an intrusive doubly linked idle list threaded through
//! the slots, so acquire, release and dispose are one hash lookup plus one
//! splice. Reuse is most-recently-released first.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identity of a template (the prototype instances are cloned from)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateId(pub u32);

/// Stable reference to one pooled instance.
///
/// A handle stays valid across deactivate/reactivate cycles of the same
/// instance and goes stale once the instance is disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index in the instance table
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Pool membership of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Membership {
    Active,
    Idle,
}

/// Result of [`Pool::acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquired {
    pub handle: Handle,
    /// True if the instance was constructed rather than reused
    pub fresh: bool,
}

/// Per-template counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub active: usize,
    pub idle: usize,
    /// Instances ever constructed for this template
    pub constructed: u64,
    /// Most instances active at the same time
    pub high_water: usize,
}

impl PoolStats {
    /// Instances currently owned by the pool (active + idle)
    pub fn live(&self) -> usize {
        self.active + self.idle
    }
}

/// Bookkeeping for one instance (its pooled slot record)
#[derive(Debug, Clone)]
struct PooledSlot {
    template: TemplateId,
    membership: Membership,
    prev: Option<u32>,
    next: Option<u32>,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    entry: Option<PooledSlot>,
}

#[derive(Debug, Clone, Copy, Default)]
struct IdleList {
    head: Option<u32>,
    len: usize,
}

#[derive(Debug, Clone, Default)]
struct TemplatePool {
    idle: IdleList,
    stats: PoolStats,
}

/// Recycling allocator keyed by template
#[derive(Debug, Clone, Default)]
pub struct Pool {
    slots: Vec<Slot>,
    /// Slot indices freed by dispose
    free: Vec<u32>,
    pools: HashMap<TemplateId, TemplatePool>,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `template` acquirable; registering twice is harmless
    pub fn register(&mut self, template: TemplateId) {
        self.pools.entry(template).or_default();
    }

    pub fn is_registered(&self, template: TemplateId) -> bool {
        self.pools.contains_key(&template)
    }

    /// Take the most recently released idle instance of `template`, or construct one
    pub fn acquire(&mut self, template: TemplateId) -> Result<Acquired> {
        let pool = self
            .pools
            .get_mut(&template)
            .ok_or(Error::InvalidTemplate(template))?;

        if let Some(index) = pool.idle.head {
            unlink(&mut self.slots, &mut pool.idle, index);
            let slot = &mut self.slots[index as usize];
            if let Some(entry) = slot.entry.as_mut() {
                entry.membership = Membership::Active;
            }
            pool.stats.idle -= 1;
            pool.stats.active += 1;
            pool.stats.high_water = pool.stats.high_water.max(pool.stats.active);
            return Ok(Acquired {
                handle: Handle::new(index, slot.generation),
                fresh: false,
            });
        }

        let entry = PooledSlot {
            template,
            membership: Membership::Active,
            prev: None,
            next: None,
        };
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                Handle::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 1,
                    entry: Some(entry),
                });
                Handle::new(index, 1)
            }
        };
        pool.stats.constructed += 1;
        pool.stats.active += 1;
        pool.stats.high_water = pool.stats.high_water.max(pool.stats.active);
        log::debug!(
            "Pool {:?} constructed instance {} ({} live)",
            template,
            handle.index,
            pool.stats.live()
        );

        Ok(Acquired {
            handle,
            fresh: true,
        })
    }

    /// Acquire another instance from the pool `handle` belongs to
    pub fn acquire_like(&mut self, handle: Handle) -> Result<Acquired> {
        let template = self.template_of(handle).ok_or(Error::StaleHandle(handle))?;
        self.acquire(template)
    }

    /// Return an active instance to the front of its idle list
    pub fn release(&mut self, handle: Handle) -> Result<()> {
        let entry = self.entry_mut(handle)?;
        if entry.membership == Membership::Idle {
            return Err(Error::AlreadyIdle(handle));
        }
        entry.membership = Membership::Idle;
        let template = entry.template;

        let pool = self
            .pools
            .get_mut(&template)
            .ok_or(Error::InvalidTemplate(template))?;
        push_front(&mut self.slots, &mut pool.idle, handle.index);
        pool.stats.active -= 1;
        pool.stats.idle += 1;
        Ok(())
    }

    /// Remove an instance's record for good; its handle goes stale
    pub fn dispose(&mut self, handle: Handle) -> Result<()> {
        let entry = self.entry_mut(handle)?;
        let template = entry.template;
        let membership = entry.membership;

        let pool = self
            .pools
            .get_mut(&template)
            .ok_or(Error::InvalidTemplate(template))?;
        match membership {
            Membership::Idle => {
                unlink(&mut self.slots, &mut pool.idle, handle.index);
                pool.stats.idle -= 1;
            }
            Membership::Active => pool.stats.active -= 1,
        }

        let slot = &mut self.slots[handle.index()];
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Ok(())
    }

    /// Construct and release `n` instances so later acquires skip construction
    pub fn prime(&mut self, template: TemplateId, n: usize) -> Result<Vec<Acquired>> {
        let acquired = (0..n)
            .map(|_| self.acquire(template))
            .collect::<Result<Vec<_>>>()?;
        for a in &acquired {
            self.release(a.handle)?;
        }
        Ok(acquired)
    }

    pub fn membership(&self, handle: Handle) -> Option<Membership> {
        self.entry(handle).map(|e| e.membership)
    }

    pub fn is_active(&self, handle: Handle) -> bool {
        self.membership(handle) == Some(Membership::Active)
    }

    pub fn template_of(&self, handle: Handle) -> Option<TemplateId> {
        self.entry(handle).map(|e| e.template)
    }

    pub fn stats(&self, template: TemplateId) -> Option<PoolStats> {
        self.pools.get(&template).map(|p| p.stats)
    }

    /// Idle instances of `template`, next-to-be-reused first
    pub fn idle_handles(&self, template: TemplateId) -> Vec<Handle> {
        let mut out = Vec::new();
        let mut cursor = self.pools.get(&template).and_then(|p| p.idle.head);
        while let Some(index) = cursor {
            let slot = &self.slots[index as usize];
            out.push(Handle::new(index, slot.generation));
            cursor = slot.entry.as_ref().and_then(|e| e.next);
        }
        out
    }

    /// Number of slots in the instance table
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Current handle for the instance at `index`, if one exists
    pub fn handle_at(&self, index: usize) -> Option<Handle> {
        let slot = self.slots.get(index)?;
        slot.entry
            .as_ref()
            .map(|_| Handle::new(index as u32, slot.generation))
    }

    fn entry(&self, handle: Handle) -> Option<&PooledSlot> {
        self.slots
            .get(handle.index())
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.entry.as_ref())
    }

    fn entry_mut(&mut self, handle: Handle) -> Result<&mut PooledSlot> {
        self.slots
            .get_mut(handle.index())
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.entry.as_mut())
            .ok_or(Error::StaleHandle(handle))
    }
}

fn links(slots: &mut [Slot], index: u32) -> &mut PooledSlot {
    slots[index as usize]
        .entry
        .as_mut()
        .unwrap_or_else(|| unreachable!("idle list threads through vacant slot {index}"))
}

fn push_front(slots: &mut [Slot], list: &mut IdleList, index: u32) {
    let old_head = list.head;
    {
        let entry = links(slots, index);
        entry.prev = None;
        entry.next = old_head;
    }
    if let Some(head) = old_head {
        links(slots, head).prev = Some(index);
    }
    list.head = Some(index);
    list.len += 1;
}

fn unlink(slots: &mut [Slot], list: &mut IdleList, index: u32) {
    let (prev, next) = {
        let entry = links(slots, index);
        let pair = (entry.prev, entry.next);
        entry.prev = None;
        entry.next = None;
        pair
    };
    match prev {
        Some(p) => links(slots, p).next = next,
        None => list.head = next,
    }
    if let Some(n) = next {
        links(slots, n).prev = prev;
    }
    list.len -= 1;
}
