//! Timer control blocks and the active list
use alloc::{boxed::Box, vec::Vec};
use core::fmt;
use slab::Slab;

use super::{Timer, TimerFire};
use crate::{
    error::BadIdError,
    time::Ticks,
    utils::{BinaryHeap, BinaryHeapCtx},
};

pub(super) type TimerCallback = Box<dyn FnMut(TimerFire) + Send + 'static>;

/// *Timer control block* - the state data of a timer.
pub(super) struct TimerCb {
    pub(super) generation: u32,
    pub(super) name: &'static str,
    pub(super) period: Ticks,
    pub(super) auto_reload: bool,
    pub(super) user_tag: usize,

    /// The expiration time. `Some(_)` iff the timer is in the Active state,
    /// in which case it's linked into the active list at `heap_pos`.
    pub(super) expiry: Option<Ticks>,
    heap_pos: usize,

    /// Set by `delete`. The control block is freed when the service
    /// processes the deletion.
    pub(super) deleted: bool,

    /// `None` while the callback is running.
    pub(super) callback: Option<TimerCallback>,
}

impl TimerCb {
    pub(super) fn new(
        generation: u32,
        name: &'static str,
        period: Ticks,
        auto_reload: bool,
        user_tag: usize,
        callback: TimerCallback,
    ) -> Self {
        Self {
            generation,
            name,
            period,
            auto_reload,
            user_tag,
            expiry: None,
            heap_pos: 0,
            deleted: false,
            callback: Some(callback),
        }
    }
}

impl fmt::Debug for TimerCb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TimerCb")
            .field("name", &self.name)
            .field("period", &self.period)
            .field("auto_reload", &self.auto_reload)
            .field("expiry", &self.expiry)
            .field("deleted", &self.deleted)
            .finish()
    }
}

/// An entry of the active list.
#[derive(Debug, Clone, Copy)]
struct ActiveEntry {
    expiry: Ticks,
    /// Insertion order. Timers expiring at the same tick fire in the order
    /// they were (re)started.
    seq: u64,
    key: usize,
}

struct ActiveCtx<'a> {
    timers: &'a mut Slab<TimerCb>,
}

impl BinaryHeapCtx<ActiveEntry> for ActiveCtx<'_> {
    fn lt(&mut self, x: &ActiveEntry, y: &ActiveEntry) -> bool {
        (x.expiry, x.seq) < (y.expiry, y.seq)
    }

    fn on_move(&mut self, e: &mut ActiveEntry, new_index: usize) {
        if let Some(cb) = self.timers.get_mut(e.key) {
            cb.heap_pos = new_index;
        }
    }
}

/// Every timer of a service plus the expiry-ordered list of the active ones.
#[derive(Debug)]
pub(super) struct TimerTable {
    timers: Slab<TimerCb>,
    active: Vec<ActiveEntry>,
    next_seq: u64,
    next_generation: u32,
}

impl TimerTable {
    pub(super) fn new() -> Self {
        Self {
            timers: Slab::new(),
            active: Vec::new(),
            next_seq: 0,
            next_generation: 0,
        }
    }

    /// Register a new timer. `make` receives the generation to store.
    pub(super) fn insert(&mut self, make: impl FnOnce(u32) -> TimerCb) -> Timer {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);

        let entry = self.timers.vacant_entry();
        let key = entry.key();
        entry.insert(make(generation));
        Timer { key, generation }
    }

    /// Look up a timer that hasn't been deleted.
    pub(super) fn get(&self, timer: Timer) -> Result<&TimerCb, BadIdError> {
        self.timers
            .get(timer.key)
            .filter(|cb| cb.generation == timer.generation && !cb.deleted)
            .ok_or(BadIdError::BadId)
    }

    pub(super) fn get_mut(&mut self, timer: Timer) -> Result<&mut TimerCb, BadIdError> {
        self.timers
            .get_mut(timer.key)
            .filter(|cb| cb.generation == timer.generation && !cb.deleted)
            .ok_or(BadIdError::BadId)
    }

    /// Look up a timer, including one that has been deleted but not freed.
    pub(super) fn get_any_mut(&mut self, timer: Timer) -> Option<&mut TimerCb> {
        self.timers
            .get_mut(timer.key)
            .filter(|cb| cb.generation == timer.generation)
    }

    /// Get a timer by its slab key, e.g., one returned by
    /// [`Self::pop_expired`].
    pub(super) fn by_key_mut(&mut self, key: usize) -> Option<&mut TimerCb> {
        self.timers.get_mut(key)
    }

    /// Put the timer in the Active state, expiring at `expiry`. An active
    /// timer is moved.
    pub(super) fn link(&mut self, key: usize, expiry: Ticks) {
        self.unlink(key);

        let seq = self.next_seq;
        self.next_seq += 1;

        let Self { timers, active, .. } = self;
        let Some(cb) = timers.get_mut(key) else { return };
        cb.expiry = Some(expiry);
        active.heap_push(ActiveEntry { expiry, seq, key }, ActiveCtx { timers });
    }

    /// Put the timer in the Dormant state.
    pub(super) fn unlink(&mut self, key: usize) {
        let Self { timers, active, .. } = self;
        let Some(cb) = timers.get_mut(key) else { return };
        if cb.expiry.take().is_some() {
            let pos = cb.heap_pos;
            let removed = active.heap_remove(pos, ActiveCtx { timers });
            debug_assert_eq!(removed.map(|e| e.key), Some(key));
        }
    }

    /// Unlink and free a timer.
    pub(super) fn remove(&mut self, key: usize) {
        self.unlink(key);
        if self.timers.contains(key) {
            self.timers.remove(key);
        }
    }

    /// Get the earliest expiration time of the active timers.
    pub(super) fn next_expiry(&self) -> Option<Ticks> {
        self.active.first().map(|e| e.expiry)
    }

    /// Unlink the next timer whose expiration time is `now` or earlier and
    /// return its key.
    pub(super) fn pop_expired(&mut self, now: Ticks) -> Option<usize> {
        if self.next_expiry()? > now {
            return None;
        }
        let Self { timers, active, .. } = self;
        let entry = active.heap_pop(ActiveCtx { timers })?;
        if let Some(cb) = timers.get_mut(entry.key) {
            cb.expiry = None;
        }
        Some(entry.key)
    }

    #[cfg(test)]
    pub(super) fn active_len(&self) -> usize {
        self.active.len()
    }
}
