//! Wait queues
//!
//! A blocked task is represented by a [`WaitSlot`] shared between the task
//! and the [`WaitQueue`] of the object it waits on. Whoever releases the task
//! (a waker, an abort, or the task itself on timeout) does so while holding
//! the object's critical section, and the outcome is written into the slot
//! before the task is resumed. The waiter therefore never has to race for
//! the resource after waking up.
use alloc::{sync::Arc, vec::Vec};
use core::{
    mem, ptr,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
    klock::CpuLockCell,
    port::{Port, Priority, TaskId},
    state::{Blocker, Wakeup},
    time::Ticks,
    utils::{BinaryHeap, BinaryHeapCtx},
};

enum SlotState<T, R> {
    /// In a wait queue, holding the payload the waiter brought along (e.g.,
    /// the item a blocked sender wants to send).
    Waiting(T),
    /// Released by a waker with the result of the wait.
    Completed(R),
    /// Released by `abort_wait`. The payload goes back to the waiter.
    Aborted(T),
    /// The outcome has been collected.
    Consumed,
}

/// The rendezvous point between a blocked task and whoever releases it.
pub(crate) struct WaitSlot<T, R> {
    task: TaskId,
    priority: Priority,
    /// Arrival order. Breaks ties between waiters of equal priority.
    seq: u64,
    /// The slot's index in the wait queue's heap.
    heap_pos: AtomicUsize,
    state: CpuLockCell<SlotState<T, R>>,
}

impl<T, R> WaitSlot<T, R> {
    #[cfg(test)]
    pub(crate) fn task(&self) -> TaskId {
        self.task
    }

    #[inline]
    pub(crate) fn wakeup(&self) -> Wakeup {
        Wakeup {
            task: self.task,
            priority: self.priority,
        }
    }

    /// Hand the result `result` to the waiter and take its payload.
    ///
    /// Must be called on a slot that was just removed from its queue.
    pub(crate) fn complete(&self, result: R) -> T {
        match mem::replace(&mut *self.state.lock(), SlotState::Completed(result)) {
            SlotState::Waiting(payload) => payload,
            _ => unreachable!("wait slot released twice"),
        }
    }

    /// Release the waiter without a result.
    fn abort(&self) {
        let mut state = self.state.lock();
        match mem::replace(&mut *state, SlotState::Consumed) {
            SlotState::Waiting(payload) => *state = SlotState::Aborted(payload),
            _ => unreachable!("wait slot released twice"),
        }
    }

    /// Collect the outcome if the waiter has been released. `Ok` carries the
    /// result of a completed wait, `Err` the payload of an aborted one.
    pub(crate) fn poll(&self) -> Option<Result<R, T>> {
        let mut state = self.state.lock();
        match mem::replace(&mut *state, SlotState::Consumed) {
            SlotState::Waiting(payload) => {
                *state = SlotState::Waiting(payload);
                None
            }
            SlotState::Completed(result) => Some(Ok(result)),
            SlotState::Aborted(payload) => Some(Err(payload)),
            SlotState::Consumed => unreachable!("wait outcome collected twice"),
        }
    }

    /// Take the payload back from a slot that was never released.
    fn cancel(&self) -> T {
        match mem::replace(&mut *self.state.lock(), SlotState::Consumed) {
            SlotState::Waiting(payload) => payload,
            _ => unreachable!("cancelling a released wait slot"),
        }
    }
}

/// Orders waiters by priority (descending), then by arrival.
struct QueueCtx;

impl<T, R> BinaryHeapCtx<Arc<WaitSlot<T, R>>> for QueueCtx {
    fn lt(&mut self, x: &Arc<WaitSlot<T, R>>, y: &Arc<WaitSlot<T, R>>) -> bool {
        (x.priority, y.seq) > (y.priority, x.seq)
    }

    fn on_move(&mut self, e: &mut Arc<WaitSlot<T, R>>, new_index: usize) {
        e.heap_pos.store(new_index, Ordering::Relaxed);
    }
}

/// A set of tasks blocked on one condition of one object, served in
/// priority order and FIFO among equal priorities.
///
/// `T` is the payload a waiter brings, `R` the result it's given.
pub(crate) struct WaitQueue<T, R> {
    heap: Vec<Arc<WaitSlot<T, R>>>,
    next_seq: u64,
}

impl<T, R> WaitQueue<T, R> {
    pub(crate) const fn new() -> Self {
        Self {
            heap: Vec::new(),
            next_seq: 0,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Enqueue the task described by `blocker`.
    pub(crate) fn push(&mut self, blocker: &Blocker, payload: T) -> Arc<WaitSlot<T, R>> {
        let seq = self.next_seq;
        self.next_seq += 1;

        let slot = Arc::new(WaitSlot {
            task: blocker.task,
            priority: blocker.priority,
            seq,
            heap_pos: AtomicUsize::new(0),
            state: CpuLockCell::new(SlotState::Waiting(payload)),
        });
        self.heap.heap_push(Arc::clone(&slot), QueueCtx);
        slot
    }

    /// Dequeue the waiter that should be served next.
    pub(crate) fn pop(&mut self) -> Option<Arc<WaitSlot<T, R>>> {
        self.heap.heap_pop(QueueCtx)
    }

    /// Remove `slot` if it's still in this queue.
    fn remove(&mut self, slot: &WaitSlot<T, R>) -> bool {
        let pos = slot.heap_pos.load(Ordering::Relaxed);
        if self
            .heap
            .get(pos)
            .map_or(false, |x| ptr::eq(&**x, slot))
        {
            self.heap.heap_remove(pos, QueueCtx);
            true
        } else {
            false
        }
    }

    /// Release `task` with no result. Returns `None` if the task isn't in
    /// this queue.
    pub(crate) fn abort(&mut self, task: TaskId) -> Option<Wakeup> {
        let pos = self.heap.iter().position(|slot| slot.task == task)?;
        let slot = self.heap.heap_remove(pos, QueueCtx)?;
        slot.abort();
        Some(slot.wakeup())
    }
}

/// Suspend the current task until `slot` is released or the deadline passes.
///
/// `queue_of` projects the object state protected by `cell` to the queue
/// that holds `slot`. Returns the wait result, or the payload if the wait
/// timed out or was aborted.
pub(crate) fn wait<P: Port, S, T, R>(
    port: &P,
    cell: &CpuLockCell<S>,
    queue_of: fn(&mut S) -> &mut WaitQueue<T, R>,
    slot: &WaitSlot<T, R>,
    deadline: Option<Ticks>,
) -> Result<R, T> {
    loop {
        if let Some(outcome) = slot.poll() {
            return outcome;
        }
        if deadline.map_or(false, |deadline| port.tick_count() >= deadline) {
            break;
        }
        port.suspend(deadline);
    }

    // The deadline passed, but a waker might have released us in the
    // meantime
    let mut state = cell.lock();
    if let Some(outcome) = slot.poll() {
        return outcome;
    }
    let removed = queue_of(&mut state).remove(slot);
    debug_assert!(removed);
    drop(state);

    log::trace!("{:?} timed out", slot.task);
    Err(slot.cancel())
}
