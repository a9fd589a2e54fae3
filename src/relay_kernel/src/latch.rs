//! Event latches
use core::{fmt, marker::PhantomData};

use crate::{
    error::{BadParamError, CreateError, GiveError, TakeError, TryTakeError},
    interrupt::Isr,
    klock::CpuLockCell,
    port::{Port, TaskId},
    state::{self, Wakeup},
    time::Timeout,
    wait::{self, WaitQueue},
};

/// What [`EventLatch::give`] does when the count is already at its maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Keep the count at the maximum and drop the event
    /// ([`GiveError::Overflow`]).
    #[default]
    Saturate,
    /// Restart the count from zero ([`GiveError::Wrapped`]).
    Wrap,
}

/// A counter of events signaled by interrupt handlers and consumed by tasks,
/// i.e., a counting semaphore.
///
/// An interrupt handler calls [`give_from_isr`](Self::give_from_isr) for each
/// event. A task calls [`take`](Self::take) to consume one, blocking until an
/// event arrives. Events that arrive while no task is waiting accumulate, up
/// to [`max`](Self::max), so bursts aren't lost.
///
/// A give hands its permit directly to the highest-priority waiter (the one
/// that has waited the longest, among equals); the count is only incremented
/// if nobody is waiting.
pub struct EventLatch<P: Port> {
    port: P,
    max: usize,
    policy: OverflowPolicy,
    state: CpuLockCell<LatchState>,
}

struct LatchState {
    count: usize,
    waiters: WaitQueue<(), ()>,
}

impl LatchState {
    fn waiters(&mut self) -> &mut WaitQueue<(), ()> {
        &mut self.waiters
    }
}

impl fmt::Debug for LatchState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LatchState")
            .field("count", &self.count)
            .field("waiters", &self.waiters.len())
            .finish()
    }
}

/// The builder for [`EventLatch`].
#[must_use = "call `finish` to create the latch"]
pub struct EventLatchBuilder<P> {
    max: usize,
    initial: usize,
    policy: OverflowPolicy,
    _phantom: PhantomData<fn(P)>,
}

impl<P> fmt::Debug for EventLatchBuilder<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EventLatchBuilder")
            .field("max", &self.max)
            .field("initial", &self.initial)
            .field("policy", &self.policy)
            .finish()
    }
}

impl<P: Port> EventLatch<P> {
    /// Construct an `EventLatchBuilder`. The defaults describe a binary latch
    /// (`max = 1`) that starts empty.
    pub fn build() -> EventLatchBuilder<P> {
        EventLatchBuilder {
            max: 1,
            initial: 0,
            policy: OverflowPolicy::Saturate,
            _phantom: PhantomData,
        }
    }
}

impl<P: Port> EventLatchBuilder<P> {
    /// Specify the maximum count. Must be at least one.
    pub fn maximum(self, max: usize) -> Self {
        Self { max, ..self }
    }

    /// Specify the initial count. Must not exceed the maximum.
    pub fn initial(self, initial: usize) -> Self {
        Self { initial, ..self }
    }

    pub fn overflow_policy(self, policy: OverflowPolicy) -> Self {
        Self { policy, ..self }
    }

    pub fn finish(self, port: &P) -> Result<EventLatch<P>, CreateError> {
        if self.max == 0 || self.initial > self.max {
            return Err(BadParamError::BadParam.into());
        }

        Ok(EventLatch {
            port: port.clone(),
            max: self.max,
            policy: self.policy,
            state: CpuLockCell::new(LatchState {
                count: self.initial,
                waiters: WaitQueue::new(),
            }),
        })
    }
}

impl<P: Port> EventLatch<P> {
    /// Signal an event from task context.
    ///
    /// Requests a reschedule if this wakes a task that outranks the caller.
    pub fn give(&self) -> Result<(), GiveError> {
        log::trace!("EventLatch::give");
        let mut lock = self.state.lock();
        let woken = self.give_core(&mut lock)?;
        state::unlock_and_check_preemption(&self.port, lock, woken);
        Ok(())
    }

    /// Signal an event from an interrupt handler.
    ///
    /// Returns whether a task that outranks the interrupted one was woken.
    pub fn give_from_isr(&self, isr: &mut Isr<P>) -> Result<bool, GiveError> {
        log::trace!("EventLatch::give_from_isr");
        let mut lock = self.state.lock();
        match self.give_core(&mut lock) {
            Ok(woken) => Ok(isr.release(lock, woken)),
            Err(e) => {
                drop(lock);
                log::warn!("event lost in interrupt handler: {:?}", e);
                Err(e)
            }
        }
    }

    fn give_core(&self, state: &mut LatchState) -> Result<Option<Wakeup>, GiveError> {
        if let Some(slot) = state.waiters.pop() {
            // Give the permit to the waiter directly
            slot.complete(());
            return Ok(Some(slot.wakeup()));
        }

        if state.count < self.max {
            state.count += 1;
            Ok(None)
        } else {
            match self.policy {
                OverflowPolicy::Saturate => Err(GiveError::Overflow),
                OverflowPolicy::Wrap => {
                    state.count = 0;
                    Err(GiveError::Wrapped)
                }
            }
        }
    }

    /// Consume one event, waiting for at most `timeout` if there's none.
    ///
    /// Waiting is only possible in task context. In an interrupt handler,
    /// use [`take_from_isr`](Self::take_from_isr).
    pub fn take(&self, timeout: Timeout) -> Result<(), TakeError> {
        log::trace!("EventLatch::take({:?})", timeout);
        let mut lock = self.state.lock();
        if poll_core(&mut lock.count) {
            return Ok(());
        }

        let Some(blocker) = state::blocker(&self.port, timeout)? else {
            return Err(TakeError::Timeout);
        };

        // The wake-upper is responsible for transferring the permit
        let slot = lock.waiters.push(&blocker, ());
        drop(lock);

        wait::wait(
            &self.port,
            &self.state,
            LatchState::waiters,
            &slot,
            blocker.deadline,
        )
        .map_err(|()| TakeError::Timeout)
    }

    /// Consume one event if there's any.
    pub fn try_take(&self) -> Result<(), TryTakeError> {
        if poll_core(&mut self.state.lock().count) {
            Ok(())
        } else {
            Err(TryTakeError::WouldBlock)
        }
    }

    /// Consume one event from an interrupt handler if there's any.
    pub fn take_from_isr(&self, _isr: &mut Isr<P>) -> Result<(), TryTakeError> {
        self.try_take()
    }

    /// Get the number of accumulated events. The value may be stale by the
    /// time it's examined.
    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Get the number of tasks waiting in [`take`](Self::take).
    pub fn waiting_tasks(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Release `task` from a [`take`](Self::take) it's blocked in, making it
    /// fail with [`TakeError::Timeout`]. Returns `false` if the task wasn't
    /// waiting on this latch.
    pub fn abort_wait(&self, task: TaskId) -> bool {
        let mut lock = self.state.lock();
        match lock.waiters.abort(task) {
            Some(woken) => {
                state::unlock_and_check_preemption(&self.port, lock, Some(woken));
                true
            }
            None => false,
        }
    }
}

/// Consume one event from `count` if there's any.
#[inline]
fn poll_core(count: &mut usize) -> bool {
    if *count > 0 {
        *count -= 1;
        true
    } else {
        false
    }
}

impl<P: Port> fmt::Debug for EventLatch<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EventLatch")
            .field("max", &self.max)
            .field("policy", &self.policy)
            .field("state", &self.state)
            .finish()
    }
}
