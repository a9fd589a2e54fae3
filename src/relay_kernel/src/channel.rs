//! Bounded channels
use alloc::vec::Vec;
use core::{fmt, marker::PhantomData};

use crate::{
    error::{
        BadContextError, BadParamError, CreateError, ReceiveError, SendError, TryReceiveError,
        TrySendError,
    },
    interrupt::Isr,
    klock::CpuLockCell,
    port::{Port, TaskId},
    state::{self, Wakeup},
    time::Timeout,
    utils::Ring,
    wait::{self, WaitQueue},
};

/// A fixed-capacity FIFO queue of items passed between tasks and interrupt
/// handlers by value.
///
/// Tasks may block in [`send`](Self::send) until there's room and in
/// [`receive`](Self::receive) until an item arrives. Interrupt handlers use
/// the `*_from_isr` variants, which never block.
///
/// When a send makes an item available and tasks are blocked in `receive`,
/// the item goes straight to the highest-priority receiver. Symmetrically, a
/// receive that frees a slot moves the item of the highest-priority blocked
/// sender into the queue. Items come out in exactly the order they went in.
pub struct Channel<T, P: Port> {
    port: P,
    state: CpuLockCell<ChannelState<T>>,
}

struct ChannelState<T> {
    ring: Ring<T>,
    send_waiters: WaitQueue<PendingSend<T>, ()>,
    receive_waiters: WaitQueue<(), T>,
}

/// The item a blocked sender is waiting to deliver.
struct PendingSend<T> {
    item: T,
    to_front: bool,
}

impl<T> ChannelState<T> {
    fn send_waiters(&mut self) -> &mut WaitQueue<PendingSend<T>, ()> {
        &mut self.send_waiters
    }

    fn receive_waiters(&mut self) -> &mut WaitQueue<(), T> {
        &mut self.receive_waiters
    }

    /// Deliver `item` to a waiting receiver or store it. Gives the item back
    /// if the channel is full.
    fn send_core(&mut self, item: T, to_front: bool) -> Result<Option<Wakeup>, T> {
        if let Some(slot) = self.receive_waiters.pop() {
            // Receivers only wait on an empty channel
            debug_assert!(self.ring.is_empty());
            slot.complete(item);
            return Ok(Some(slot.wakeup()));
        }

        if to_front {
            self.ring.push_front(item)?;
        } else {
            self.ring.push_back(item)?;
        }
        Ok(None)
    }

    /// Take the oldest item, refilling the freed slot from a blocked sender.
    fn receive_core(&mut self) -> Option<(T, Option<Wakeup>)> {
        let item = self.ring.pop_front()?;
        let woken = self.admit_sender();
        Some((item, woken))
    }

    /// Move the item of the next blocked sender into the ring, which must
    /// have a free slot.
    fn admit_sender(&mut self) -> Option<Wakeup> {
        debug_assert!(!self.ring.is_full());
        let slot = self.send_waiters.pop()?;
        let PendingSend { item, to_front } = slot.complete(());
        let stored = if to_front {
            self.ring.push_front(item)
        } else {
            self.ring.push_back(item)
        };
        debug_assert!(stored.is_ok());
        Some(slot.wakeup())
    }
}

impl<T> fmt::Debug for ChannelState<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ChannelState")
            .field("len", &self.ring.len())
            .field("send_waiters", &self.send_waiters.len())
            .field("receive_waiters", &self.receive_waiters.len())
            .finish()
    }
}

/// The builder for [`Channel`].
#[must_use = "call `finish` to create the channel"]
pub struct ChannelBuilder<T, P> {
    capacity: usize,
    _phantom: PhantomData<fn(T, P)>,
}

impl<T, P> fmt::Debug for ChannelBuilder<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ChannelBuilder")
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<T: Send, P: Port> Channel<T, P> {
    /// Construct a `ChannelBuilder`.
    pub fn build() -> ChannelBuilder<T, P> {
        ChannelBuilder {
            capacity: 0,
            _phantom: PhantomData,
        }
    }
}

impl<T: Send, P: Port> ChannelBuilder<T, P> {
    /// Specify the number of items the channel can hold. Must be at least
    /// one.
    pub fn capacity(self, capacity: usize) -> Self {
        Self { capacity, ..self }
    }

    pub fn finish(self, port: &P) -> Result<Channel<T, P>, CreateError> {
        if self.capacity == 0 {
            return Err(BadParamError::BadParam.into());
        }

        Ok(Channel {
            port: port.clone(),
            state: CpuLockCell::new(ChannelState {
                ring: Ring::try_with_capacity(self.capacity)?,
                send_waiters: WaitQueue::new(),
                receive_waiters: WaitQueue::new(),
            }),
        })
    }
}

impl<T: Send, P: Port> Channel<T, P> {
    /// Append an item, waiting for at most `timeout` for a free slot.
    ///
    /// On failure the item is handed back in the error.
    pub fn send(&self, item: T, timeout: Timeout) -> Result<(), SendError<T>> {
        log::trace!("Channel::send({:?})", timeout);
        self.send_inner(item, timeout, false)
    }

    /// Like [`send`](Self::send), but the item is placed before every item
    /// already in the channel.
    pub fn send_to_front(&self, item: T, timeout: Timeout) -> Result<(), SendError<T>> {
        log::trace!("Channel::send_to_front({:?})", timeout);
        self.send_inner(item, timeout, true)
    }

    fn send_inner(&self, item: T, timeout: Timeout, to_front: bool) -> Result<(), SendError<T>> {
        let mut lock = self.state.lock();
        let item = match lock.send_core(item, to_front) {
            Ok(woken) => {
                state::unlock_and_check_preemption(&self.port, lock, woken);
                return Ok(());
            }
            Err(item) => item,
        };

        let blocker = match state::blocker(&self.port, timeout) {
            Ok(Some(blocker)) => blocker,
            Ok(None) => return Err(SendError::Full(item)),
            Err(BadContextError::BadContext) => return Err(SendError::BadContext(item)),
        };

        // The receiver that frees a slot moves the item in
        let slot = lock
            .send_waiters
            .push(&blocker, PendingSend { item, to_front });
        drop(lock);

        wait::wait(
            &self.port,
            &self.state,
            ChannelState::send_waiters,
            &slot,
            blocker.deadline,
        )
        .map_err(|pending| SendError::Full(pending.item))
    }

    /// Append an item if there's a free slot, without waiting.
    pub fn try_send(&self, item: T) -> Result<(), TrySendError<T>> {
        let mut lock = self.state.lock();
        match lock.send_core(item, false) {
            Ok(woken) => {
                state::unlock_and_check_preemption(&self.port, lock, woken);
                Ok(())
            }
            Err(item) => Err(TrySendError::Full(item)),
        }
    }

    /// Append an item from an interrupt handler. A full channel makes this
    /// fail immediately and leaves the channel unchanged.
    ///
    /// Returns whether a task that outranks the interrupted one was woken.
    pub fn send_from_isr(&self, isr: &mut Isr<P>, item: T) -> Result<bool, TrySendError<T>> {
        log::trace!("Channel::send_from_isr");
        self.send_from_isr_inner(isr, item, false)
    }

    pub fn send_to_front_from_isr(
        &self,
        isr: &mut Isr<P>,
        item: T,
    ) -> Result<bool, TrySendError<T>> {
        log::trace!("Channel::send_to_front_from_isr");
        self.send_from_isr_inner(isr, item, true)
    }

    fn send_from_isr_inner(
        &self,
        isr: &mut Isr<P>,
        item: T,
        to_front: bool,
    ) -> Result<bool, TrySendError<T>> {
        let mut lock = self.state.lock();
        match lock.send_core(item, to_front) {
            Ok(woken) => Ok(isr.release(lock, woken)),
            Err(item) => Err(TrySendError::Full(item)),
        }
    }

    /// Append an item, discarding the oldest one if the channel is full.
    /// Never blocks. Returns the discarded item.
    ///
    /// On a channel of capacity one this keeps the latest value only, which
    /// makes it a mailbox.
    pub fn overwrite(&self, item: T) -> Option<T> {
        log::trace!("Channel::overwrite");
        let mut lock = self.state.lock();
        let (displaced, woken) = lock.overwrite_core(item);
        state::unlock_and_check_preemption(&self.port, lock, woken);
        displaced
    }

    /// [`overwrite`](Self::overwrite) for interrupt handlers. The `bool`
    /// tells whether a task that outranks the interrupted one was woken.
    pub fn overwrite_from_isr(&self, isr: &mut Isr<P>, item: T) -> (Option<T>, bool) {
        log::trace!("Channel::overwrite_from_isr");
        let mut lock = self.state.lock();
        let (displaced, woken) = lock.overwrite_core(item);
        (displaced, isr.release(lock, woken))
    }

    /// Take the oldest item, waiting for at most `timeout` for one to arrive.
    pub fn receive(&self, timeout: Timeout) -> Result<T, ReceiveError> {
        log::trace!("Channel::receive({:?})", timeout);
        let mut lock = self.state.lock();
        if let Some((item, woken)) = lock.receive_core() {
            state::unlock_and_check_preemption(&self.port, lock, woken);
            return Ok(item);
        }

        let Some(blocker) = state::blocker(&self.port, timeout)? else {
            return Err(ReceiveError::Timeout);
        };

        // The sender hands the item over directly
        let slot = lock.receive_waiters.push(&blocker, ());
        drop(lock);

        wait::wait(
            &self.port,
            &self.state,
            ChannelState::receive_waiters,
            &slot,
            blocker.deadline,
        )
        .map_err(|()| ReceiveError::Timeout)
    }

    /// Take the oldest item if there's any.
    pub fn try_receive(&self) -> Result<T, TryReceiveError> {
        let mut lock = self.state.lock();
        match lock.receive_core() {
            Some((item, woken)) => {
                state::unlock_and_check_preemption(&self.port, lock, woken);
                Ok(item)
            }
            None => Err(TryReceiveError::Empty),
        }
    }

    /// Take the oldest item from an interrupt handler.
    ///
    /// The `bool` tells whether freeing the slot woke a blocked sender that
    /// outranks the interrupted task.
    pub fn receive_from_isr(&self, isr: &mut Isr<P>) -> Result<(T, bool), TryReceiveError> {
        log::trace!("Channel::receive_from_isr");
        let mut lock = self.state.lock();
        match lock.receive_core() {
            Some((item, woken)) => Ok((item, isr.release(lock, woken))),
            None => Err(TryReceiveError::Empty),
        }
    }

    /// Get a copy of the oldest item without removing it.
    pub fn peek(&self) -> Result<T, TryReceiveError>
    where
        T: Clone,
    {
        self.state
            .lock()
            .ring
            .front()
            .cloned()
            .ok_or(TryReceiveError::Empty)
    }

    pub fn peek_from_isr(&self, _isr: &mut Isr<P>) -> Result<T, TryReceiveError>
    where
        T: Clone,
    {
        self.peek()
    }

    /// Get the number of stored items.
    pub fn len(&self) -> usize {
        self.state.lock().ring.len()
    }

    pub fn spaces_available(&self) -> usize {
        let lock = self.state.lock();
        lock.ring.capacity() - lock.ring.len()
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().ring.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().ring.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.state.lock().ring.is_full()
    }

    /// Get the number of tasks waiting in [`send`](Self::send).
    pub fn waiting_senders(&self) -> usize {
        self.state.lock().send_waiters.len()
    }

    /// Get the number of tasks waiting in [`receive`](Self::receive).
    pub fn waiting_receivers(&self) -> usize {
        self.state.lock().receive_waiters.len()
    }

    /// Discard every stored item. Blocked senders are then admitted into the
    /// freed slots.
    pub fn reset(&self) {
        log::trace!("Channel::reset");
        let mut lock = self.state.lock();
        lock.ring.clear();

        let mut woken = Vec::new();
        while !lock.ring.is_full() {
            match lock.admit_sender() {
                Some(wakeup) => woken.push(wakeup),
                None => break,
            }
        }
        state::unlock_and_check_preemption(&self.port, lock, woken);
    }

    /// Release `task` from a [`send`](Self::send) or
    /// [`receive`](Self::receive) it's blocked in, making it fail as if it
    /// timed out. Returns `false` if the task wasn't waiting on this
    /// channel.
    pub fn abort_wait(&self, task: TaskId) -> bool {
        let mut lock = self.state.lock();
        let woken = lock
            .send_waiters
            .abort(task)
            .or_else(|| lock.receive_waiters.abort(task));
        let found = woken.is_some();
        state::unlock_and_check_preemption(&self.port, lock, woken);
        found
    }
}

impl<T> ChannelState<T> {
    fn overwrite_core(&mut self, item: T) -> (Option<T>, Option<Wakeup>) {
        let displaced = if self.ring.is_full() {
            self.ring.pop_front()
        } else {
            None
        };
        match self.send_core(item, false) {
            Ok(woken) => (displaced, woken),
            Err(_) => unreachable!("overwrite found no free slot"),
        }
    }
}

impl<T, P: Port> fmt::Debug for Channel<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Channel")
            .field("state", &self.state)
            .finish()
    }
}
