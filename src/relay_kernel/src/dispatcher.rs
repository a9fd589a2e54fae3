//! Deferred function calls
//!
//! An interrupt handler that has more work to do than it should do with
//! interrupts masked records a function call and returns. A dedicated
//! high-priority task makes the call shortly afterwards in task context.
use alloc::{boxed::Box, sync::Arc};
use core::{
    convert::Infallible,
    fmt,
    marker::PhantomData,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

use crate::{
    channel::Channel,
    error::{
        BadContextError, BadParamError, CreateError, PendError, ReceiveError, SendError,
        SpawnError,
    },
    interrupt::Isr,
    port::{Context, Port, Priority, TaskAttr, TaskId},
    time::Timeout,
};

/// The signature of a deferrable function.
pub type DeferredFn = fn(usize, u32);

/// A recorded function call.
#[derive(Debug, Clone, Copy)]
pub struct DeferredCall {
    function: DeferredFn,
    arg1: usize,
    arg2: u32,
    seq: u64,
}

impl DeferredCall {
    pub(crate) fn new(function: DeferredFn, arg1: usize, arg2: u32) -> Self {
        Self {
            function,
            arg1,
            arg2,
            seq: 0,
        }
    }

    /// Number the call as it's taken off its queue. Queues are FIFO, so with
    /// a single consumer this numbers calls in the order they were enqueued.
    pub(crate) fn dequeued(self, seq: &AtomicU64) -> Self {
        Self {
            seq: seq.fetch_add(1, Ordering::Relaxed),
            ..self
        }
    }

    /// Get the position of this call in the order calls were enqueued.
    /// Dropped calls don't take a number.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[inline]
    pub fn args(&self) -> (usize, u32) {
        (self.arg1, self.arg2)
    }

    /// Make the call.
    pub fn invoke(self) {
        log::trace!("invoking deferred call #{}", self.seq);
        (self.function)(self.arg1, self.arg2)
    }
}

/// Owns a queue of [`DeferredCall`]s and the task that makes them.
pub struct Dispatcher<P: Port> {
    port: P,
    attr: TaskAttr,
    queue: Channel<DeferredCall, P>,
    next_seq: AtomicU64,
    dropped: AtomicUsize,
}

/// The builder for [`Dispatcher`].
#[must_use = "call `finish` to create the dispatcher"]
pub struct DispatcherBuilder<P> {
    name: &'static str,
    priority: Option<Priority>,
    capacity: Option<usize>,
    stack_size: Option<usize>,
    _phantom: PhantomData<fn(P)>,
}

impl<P> fmt::Debug for DispatcherBuilder<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DispatcherBuilder")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("capacity", &self.capacity)
            .field("stack_size", &self.stack_size)
            .finish()
    }
}

impl<P: Port> Dispatcher<P> {
    /// Construct a `DispatcherBuilder`. Unless overridden, the dispatcher
    /// task takes the timer service's priority and its queue takes the
    /// timer service's queue length.
    pub fn build() -> DispatcherBuilder<P> {
        DispatcherBuilder {
            name: "Deferred",
            priority: None,
            capacity: None,
            stack_size: None,
            _phantom: PhantomData,
        }
    }
}

impl<P: Port> DispatcherBuilder<P> {
    pub fn name(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    /// Specify the dispatcher task's priority. This should outrank the tasks
    /// whose interrupts defer work to it.
    pub fn priority(self, priority: Priority) -> Self {
        Self {
            priority: Some(priority),
            ..self
        }
    }

    /// Specify the number of calls that can be pending at once.
    pub fn capacity(self, capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..self
        }
    }

    pub fn stack_size(self, stack_size: usize) -> Self {
        Self {
            stack_size: Some(stack_size),
            ..self
        }
    }

    pub fn finish(self, port: &P) -> Result<Dispatcher<P>, CreateError> {
        let config = port.config();
        let priority = self.priority.unwrap_or(config.timer_task_priority);
        if !config.is_valid_priority(priority) {
            return Err(BadParamError::BadParam.into());
        }

        let queue = Channel::build()
            .capacity(self.capacity.unwrap_or(config.timer_queue_len))
            .finish(port)?;

        Ok(Dispatcher {
            port: port.clone(),
            attr: TaskAttr {
                name: self.name,
                priority,
                stack_size: self.stack_size.unwrap_or(config.default_stack_size),
            },
            queue,
            next_seq: AtomicU64::new(0),
            dropped: AtomicUsize::new(0),
        })
    }
}

impl<P: Port> Dispatcher<P> {
    fn note_drop(&self) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        log::warn!("deferred call dropped: queue full ({} so far)", dropped);
    }

    /// Defer `function(arg1, arg2)` from task context, waiting for at most
    /// `timeout` if the queue is full.
    pub fn pend(
        &self,
        function: DeferredFn,
        arg1: usize,
        arg2: u32,
        timeout: Timeout,
    ) -> Result<(), PendError> {
        log::trace!("Dispatcher::pend({:?})", timeout);
        match self
            .queue
            .send(DeferredCall::new(function, arg1, arg2), timeout)
        {
            Ok(()) => Ok(()),
            Err(SendError::Full(_)) => {
                self.note_drop();
                Err(PendError::Full)
            }
            Err(SendError::BadContext(_)) => Err(PendError::BadContext),
        }
    }

    /// Defer `function(arg1, arg2)` from an interrupt handler. If the queue
    /// is full, the call is dropped and `Err(Full)` is returned.
    ///
    /// Returns whether the dispatcher task outranks the interrupted task and
    /// was woken.
    pub fn pend_from_isr(
        &self,
        isr: &mut Isr<P>,
        function: DeferredFn,
        arg1: usize,
        arg2: u32,
    ) -> Result<bool, PendError> {
        log::trace!("Dispatcher::pend_from_isr");
        self.queue
            .send_from_isr(isr, DeferredCall::new(function, arg1, arg2))
            .map_err(|_| {
                self.note_drop();
                PendError::Full
            })
    }

    /// Wait for at most `timeout` for a call and make it. Returns the call
    /// that was made.
    ///
    /// Waiting forever is only possible in a task; elsewhere this fails with
    /// `BadContext` rather than returning at once.
    pub fn run_once(&self, timeout: Timeout) -> Result<DeferredCall, ReceiveError> {
        if timeout == Timeout::Forever && !matches!(self.port.context(), Context::Task(_)) {
            return Err(BadContextError::BadContext.into());
        }
        let call = self.queue.receive(timeout)?.dequeued(&self.next_seq);
        call.invoke();
        Ok(call)
    }

    /// Make calls as they arrive. Only returns if the caller can't wait.
    pub fn run(&self) -> Result<Infallible, ReceiveError> {
        loop {
            self.run_once(Timeout::Forever)?;
        }
    }

    /// Create the dispatcher task.
    pub fn spawn(self: &Arc<Self>) -> Result<TaskId, SpawnError> {
        let this = Arc::clone(self);
        let task = self.port.spawn_task(
            self.attr,
            Box::new(move || {
                log::debug!("{} task started", this.attr.name);
                let Err(e) = this.run();
                log::warn!("{} task exiting: {:?}", this.attr.name, e);
            }),
        )?;
        log::debug!("spawned {} as {:?}", self.attr.name, task);
        Ok(task)
    }

    /// Get the number of calls waiting to be made.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Get the number of calls dropped because the queue was full.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn priority(&self) -> Priority {
        self.attr.priority
    }
}

impl<P: Port> fmt::Debug for Dispatcher<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("attr", &self.attr)
            .field("queue", &self.queue)
            .field("dropped", &self.dropped())
            .finish()
    }
}
