#![doc = include_str!("./lib.md")]
use relay_kernel::{
    error::{BadParamError, CapacityExceededError},
    Context, Isr, Port, PortConfig, Priority, SpawnError, TaskAttr, TaskEntry, TaskId, Ticks,
};
use slab::Slab;
use spin::Mutex as SpinMutex;
use std::{
    cell::Cell,
    fmt, mem,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// Used by applications to set up logging
#[doc(hidden)]
pub extern crate env_logger;

/// The smallest stack given to a task thread. Stack sizes in [`TaskAttr`] are
/// expressed in words for a microcontroller, which is far too small for a
/// hosted thread that formats log messages.
pub const MIN_THREAD_STACK_SIZE: usize = 256 * 1024;

static NEXT_PORT_ID: AtomicUsize = AtomicUsize::new(0);

/// A [`Port`] that runs tasks as OS threads.
///
/// Tasks really run in parallel, so priorities only affect the order in
/// which blocked tasks are served and the reschedule requests reported by
/// the kernel objects. Interrupts are simulated by
/// [`pend_interrupt`](Self::pend_interrupt).
#[derive(Clone)]
pub struct StdPort {
    inner: Arc<Inner>,
}

struct Inner {
    /// Distinguishes the threads of this port from those of other ports in
    /// the same process.
    id: usize,
    config: PortConfig,
    origin: Instant,
    tasks: SpinMutex<Slab<TaskCb>>,
    reschedule_requests: AtomicUsize,
}

#[derive(Debug)]
struct TaskCb {
    name: &'static str,
    priority: Priority,
    /// Set by the task's thread before it runs the entry point.
    thread: Option<thread::Thread>,
    /// Set by `resume` and cleared by the `suspend` call it releases. Other
    /// users of the thread's park token can't consume it.
    resume_pending: Arc<AtomicBool>,
}

/// The role of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadRole {
    Unknown,
    /// The backing thread for a task.
    Task { port: usize, task: TaskId },
    /// A thread running a simulated interrupt handler.
    Interrupt {
        port: usize,
        preempted: Option<Priority>,
    },
}

thread_local! {
    /// The current thread's role. It's automatically assigned after the
    /// creation of a thread managed by a port.
    static THREAD_ROLE: Cell<ThreadRole> = Cell::new(ThreadRole::Unknown);
}

impl StdPort {
    /// Construct a port with [`PortConfig::DEFAULT`].
    pub fn new() -> Self {
        Self::with_config(PortConfig::DEFAULT)
    }

    pub fn with_config(config: PortConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let id = NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!("creating port {} with {:?}", id, config);
        Self {
            inner: Arc::new(Inner {
                id,
                config,
                origin: Instant::now(),
                tasks: SpinMutex::new(Slab::new()),
                reschedule_requests: AtomicUsize::new(0),
            }),
        }
    }

    fn role(&self) -> ThreadRole {
        THREAD_ROLE.with(|role| role.get())
    }

    /// Create a task with the default stack size.
    pub fn spawn(
        &self,
        name: &'static str,
        priority: Priority,
        entry: impl FnOnce() + Send + 'static,
    ) -> Result<TaskId, SpawnError> {
        let attr = TaskAttr {
            name,
            priority,
            stack_size: self.inner.config.default_stack_size,
        };
        self.spawn_task(attr, Box::new(entry))
    }

    /// Run `handler` as an interrupt handler on the current thread.
    ///
    /// The task running on the current thread (if any) is treated as the
    /// interrupted task. When the handler returns, the [`Isr`] token is
    /// consumed by [`Isr::yield_from_isr`], whose result is returned
    /// alongside the handler's.
    pub fn pend_interrupt<R>(&self, handler: impl FnOnce(&mut Isr<Self>) -> R) -> (R, bool) {
        let saved = self.role();
        let preempted = self.running_priority();
        THREAD_ROLE.with(|role| {
            role.set(ThreadRole::Interrupt {
                port: self.inner.id,
                preempted,
            })
        });
        log::trace!("pend_interrupt: entering (preempted = {:?})", preempted);

        let mut isr = match Isr::enter(self) {
            Ok(isr) => isr,
            Err(_) => unreachable!(),
        };
        let output = handler(&mut isr);
        let yielded = isr.yield_from_isr();

        log::trace!("pend_interrupt: leaving (yield = {})", yielded);
        THREAD_ROLE.with(|role| role.set(saved));
        (output, yielded)
    }

    /// Block the current thread for `ticks` ticks.
    pub fn delay(&self, ticks: Ticks) {
        let deadline = self.tick_count().saturating_add(ticks);
        loop {
            let now = self.tick_count();
            if now >= deadline {
                break;
            }
            thread::sleep(self.ticks_to_duration(deadline - now));
        }
    }

    /// Get the number of reschedule requests made so far.
    pub fn reschedule_requests(&self) -> usize {
        self.inner.reschedule_requests.load(Ordering::Relaxed)
    }

    /// Get the number of live tasks.
    pub fn num_tasks(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    /// Get the name of a live task.
    pub fn task_name(&self, task: TaskId) -> Option<&'static str> {
        self.inner.tasks.lock().get(task.get()).map(|cb| cb.name)
    }

    /// Convert ticks to a `Duration`, rounding up.
    fn ticks_to_duration(&self, ticks: Ticks) -> Duration {
        let hz = self.inner.config.tick_rate_hz.max(1) as u128;
        let nanos = (ticks as u128 * 1_000_000_000 + hz - 1) / hz;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }
}

impl Default for StdPort {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StdPort")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .field("tasks", &self.inner.tasks.try_lock().map(|tasks| tasks.len()))
            .finish()
    }
}

impl Port for StdPort {
    fn config(&self) -> &PortConfig {
        &self.inner.config
    }

    fn context(&self) -> Context {
        match self.role() {
            ThreadRole::Task { port, task } if port == self.inner.id => Context::Task(task),
            ThreadRole::Interrupt { port, .. } if port == self.inner.id => Context::Interrupt,
            _ => Context::Boot,
        }
    }

    fn running_priority(&self) -> Option<Priority> {
        match self.role() {
            ThreadRole::Task { port, task } if port == self.inner.id => self.task_priority(task),
            ThreadRole::Interrupt { port, preempted } if port == self.inner.id => preempted,
            _ => None,
        }
    }

    fn task_priority(&self, task: TaskId) -> Option<Priority> {
        self.inner.tasks.lock().get(task.get()).map(|cb| cb.priority)
    }

    fn tick_count(&self) -> Ticks {
        let elapsed = self.inner.origin.elapsed().as_nanos();
        let ticks = elapsed * self.inner.config.tick_rate_hz as u128 / 1_000_000_000;
        ticks.min(Ticks::MAX as u128) as Ticks
    }

    fn spawn_task(&self, attr: TaskAttr, entry: TaskEntry) -> Result<TaskId, SpawnError> {
        if !self.inner.config.is_valid_priority(attr.priority) {
            return Err(BadParamError::BadParam.into());
        }

        let task = {
            let mut tasks = self.inner.tasks.lock();
            TaskId::new(tasks.insert(TaskCb {
                name: attr.name,
                priority: attr.priority,
                thread: None,
                resume_pending: Arc::new(AtomicBool::new(false)),
            }))
        };

        let stack_size = attr
            .stack_size
            .saturating_mul(mem::size_of::<usize>())
            .max(MIN_THREAD_STACK_SIZE);
        let inner = Arc::clone(&self.inner);
        let result = thread::Builder::new()
            .name(attr.name.to_owned())
            .stack_size(stack_size)
            .spawn(move || {
                THREAD_ROLE.with(|role| {
                    role.set(ThreadRole::Task {
                        port: inner.id,
                        task,
                    })
                });
                if let Some(cb) = inner.tasks.lock().get_mut(task.get()) {
                    cb.thread = Some(thread::current());
                }
                log::debug!("{:?} ({}) started", task, attr.name);

                entry();

                log::debug!("{:?} ({}) exited", task, attr.name);
                inner.tasks.lock().remove(task.get());
            });

        match result {
            Ok(_) => {
                log::trace!("spawn_task({:?}) = {:?}", attr, task);
                Ok(task)
            }
            Err(e) => {
                log::warn!("failed to spawn a thread for {}: {}", attr.name, e);
                self.inner.tasks.lock().remove(task.get());
                Err(CapacityExceededError::CapacityExceeded.into())
            }
        }
    }

    fn suspend(&self, deadline: Option<Ticks>) {
        log::trace!("suspend(deadline = {:?})", deadline);
        let pending = match self.context() {
            Context::Task(task) => self
                .inner
                .tasks
                .lock()
                .get(task.get())
                .map(|cb| Arc::clone(&cb.resume_pending)),
            _ => None,
        };
        let Some(pending) = pending else {
            // Nothing can resume this thread; only honor the deadline
            if let Some(deadline) = deadline {
                self.delay(deadline.saturating_sub(self.tick_count()));
            }
            return;
        };

        loop {
            if pending.swap(false, Ordering::Acquire) {
                return;
            }
            match deadline {
                None => thread::park(),
                Some(deadline) => {
                    let now = self.tick_count();
                    if deadline <= now {
                        return;
                    }
                    thread::park_timeout(self.ticks_to_duration(deadline - now));
                }
            }
        }
    }

    fn resume(&self, task: TaskId) {
        log::trace!("resume({:?})", task);
        let target = self
            .inner
            .tasks
            .lock()
            .get(task.get())
            .map(|cb| (Arc::clone(&cb.resume_pending), cb.thread.clone()));
        if let Some((pending, thread)) = target {
            pending.store(true, Ordering::Release);
            if let Some(thread) = thread {
                thread.unpark();
            }
        }
    }

    fn request_reschedule(&self) {
        log::trace!("request_reschedule");
        self.inner
            .reschedule_requests
            .fetch_add(1, Ordering::Relaxed);
        if let ThreadRole::Task { .. } = self.role() {
            thread::yield_now();
        }
    }
}
