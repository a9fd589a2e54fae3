//! Deterministic single-threaded port for unit tests
//!
//! There's only one thread of execution. When the running task suspends, the
//! clock jumps straight to the next scheduled interrupt (which then runs in
//! interrupt context) or, failing that, to the task's deadline.
use alloc::{boxed::Box, sync::Arc, vec::Vec};

use crate::{
    error::{BadParamError, SpawnError},
    interrupt::Isr,
    port::{Context, Port, PortConfig, Priority, TaskAttr, TaskEntry, TaskId},
    time::Ticks,
};

type Handler = Box<dyn FnOnce(&mut Isr<SimPort>) + Send>;

struct ScheduledInterrupt {
    at: Ticks,
    handler: Handler,
}

struct SimTask {
    attr: TaskAttr,
    entry: Option<TaskEntry>,
}

struct SimState {
    now: Ticks,
    context: Context,
    /// The task beneath the running interrupt handler.
    interrupted: Option<TaskId>,
    tasks: Vec<SimTask>,
    /// Sorted by `at`, stable among equal times.
    interrupts: Vec<ScheduledInterrupt>,
    resumed: Vec<TaskId>,
    reschedule_requests: usize,
}

#[derive(Clone)]
pub(crate) struct SimPort {
    config: Arc<PortConfig>,
    state: Arc<spin::Mutex<SimState>>,
}

impl SimPort {
    pub(crate) fn new() -> Self {
        Self::with_config(PortConfig::DEFAULT)
    }

    pub(crate) fn with_config(config: PortConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            config: Arc::new(config),
            state: Arc::new(spin::Mutex::new(SimState {
                now: 0,
                context: Context::Boot,
                interrupted: None,
                tasks: Vec::new(),
                interrupts: Vec::new(),
                resumed: Vec::new(),
                reschedule_requests: 0,
            })),
        }
    }

    /// Register a task and make it the running one.
    pub(crate) fn enter_task(&self, name: &'static str, priority: Priority) -> TaskId {
        let mut state = self.state.lock();
        let id = TaskId::new(state.tasks.len());
        state.tasks.push(SimTask {
            attr: TaskAttr {
                name,
                priority,
                stack_size: self.config.default_stack_size,
            },
            entry: None,
        });
        state.context = Context::Task(id);
        id
    }

    /// Make a registered task the running one.
    pub(crate) fn switch_to(&self, task: TaskId) {
        self.state.lock().context = Context::Task(task);
    }

    pub(crate) fn now(&self) -> Ticks {
        self.state.lock().now
    }

    /// Advance the clock, running the interrupts that become due.
    pub(crate) fn advance(&self, ticks: Ticks) {
        let target = self.now() + ticks;
        while let Some(handler) = self.next_interrupt(Some(target)) {
            self.run_interrupt(handler);
        }
        let mut state = self.state.lock();
        state.now = state.now.max(target);
    }

    /// Schedule an interrupt at the absolute tick `at`.
    pub(crate) fn at(&self, at: Ticks, handler: impl FnOnce(&mut Isr<SimPort>) + Send + 'static) {
        let mut state = self.state.lock();
        let i = state.interrupts.partition_point(|x| x.at <= at);
        state.interrupts.insert(
            i,
            ScheduledInterrupt {
                at,
                handler: Box::new(handler),
            },
        );
    }

    /// Run an interrupt handler right now.
    pub(crate) fn interrupt<R>(&self, handler: impl FnOnce(&mut Isr<SimPort>) -> R) -> R {
        let saved = {
            let mut state = self.state.lock();
            let saved = state.context;
            state.interrupted = match saved {
                Context::Task(task) => Some(task),
                _ => None,
            };
            state.context = Context::Interrupt;
            saved
        };

        let mut isr = Isr::enter(self).unwrap();
        let result = handler(&mut isr);
        isr.yield_from_isr();

        let mut state = self.state.lock();
        state.context = saved;
        state.interrupted = None;
        result
    }

    /// Take the list of tasks resumed so far.
    pub(crate) fn take_resumed(&self) -> Vec<TaskId> {
        core::mem::take(&mut self.state.lock().resumed)
    }

    pub(crate) fn reschedule_requests(&self) -> usize {
        self.state.lock().reschedule_requests
    }

    /// Take the entry point of a task created by `spawn_task`.
    pub(crate) fn take_entry(&self, task: TaskId) -> Option<TaskEntry> {
        self.state.lock().tasks.get_mut(task.get())?.entry.take()
    }

    pub(crate) fn task_attr(&self, task: TaskId) -> Option<TaskAttr> {
        Some(self.state.lock().tasks.get(task.get())?.attr)
    }

    fn next_interrupt(&self, deadline: Option<Ticks>) -> Option<Handler> {
        let mut state = self.state.lock();
        let first = state.interrupts.first()?;
        if deadline.map_or(false, |deadline| first.at > deadline) {
            return None;
        }
        let first = state.interrupts.remove(0);
        state.now = state.now.max(first.at);
        Some(first.handler)
    }

    fn run_interrupt(&self, handler: Handler) {
        self.interrupt(handler);
    }
}

impl Port for SimPort {
    fn config(&self) -> &PortConfig {
        &self.config
    }

    fn context(&self) -> Context {
        self.state.lock().context
    }

    fn running_priority(&self) -> Option<Priority> {
        let state = self.state.lock();
        let task = match state.context {
            Context::Task(task) => task,
            Context::Interrupt => state.interrupted?,
            Context::Boot => return None,
        };
        Some(state.tasks[task.get()].attr.priority)
    }

    fn task_priority(&self, task: TaskId) -> Option<Priority> {
        Some(self.state.lock().tasks.get(task.get())?.attr.priority)
    }

    fn tick_count(&self) -> Ticks {
        self.now()
    }

    fn spawn_task(&self, attr: TaskAttr, entry: TaskEntry) -> Result<TaskId, SpawnError> {
        if !self.config.is_valid_priority(attr.priority) {
            return Err(BadParamError::BadParam.into());
        }
        let mut state = self.state.lock();
        let id = TaskId::new(state.tasks.len());
        state.tasks.push(SimTask {
            attr,
            entry: Some(entry),
        });
        Ok(id)
    }

    fn suspend(&self, deadline: Option<Ticks>) {
        if let Some(handler) = self.next_interrupt(deadline) {
            self.run_interrupt(handler);
            return;
        }
        let deadline = deadline.expect("the only task was suspended forever");
        let mut state = self.state.lock();
        state.now = state.now.max(deadline);
    }

    fn resume(&self, task: TaskId) {
        self.state.lock().resumed.push(task);
    }

    fn request_reschedule(&self) {
        self.state.lock().reschedule_requests += 1;
    }
}
