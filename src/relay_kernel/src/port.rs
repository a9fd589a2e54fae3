//! The scheduler collaborator
use alloc::boxed::Box;
use core::fmt;

use crate::{error::SpawnError, time::Ticks};

/// Task priority. A larger value means a more urgent task.
pub type Priority = usize;

/// Identifies a task managed by a [`Port`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(usize);

impl TaskId {
    #[inline]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

/// The kind of code that is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    /// The scheduler hasn't started, or the caller is a thread the port
    /// doesn't manage. Nothing can block here; block times are ignored.
    Boot,
    /// A task. This is the only context where blocking is allowed.
    Task(TaskId),
    /// An interrupt handler.
    Interrupt,
}

/// Static configuration shared by a port and the objects created on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConfig {
    /// The number of task priority levels. Valid priorities are
    /// `0..max_priorities`.
    pub max_priorities: usize,
    /// The stack size (in words) given to tasks that don't specify one.
    pub default_stack_size: usize,
    /// The number of ticks per second.
    pub tick_rate_hz: u32,
    /// The priority of the timer service task.
    pub timer_task_priority: Priority,
    /// The capacity of the timer service's command channel.
    pub timer_queue_len: usize,
    /// The stack size (in words) of the timer service task.
    pub timer_task_stack_size: usize,
}

impl PortConfig {
    pub const DEFAULT: Self = Self {
        max_priorities: 8,
        default_stack_size: 1000,
        tick_rate_hz: 1000,
        timer_task_priority: 7,
        timer_queue_len: 10,
        timer_task_stack_size: 2000,
    };

    /// Convert milliseconds to ticks, rounding down.
    pub const fn ms_to_ticks(&self, ms: u64) -> Ticks {
        ms.saturating_mul(self.tick_rate_hz as u64) / 1000
    }

    /// Convert ticks to milliseconds, rounding down.
    pub const fn ticks_to_ms(&self, ticks: Ticks) -> u64 {
        if self.tick_rate_hz == 0 {
            return 0;
        }
        ticks.saturating_mul(1000) / self.tick_rate_hz as u64
    }

    /// Check that `priority` names an existing priority level.
    #[inline]
    pub fn is_valid_priority(&self, priority: Priority) -> bool {
        priority < self.max_priorities
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// The properties of a task to be spawned by [`Port::spawn_task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskAttr {
    pub name: &'static str,
    pub priority: Priority,
    /// The stack size in words.
    pub stack_size: usize,
}

/// The entry point of a spawned task.
pub type TaskEntry = Box<dyn FnOnce() + Send + 'static>;

/// Implemented by a scheduler to host the objects of this crate.
///
/// A port is a cheap handle (typically an `Arc`) that every object keeps a
/// clone of. All methods may be called from any context unless stated
/// otherwise.
pub trait Port: Clone + Send + Sync + 'static {
    fn config(&self) -> &PortConfig;

    /// Get the kind of the current context.
    fn context(&self) -> Context;

    /// Get the priority of the task that is running or, in an interrupt
    /// context, the task that was interrupted. `None` if there's no such
    /// task.
    fn running_priority(&self) -> Option<Priority>;

    /// Get the priority of the specified task.
    fn task_priority(&self, task: TaskId) -> Option<Priority>;

    /// Get the current tick count.
    fn tick_count(&self) -> Ticks;

    /// Create a task that runs `entry`.
    fn spawn_task(&self, attr: TaskAttr, entry: TaskEntry) -> Result<TaskId, SpawnError>;

    /// Suspend the current task until it's resumed by [`Self::resume`] or
    /// the tick count reaches `deadline`.
    ///
    /// Spurious returns are allowed; callers re-check their wait condition.
    /// A `resume` that happens before the matching `suspend` must not be
    /// lost.
    fn suspend(&self, deadline: Option<Ticks>);

    /// Make a suspended task runnable.
    fn resume(&self, task: TaskId);

    /// Ask the scheduler to switch to a higher-priority task at the first
    /// opportunity.
    fn request_reschedule(&self);
}
