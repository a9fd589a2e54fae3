//! Context checks and wake-up bookkeeping shared by all kernel objects
use crate::{
    error::BadContextError,
    port::{Context, Port, Priority, TaskId},
    time::{Ticks, Timeout},
};

/// The parameters of a wait the current task is allowed to start.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Blocker {
    pub(crate) task: TaskId,
    pub(crate) priority: Priority,
    /// `None` means no deadline.
    pub(crate) deadline: Option<Ticks>,
}

/// Decide whether the caller may block for `timeout` after finding that an
/// operation can't complete immediately.
///
/// Returns `Ok(None)` if the operation should fail without waiting: the
/// timeout is `NoWait`, or the scheduler hasn't started (block times are
/// ignored in [`Context::Boot`]). An interrupt handler asking to wait gets
/// `Err(BadContext)`.
pub(crate) fn blocker<P: Port>(
    port: &P,
    timeout: Timeout,
) -> Result<Option<Blocker>, BadContextError> {
    match (port.context(), timeout) {
        (_, Timeout::NoWait) | (Context::Boot, _) => Ok(None),
        (Context::Interrupt, _) => Err(BadContextError::BadContext),
        (Context::Task(task), timeout) => Ok(Some(Blocker {
            task,
            priority: port.running_priority().unwrap_or(0),
            deadline: timeout.deadline(port.tick_count()),
        })),
    }
}

/// A task released from a wait queue. It must be resumed through the port
/// once the critical section is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Wakeup {
    pub(crate) task: TaskId,
    pub(crate) priority: Priority,
}

/// Check if a task with `priority` should preempt the current context.
pub(crate) fn outranks_running<P: Port>(port: &P, priority: Priority) -> bool {
    match port.running_priority() {
        Some(running) => priority > running,
        // Nothing to preempt before the scheduler starts; an interrupt taken
        // while idle always yields to the woken task
        None => port.context() != Context::Boot,
    }
}

/// Leave the critical section `lock`, resume the woken tasks, and return
/// whether any of them outranks the current context.
pub(crate) fn release<P: Port, G>(
    port: &P,
    lock: G,
    woken: impl IntoIterator<Item = Wakeup>,
) -> bool {
    drop(lock);

    let mut preempt = false;
    for wakeup in woken {
        log::trace!("resuming {:?}", wakeup.task);
        port.resume(wakeup.task);
        preempt |= outranks_running(port, wakeup.priority);
    }
    preempt
}

/// Task-context variant of [`release`]: a reschedule is requested right
/// away if a woken task outranks the caller.
pub(crate) fn unlock_and_check_preemption<P: Port, G>(
    port: &P,
    lock: G,
    woken: impl IntoIterator<Item = Wakeup>,
) {
    if release(port, lock, woken) {
        port.request_reschedule();
    }
}
