//! Interrupt context
use crate::{
    error::BadContextError,
    port::{Context, Port},
    state::{self, Wakeup},
};

/// A capability token proving that the holder is an interrupt handler.
///
/// Every `*_from_isr` operation takes one. The token accumulates whether any
/// operation woke a task that outranks the interrupted one, and
/// [`Self::yield_from_isr`] turns that into a reschedule request when the
/// handler is about to return.
///
/// ```rust,ignore
/// let mut isr = Isr::enter(&port)?;
/// latch.give_from_isr(&mut isr)?;
/// isr.yield_from_isr();
/// ```
#[derive(Debug)]
pub struct Isr<P: Port> {
    port: P,
    higher_priority_task_woken: bool,
}

impl<P: Port> Isr<P> {
    /// Obtain a token. Fails with `BadContext` unless the caller is running
    /// in an interrupt context.
    pub fn enter(port: &P) -> Result<Self, BadContextError> {
        if port.context() != Context::Interrupt {
            return Err(BadContextError::BadContext);
        }
        Ok(Self {
            port: port.clone(),
            higher_priority_task_woken: false,
        })
    }

    #[inline]
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get whether an operation performed with this token woke a task that
    /// outranks the interrupted one.
    #[inline]
    pub fn higher_priority_task_woken(&self) -> bool {
        self.higher_priority_task_woken
    }

    /// Leave the critical section `lock` and resume the woken tasks.
    /// Returns whether any of them outranks the interrupted task.
    pub(crate) fn release<G>(&mut self, lock: G, woken: impl IntoIterator<Item = Wakeup>) -> bool {
        let preempt = state::release(&self.port, lock, woken);
        self.higher_priority_task_woken |= preempt;
        preempt
    }

    /// Finish the interrupt handler, requesting a reschedule if a
    /// higher-priority task was woken. Returns the accumulated flag.
    pub fn yield_from_isr(self) -> bool {
        if self.higher_priority_task_woken {
            log::trace!("yield_from_isr: requesting a reschedule");
            self.port.request_reschedule();
        }
        self.higher_priority_task_woken
    }
}
