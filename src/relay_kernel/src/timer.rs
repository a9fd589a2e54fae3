//! Software timers
//!
//! Timers are owned by a [`TimerService`], which runs a dedicated task. The
//! application manipulates timers by sending commands to that task through
//! a bounded [`Channel`]; the task keeps the active timers in a list ordered
//! by expiration time and invokes their callbacks when they expire.
//!
//! A command carries the tick count at which it was issued, so a timer
//! started before the service task gets to run still expires one period
//! after the `start` call.
use alloc::{boxed::Box, sync::Arc};
use core::{convert::Infallible, fmt, sync::atomic::AtomicU64};

use crate::{
    channel::Channel,
    dispatcher::{DeferredCall, DeferredFn},
    error::{
        BadContextError, BadIdError, BadParamError, CreateError, PendError, ReceiveError,
        SendError, SpawnError, TimerCommandError,
    },
    interrupt::Isr,
    klock::CpuLockCell,
    port::{Context, Port, TaskAttr, TaskId},
    time::{Ticks, Timeout},
};

mod table;

use self::table::{TimerCallback, TimerCb, TimerTable};

/// The name of the timer service task.
pub const SERVICE_TASK_NAME: &str = "Tmr Svc";

/// Refers to a timer of a [`TimerService`].
///
/// A handle outlives its timer; using it after the timer is deleted yields
/// `BadId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timer {
    key: usize,
    generation: u32,
}

/// Passed to a timer callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFire {
    /// The timer that expired.
    pub timer: Timer,
    /// The timer's user tag at the time it expired.
    pub user_tag: usize,
    /// The tick count at which the service processed the expiration.
    pub now: Ticks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerOp {
    Start,
    Stop,
    Reset,
    ChangePeriod(Ticks),
    Delete,
}

#[derive(Debug)]
enum Command {
    Timer {
        timer: Timer,
        op: TimerOp,
        issued_at: Ticks,
    },
    Call(DeferredCall),
}

/// The timer service: owns every timer and the task that runs their
/// callbacks.
///
/// Callbacks run in the service task, one at a time, and must not block.
/// When a callback issues timer commands, they never wait for space in the
/// command channel.
pub struct TimerService<P: Port> {
    port: P,
    commands: Channel<Command, P>,
    table: CpuLockCell<TimerTable>,
    /// The service task. Known after [`Self::spawn`] or the first
    /// [`Self::run_once`].
    task: spin::Once<TaskId>,
    next_call_seq: AtomicU64,
}

impl<P: Port> TimerService<P> {
    /// Create a timer service configured by [`PortConfig`]'s
    /// `timer_*` fields.
    ///
    /// [`PortConfig`]: crate::PortConfig
    pub fn new(port: &P) -> Result<Self, CreateError> {
        let config = port.config();
        if !config.is_valid_priority(config.timer_task_priority) {
            return Err(BadParamError::BadParam.into());
        }

        Ok(Self {
            port: port.clone(),
            commands: Channel::build()
                .capacity(config.timer_queue_len)
                .finish(port)?,
            table: CpuLockCell::new(TimerTable::new()),
            task: spin::Once::new(),
            next_call_seq: AtomicU64::new(0),
        })
    }

    /// Create the service task.
    pub fn spawn(self: &Arc<Self>) -> Result<TaskId, SpawnError> {
        let config = self.port.config();
        let attr = TaskAttr {
            name: SERVICE_TASK_NAME,
            priority: config.timer_task_priority,
            stack_size: config.timer_task_stack_size,
        };

        let this = Arc::clone(self);
        let task = self.port.spawn_task(
            attr,
            Box::new(move || {
                log::debug!("timer service started");
                let Err(e) = this.run();
                log::warn!("timer service exiting: {:?}", e);
            }),
        )?;
        self.task.call_once(|| task);
        log::debug!("spawned the timer service as {:?}", task);
        Ok(task)
    }

    /// Run the service loop in the current task.
    pub fn run(&self) -> Result<Infallible, BadContextError> {
        loop {
            self.run_once()?;
        }
    }

    /// Perform one iteration of the service loop: wait for a command or the
    /// next expiration, apply every queued command, then fire every expired
    /// timer.
    ///
    /// Only a task can run the service; elsewhere this fails with
    /// `BadContext` instead of returning without waiting.
    pub fn run_once(&self) -> Result<(), BadContextError> {
        let Context::Task(task) = self.port.context() else {
            return Err(BadContextError::BadContext);
        };
        self.task.call_once(|| task);

        let timeout = match self.table.lock().next_expiry() {
            None => Timeout::Forever,
            Some(expiry) => match expiry.checked_sub(self.port.tick_count()) {
                Some(0) | None => Timeout::NoWait,
                Some(ticks) => Timeout::After(ticks),
            },
        };

        match self.commands.receive(timeout) {
            Ok(command) => {
                self.apply(command);

                // Commands sent by the callbacks invoked here wait for the
                // next iteration
                let backlog = self.commands.len();
                for _ in 0..backlog {
                    match self.commands.try_receive() {
                        Ok(command) => self.apply(command),
                        Err(_) => break,
                    }
                }
            }
            Err(ReceiveError::Timeout) => {}
            Err(ReceiveError::BadContext) => return Err(BadContextError::BadContext),
        }

        self.process_expired();
        Ok(())
    }

    fn apply(&self, command: Command) {
        log::trace!("applying {:?}", command);
        let (timer, op, issued_at) = match command {
            Command::Call(call) => {
                call.dequeued(&self.next_call_seq).invoke();
                return;
            }
            Command::Timer {
                timer,
                op,
                issued_at,
            } => (timer, op, issued_at),
        };

        let mut table = self.table.lock();
        let Some(cb) = table.get_any_mut(timer) else {
            log::trace!("{:?} no longer exists", timer);
            return;
        };
        if cb.deleted && op != TimerOp::Delete {
            return;
        }

        match op {
            TimerOp::Start | TimerOp::Reset => {
                let expiry = issued_at.saturating_add(cb.period);
                table.link(timer.key, expiry);
            }
            TimerOp::Stop => table.unlink(timer.key),
            TimerOp::ChangePeriod(period) => {
                cb.period = period;
                table.link(timer.key, issued_at.saturating_add(period));
            }
            TimerOp::Delete => table.remove(timer.key),
        }
    }

    fn process_expired(&self) {
        let now = self.port.tick_count();
        loop {
            let mut table = self.table.lock();
            let Some(key) = table.pop_expired(now) else { break };
            let Some(cb) = table.by_key_mut(key) else { continue };
            if cb.deleted {
                continue;
            }

            let fire = TimerFire {
                timer: Timer {
                    key,
                    generation: cb.generation,
                },
                user_tag: cb.user_tag,
                now,
            };
            let callback = cb.callback.take();
            if cb.auto_reload {
                // Measured from the processing time, so fires are never
                // closer than one period
                let expiry = now.saturating_add(cb.period);
                table.link(key, expiry);
            }
            drop(table);

            let Some(mut callback) = callback else { continue };
            log::trace!("{:?} expired", fire.timer);
            callback(fire);

            if let Some(cb) = self.table.lock().get_any_mut(fire.timer) {
                cb.callback = Some(callback);
            }
        }
    }

    /// Check if the caller is the service task (e.g., a timer callback).
    fn in_service_task(&self) -> bool {
        matches!(
            (self.port.context(), self.task.get()),
            (Context::Task(current), Some(&service)) if current == service
        )
    }

    fn send(&self, command: Command, timeout: Timeout) -> Result<(), TimerCommandError> {
        // The service can't wait for itself to drain the queue
        let timeout = if self.in_service_task() {
            Timeout::NoWait
        } else {
            timeout
        };

        match self.commands.send(command, timeout) {
            Ok(()) => Ok(()),
            Err(SendError::Full(_)) => {
                log::debug!("timer command queue full");
                Err(TimerCommandError::QueueFull)
            }
            Err(SendError::BadContext(_)) => Err(TimerCommandError::BadContext),
        }
    }

    fn command(&self, timer: Timer, op: TimerOp, timeout: Timeout) -> Result<(), TimerCommandError> {
        self.table.lock().get(timer)?;
        let issued_at = self.port.tick_count();
        self.send(
            Command::Timer {
                timer,
                op,
                issued_at,
            },
            timeout,
        )
    }

    fn command_from_isr(
        &self,
        isr: &mut Isr<P>,
        timer: Timer,
        op: TimerOp,
    ) -> Result<bool, TimerCommandError> {
        self.table.lock().get(timer)?;
        let issued_at = self.port.tick_count();
        let command = Command::Timer {
            timer,
            op,
            issued_at,
        };
        self.commands
            .send_from_isr(isr, command)
            .map_err(|_| TimerCommandError::QueueFull)
    }

    /// Start a timer. It expires one period after this call. Starting an
    /// active timer restarts it.
    ///
    /// `timeout` bounds the wait for space in the command channel.
    pub fn start(&self, timer: Timer, timeout: Timeout) -> Result<(), TimerCommandError> {
        log::trace!("TimerService::start({:?})", timer);
        self.command(timer, TimerOp::Start, timeout)
    }

    /// Stop a timer. A dormant timer stays dormant.
    pub fn stop(&self, timer: Timer, timeout: Timeout) -> Result<(), TimerCommandError> {
        log::trace!("TimerService::stop({:?})", timer);
        self.command(timer, TimerOp::Stop, timeout)
    }

    /// Restart a timer's period from now, starting it if it's dormant.
    pub fn reset(&self, timer: Timer, timeout: Timeout) -> Result<(), TimerCommandError> {
        log::trace!("TimerService::reset({:?})", timer);
        self.command(timer, TimerOp::Reset, timeout)
    }

    /// Change a timer's period and (re)start it with the new period.
    pub fn change_period(
        &self,
        timer: Timer,
        period: Ticks,
        timeout: Timeout,
    ) -> Result<(), TimerCommandError> {
        log::trace!("TimerService::change_period({:?}, {})", timer, period);
        if period == 0 {
            return Err(TimerCommandError::BadParam);
        }
        self.command(timer, TimerOp::ChangePeriod(period), timeout)
    }

    /// Delete a timer. Once this returns `Ok`, the callback won't be invoked
    /// again and the handle is invalid.
    pub fn delete(&self, timer: Timer, timeout: Timeout) -> Result<(), TimerCommandError> {
        log::trace!("TimerService::delete({:?})", timer);
        self.command(timer, TimerOp::Delete, timeout)?;

        // The service might have freed it already
        if let Some(cb) = self.table.lock().get_any_mut(timer) {
            cb.deleted = true;
        }
        Ok(())
    }

    pub fn start_from_isr(&self, isr: &mut Isr<P>, timer: Timer) -> Result<bool, TimerCommandError> {
        self.command_from_isr(isr, timer, TimerOp::Start)
    }

    pub fn stop_from_isr(&self, isr: &mut Isr<P>, timer: Timer) -> Result<bool, TimerCommandError> {
        self.command_from_isr(isr, timer, TimerOp::Stop)
    }

    pub fn reset_from_isr(&self, isr: &mut Isr<P>, timer: Timer) -> Result<bool, TimerCommandError> {
        self.command_from_isr(isr, timer, TimerOp::Reset)
    }

    pub fn change_period_from_isr(
        &self,
        isr: &mut Isr<P>,
        timer: Timer,
        period: Ticks,
    ) -> Result<bool, TimerCommandError> {
        if period == 0 {
            return Err(TimerCommandError::BadParam);
        }
        self.command_from_isr(isr, timer, TimerOp::ChangePeriod(period))
    }

    /// Have the service task call `function(arg1, arg2)`.
    pub fn pend_call(
        &self,
        function: DeferredFn,
        arg1: usize,
        arg2: u32,
        timeout: Timeout,
    ) -> Result<(), PendError> {
        let call = DeferredCall::new(function, arg1, arg2);
        match self.send(Command::Call(call), timeout) {
            Ok(()) => Ok(()),
            Err(TimerCommandError::BadContext) => Err(PendError::BadContext),
            Err(_) => Err(PendError::Full),
        }
    }

    /// Have the service task call `function(arg1, arg2)`. Fails with `Full`
    /// if the command channel is full.
    pub fn pend_call_from_isr(
        &self,
        isr: &mut Isr<P>,
        function: DeferredFn,
        arg1: usize,
        arg2: u32,
    ) -> Result<bool, PendError> {
        let call = DeferredCall::new(function, arg1, arg2);
        self.commands
            .send_from_isr(isr, Command::Call(call))
            .map_err(|_| {
                log::warn!("deferred call dropped: queue full");
                PendError::Full
            })
    }

    /// Check if a timer is in the Active state, as of the last command the
    /// service processed.
    pub fn is_active(&self, timer: Timer) -> Result<bool, BadIdError> {
        Ok(self.table.lock().get(timer)?.expiry.is_some())
    }

    pub fn period(&self, timer: Timer) -> Result<Ticks, BadIdError> {
        Ok(self.table.lock().get(timer)?.period)
    }

    /// Get the tick count at which an active timer will expire.
    pub fn expiry_time(&self, timer: Timer) -> Result<Option<Ticks>, BadIdError> {
        Ok(self.table.lock().get(timer)?.expiry)
    }

    pub fn name(&self, timer: Timer) -> Result<&'static str, BadIdError> {
        Ok(self.table.lock().get(timer)?.name)
    }

    pub fn user_tag(&self, timer: Timer) -> Result<usize, BadIdError> {
        Ok(self.table.lock().get(timer)?.user_tag)
    }

    pub fn set_user_tag(&self, timer: Timer, user_tag: usize) -> Result<(), BadIdError> {
        self.table.lock().get_mut(timer)?.user_tag = user_tag;
        Ok(())
    }

    /// Switch a timer between auto-reload and one-shot. Takes effect at the
    /// next expiration.
    pub fn set_reload_mode(&self, timer: Timer, auto_reload: bool) -> Result<(), BadIdError> {
        self.table.lock().get_mut(timer)?.auto_reload = auto_reload;
        Ok(())
    }

    pub fn is_auto_reload(&self, timer: Timer) -> Result<bool, BadIdError> {
        Ok(self.table.lock().get(timer)?.auto_reload)
    }

    /// Get the number of commands waiting for the service task.
    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    fn create(&self, builder: TimerBuilder) -> Result<Timer, CreateError> {
        let (period, callback) = match builder {
            TimerBuilder {
                period: Some(period),
                callback: Some(callback),
                ..
            } if period > 0 => (period, callback),
            _ => return Err(BadParamError::BadParam.into()),
        };

        let timer = self.table.lock().insert(|generation| {
            TimerCb::new(
                generation,
                builder.name,
                period,
                builder.auto_reload,
                builder.user_tag,
                callback,
            )
        });
        log::trace!("created timer {:?} ({})", timer, builder.name);
        Ok(timer)
    }
}

impl<P: Port> fmt::Debug for TimerService<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TimerService")
            .field("task", &self.task.get())
            .field("commands", &self.commands)
            .field("table", &self.table)
            .finish()
    }
}

/// The builder for timers.
#[must_use = "call `finish` to create the timer"]
pub struct TimerBuilder {
    name: &'static str,
    period: Option<Ticks>,
    auto_reload: bool,
    user_tag: usize,
    callback: Option<TimerCallback>,
}

impl fmt::Debug for TimerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TimerBuilder")
            .field("name", &self.name)
            .field("period", &self.period)
            .field("auto_reload", &self.auto_reload)
            .field("user_tag", &self.user_tag)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

impl Timer {
    /// Construct a `TimerBuilder`. The period and the callback must be
    /// specified.
    pub fn build() -> TimerBuilder {
        TimerBuilder {
            name: "",
            period: None,
            auto_reload: false,
            user_tag: 0,
            callback: None,
        }
    }
}

impl TimerBuilder {
    pub fn name(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    /// Specify the period in ticks. Must be non-zero.
    pub fn period(self, period: Ticks) -> Self {
        Self {
            period: Some(period),
            ..self
        }
    }

    /// Specify whether the timer restarts itself after expiring.
    pub fn auto_reload(self, auto_reload: bool) -> Self {
        Self {
            auto_reload,
            ..self
        }
    }

    /// Specify an application-defined value readable from the callback.
    pub fn user_tag(self, user_tag: usize) -> Self {
        Self { user_tag, ..self }
    }

    pub fn callback(self, callback: impl FnMut(TimerFire) + Send + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
            ..self
        }
    }

    /// Create a dormant timer in `service`.
    pub fn finish<P: Port>(self, service: &TimerService<P>) -> Result<Timer, CreateError> {
        service.create(self)
    }
}
