#![doc = include_str!("./lib.md")]
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![warn(missing_debug_implementations)]
extern crate alloc;

mod channel;
mod dispatcher;
pub mod error;
mod interrupt;
mod klock;
mod latch;
mod port;
mod state;
mod time;
mod timer;
mod utils;
mod wait;

#[cfg(test)]
mod test_port;

pub use self::{
    channel::{Channel, ChannelBuilder},
    dispatcher::{DeferredCall, DeferredFn, Dispatcher, DispatcherBuilder},
    error::*,
    interrupt::Isr,
    latch::{EventLatch, EventLatchBuilder, OverflowPolicy},
    port::{Context, Port, PortConfig, Priority, TaskAttr, TaskEntry, TaskId},
    time::{Ticks, Timeout},
    timer::{Timer, TimerBuilder, TimerFire, TimerService, SERVICE_TASK_NAME},
};
