//! Time and timeouts
use crate::port::PortConfig;

/// A tick count. The tick counter is 64 bits wide and treated as never
/// wrapping around.
pub type Ticks = u64;

/// Specifies how long a blocking operation may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Fail immediately if the operation can't complete.
    NoWait,
    /// Wait for at most the specified number of ticks.
    After(Ticks),
    /// Wait indefinitely.
    Forever,
}

impl Timeout {
    /// Construct a timeout from a duration in milliseconds using the tick
    /// rate of `config`.
    pub const fn from_millis(ms: u64, config: &PortConfig) -> Self {
        Self::After(config.ms_to_ticks(ms))
    }

    /// Get the absolute deadline for a wait starting at `now`. `None` means
    /// no deadline.
    ///
    /// `NoWait` yields a deadline of `now`.
    pub(crate) fn deadline(self, now: Ticks) -> Option<Ticks> {
        match self {
            Self::NoWait => Some(now),
            Self::After(ticks) => Some(now.saturating_add(ticks)),
            Self::Forever => None,
        }
    }
}
