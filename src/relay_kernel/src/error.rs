//! Error types
//!
//! Every fallible operation has its own error enum that lists exactly the
//! outcomes it can produce. Narrow errors (e.g., [`BadContextError`]) convert
//! into the wider ones through `From`, so internal helpers can use `?`.
use core::fmt;

/// Define an error enum along with its `Debug`, `Display`, and `From`
/// implementations.
///
/// Each `#[into(Wider)]` attribute generates `impl From<Name> for Wider`,
/// which maps each variant to the identically-named variant of `Wider`.
macro_rules! define_error {
    (
        $( #[doc $( $doc:tt )*] )*
        $( #[into( $Supererror:path )] )*
        $vis:vis enum $Name:ident {
            $(
                $( #[doc $( $vdoc:tt )*] )*
                $Variant:ident,
            )*
        }
    ) => {
        $( #[doc $( $doc )*] )*
        #[derive(PartialEq, Eq, Copy, Clone, Hash)]
        $vis enum $Name {
            $(
                $( #[doc $( $vdoc )*] )*
                $Variant,
            )*
        }

        impl $Name {
            /// Get the short name of the error.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$Variant => stringify!($Variant), )*
                }
            }
        }

        impl fmt::Debug for $Name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Display for $Name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        define_error! {
            @into
            $( #[into( $Supererror )] )*
            enum $Name {
                $( $Variant, )*
            }
        }
    };

    (
        @into
        #[into( $Supererror0:path )]
        $( #[into( $Supererror:path )] )*
        enum $Name:ident {
            $( $Variant:ident, )*
        }
    ) => {
        impl From<$Name> for $Supererror0 {
            #[inline]
            fn from(x: $Name) -> Self {
                match x {
                    $( $Name::$Variant => Self::$Variant ),*
                }
            }
        }

        define_error! {
            @into
            $( #[into( $Supererror )] )*
            enum $Name {
                $( $Variant, )*
            }
        }
    };

    ( @into enum $($_:tt)* ) => {};
}

define_error! {
    /// `BadContext`
    #[into(TakeError)]
    #[into(ReceiveError)]
    #[into(PendError)]
    #[into(TimerCommandError)]
    #[into(SpawnError)]
    pub enum BadContextError {
        /// The operation would have to block, or is task-only, but the
        /// caller isn't a task.
        BadContext,
    }
}

define_error! {
    /// `BadParam`
    #[into(CreateError)]
    #[into(TimerCommandError)]
    #[into(SpawnError)]
    pub enum BadParamError {
        /// A parameter is out of its valid range.
        BadParam,
    }
}

define_error! {
    /// `CapacityExceeded`
    #[into(CreateError)]
    #[into(SpawnError)]
    pub enum CapacityExceededError {
        /// The storage for the object could not be allocated.
        CapacityExceeded,
    }
}

define_error! {
    /// `BadId`
    #[into(TimerCommandError)]
    pub enum BadIdError {
        /// The timer handle refers to a deleted timer.
        BadId,
    }
}

define_error! {
    /// Error type for object creation.
    pub enum CreateError {
        BadParam,
        CapacityExceeded,
    }
}

define_error! {
    /// Error type for [`Port::spawn_task`](crate::Port::spawn_task).
    pub enum SpawnError {
        BadParam,
        BadContext,
        CapacityExceeded,
    }
}

define_error! {
    /// Error type for [`EventLatch::give`](crate::EventLatch::give) and
    /// [`EventLatch::give_from_isr`](crate::EventLatch::give_from_isr).
    ///
    /// Both variants mean an event was lost.
    pub enum GiveError {
        /// The count was at its maximum; the event was dropped.
        Overflow,
        /// The count was at its maximum and restarted from zero.
        Wrapped,
    }
}

define_error! {
    /// Error type for [`EventLatch::take`](crate::EventLatch::take).
    pub enum TakeError {
        /// No permit became available before the timeout elapsed, or the
        /// wait was aborted.
        Timeout,
        BadContext,
    }
}

define_error! {
    /// Error type for non-blocking takes.
    pub enum TryTakeError {
        /// The count is zero.
        WouldBlock,
    }
}

define_error! {
    /// Error type for [`Channel::receive`](crate::Channel::receive).
    pub enum ReceiveError {
        /// No item arrived before the timeout elapsed, or the wait was
        /// aborted.
        Timeout,
        BadContext,
    }
}

define_error! {
    /// Error type for non-blocking receives and peeks.
    pub enum TryReceiveError {
        Empty,
    }
}

define_error! {
    /// Error type for deferring a function call.
    pub enum PendError {
        /// The call queue stayed full; the call was not queued.
        Full,
        BadContext,
    }
}

define_error! {
    /// Error type for timer commands.
    pub enum TimerCommandError {
        /// The timer command queue stayed full; the command was not issued.
        QueueFull,
        BadId,
        BadParam,
        BadContext,
    }
}

/// Error type for [`Channel::send`](crate::Channel::send). The rejected item
/// is handed back.
#[derive(PartialEq, Eq, Clone, Copy)]
pub enum SendError<T> {
    /// The channel stayed full until the timeout elapsed, or the wait was
    /// aborted.
    Full(T),
    /// The channel is full and the caller can't block.
    BadContext(T),
}

impl<T> SendError<T> {
    /// Get the item that couldn't be sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(x) | Self::BadContext(x) => x,
        }
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::BadContext(_) => f.write_str("BadContext(..)"),
        }
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full"),
            Self::BadContext(_) => f.write_str("BadContext"),
        }
    }
}

/// Error type for non-blocking sends. The rejected item is handed back.
#[derive(PartialEq, Eq, Clone, Copy)]
pub enum TrySendError<T> {
    Full(T),
}

impl<T> TrySendError<T> {
    /// Get the item that couldn't be sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(x) => x,
        }
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Full(..)")
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Full")
    }
}

impl<T> From<TrySendError<T>> for SendError<T> {
    fn from(x: TrySendError<T>) -> Self {
        match x {
            TrySendError::Full(x) => Self::Full(x),
        }
    }
}

impl From<TryTakeError> for TakeError {
    fn from(x: TryTakeError) -> Self {
        match x {
            TryTakeError::WouldBlock => Self::Timeout,
        }
    }
}

impl From<TryReceiveError> for ReceiveError {
    fn from(x: TryReceiveError) -> Self {
        match x {
            TryReceiveError::Empty => Self::Timeout,
        }
    }
}
