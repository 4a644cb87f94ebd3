//! Host wait primitive used to block on receive readiness.

use std::time::Duration;

use crate::error::TunResult;

/// Why a wait on a read event returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// The awaited event is signalled.
    Ready,
    /// The cancel event is signalled. Checked before `Ready`, so a terminal
    /// signal is never mistaken for packet availability.
    Cancelled,
    /// The caller's interrupt event is signalled. Checked after `Cancelled`
    /// and before `Ready`.
    Interrupted,
    /// The timeout elapsed with neither event signalled.
    TimedOut,
}

/// A manual-reset, cross-thread signal object.
///
/// On Windows this wraps an event `HANDLE` and waits with
/// `WaitForMultipleObjects`. The portable [`Signal`](crate::Signal) is the
/// in-process counterpart.
pub trait Event: Send + Sync + Sized {
    /// Create an unsignalled manual-reset event owned by the caller.
    fn new_manual_reset() -> TunResult<Self>;

    /// Signal the event, waking every waiter.
    fn set(&self) -> TunResult<()>;

    /// Return the event to the unsignalled state.
    fn reset(&self) -> TunResult<()>;

    /// Non-blocking poll.
    fn is_set(&self) -> bool;

    /// Block until `self` or `cancel` is signalled, or `timeout` elapses.
    /// `None` waits forever.
    fn wait_either(&self, cancel: &Self, timeout: Option<Duration>) -> TunResult<Wakeup>;

    /// Like [`wait_either`](Self::wait_either), with a third, caller-owned
    /// `interrupt` event that yields [`Wakeup::Interrupted`].
    fn wait_interruptible(
        &self,
        cancel: &Self,
        interrupt: &Self,
        timeout: Option<Duration>,
    ) -> TunResult<Wakeup>;
}
