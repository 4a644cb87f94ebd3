//! Portable manual-reset event for in-process wakeups.
//!
//! A `Signal` plays the role of a Win32 event object for drivers that live
//! in the same process. Any number of threads can wait on it, and a single
//! wait can cover several signals at once (readiness, cancellation and an
//! optional interrupt), the same way `WaitForMultipleObjects` is used against
//! the real driver.
//!
//! # Usage
//!
//! ```
//! use tunring_core::{Signal, Wakeup};
//! use std::time::Duration;
//!
//! let ready = Signal::new();
//! let cancel = Signal::new();
//!
//! ready.set();
//! assert_eq!(ready.wait_either(&cancel, Some(Duration::ZERO)), Wakeup::Ready);
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::TunResult;
use crate::event::{Event, Wakeup};

/// A cloneable handle to a shared manual-reset event.
#[derive(Clone, Default)]
pub struct Signal {
    inner: Arc<Mutex<SignalState>>,
}

#[derive(Default)]
struct SignalState {
    set: bool,
    /// Waiters currently parked on this signal.
    waiters: Vec<Arc<Waiter>>,
}

#[derive(Default)]
struct Waiter {
    woken: Mutex<bool>,
    cv: Condvar,
}

impl Waiter {
    fn wake(&self) {
        *self.woken.lock() = true;
        self.cv.notify_all();
    }
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the event. Stays signalled until [`reset`](Self::reset).
    pub fn set(&self) {
        let mut state = self.inner.lock();
        state.set = true;
        for waiter in &state.waiters {
            waiter.wake();
        }
    }

    pub fn reset(&self) {
        self.inner.lock().set = false;
    }

    pub fn is_set(&self) -> bool {
        self.inner.lock().set
    }

    /// Block until signalled or `timeout` elapses. Returns whether the
    /// signal was observed.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        // A private, never-set cancel signal reduces this to a single wait.
        let never = Signal::new();
        self.wait_either(&never, timeout) == Wakeup::Ready
    }

    /// Block until `self` or `cancel` is signalled, or `timeout` elapses.
    pub fn wait_either(&self, cancel: &Signal, timeout: Option<Duration>) -> Wakeup {
        self.wait_inner(cancel, None, timeout)
    }

    /// Block until `self`, `cancel` or `interrupt` is signalled, or `timeout`
    /// elapses.
    pub fn wait_interruptible(
        &self,
        cancel: &Signal,
        interrupt: &Signal,
        timeout: Option<Duration>,
    ) -> Wakeup {
        self.wait_inner(cancel, Some(interrupt), timeout)
    }

    fn wait_inner(
        &self,
        cancel: &Signal,
        interrupt: Option<&Signal>,
        timeout: Option<Duration>,
    ) -> Wakeup {
        let deadline = timeout.map(|t| Instant::now() + t);
        let waiter = Arc::new(Waiter::default());

        loop {
            if let Some(wakeup) = self.park(cancel, interrupt, &waiter, deadline) {
                return wakeup;
            }
        }
    }

    /// Highest-priority signalled outcome, if any.
    fn poll(&self, cancel: &Signal, interrupt: Option<&Signal>) -> Option<Wakeup> {
        if cancel.is_set() {
            Some(Wakeup::Cancelled)
        } else if interrupt.is_some_and(Signal::is_set) {
            Some(Wakeup::Interrupted)
        } else if self.is_set() {
            Some(Wakeup::Ready)
        } else {
            None
        }
    }

    /// One attach, check, sleep round. `None` means the waiter was woken and
    /// the caller should look again.
    fn park(
        &self,
        cancel: &Signal,
        interrupt: Option<&Signal>,
        waiter: &Arc<Waiter>,
        deadline: Option<Instant>,
    ) -> Option<Wakeup> {
        let watched = [Some(self), Some(cancel), interrupt];

        *waiter.woken.lock() = false;
        for signal in watched.iter().flatten() {
            signal.attach(waiter);
        }

        // Polled only once attached: a set() before this point is seen here,
        // one after it flags the waiter.
        let outcome = self.poll(cancel, interrupt).or_else(|| {
            let timed_out = sleep(waiter, deadline);
            timed_out.then(|| self.poll(cancel, interrupt).unwrap_or(Wakeup::TimedOut))
        });

        for signal in watched.iter().flatten() {
            signal.detach(waiter);
        }
        outcome
    }

    /// Number of threads parked on this signal.
    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    fn attach(&self, waiter: &Arc<Waiter>) {
        self.inner.lock().waiters.push(waiter.clone());
    }

    fn detach(&self, waiter: &Arc<Waiter>) {
        self.inner
            .lock()
            .waiters
            .retain(|w| !Arc::ptr_eq(w, waiter));
    }
}

/// Sleep until the waiter is flagged. Returns true if `deadline` passed first.
fn sleep(waiter: &Waiter, deadline: Option<Instant>) -> bool {
    let mut woken = waiter.woken.lock();
    loop {
        if *woken {
            return false;
        }
        match deadline {
            Some(deadline) => {
                if waiter.cv.wait_until(&mut woken, deadline).timed_out() {
                    return !*woken;
                }
            }
            None => waiter.cv.wait(&mut woken),
        }
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Signal")
            .field("set", &state.set)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

impl Event for Signal {
    fn new_manual_reset() -> TunResult<Self> {
        Ok(Signal::new())
    }

    fn set(&self) -> TunResult<()> {
        Signal::set(self);
        Ok(())
    }

    fn reset(&self) -> TunResult<()> {
        Signal::reset(self);
        Ok(())
    }

    fn is_set(&self) -> bool {
        Signal::is_set(self)
    }

    fn wait_either(&self, cancel: &Self, timeout: Option<Duration>) -> TunResult<Wakeup> {
        Ok(Signal::wait_either(self, cancel, timeout))
    }

    fn wait_interruptible(
        &self,
        cancel: &Self,
        interrupt: &Self,
        timeout: Option<Duration>,
    ) -> TunResult<Wakeup> {
        Ok(Signal::wait_interruptible(self, cancel, interrupt, timeout))
    }
}
