//! Dedicated reader thread.
//!
//! The pump blocks on the session's read event, drains the receive ring
//! with non-blocking receives until it is empty, and waits again. It stops
//! when the session shuts down or the driver reports end of file.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tunring_core::{Driver, TunError, TunResult};

use crate::session::Session;

/// Handle to a running reader thread.
///
/// Dropping it shuts the session down and joins the thread.
pub struct ReadPump<D: Driver> {
    session: Arc<Session<D>>,
    thread: Option<JoinHandle<u64>>,
}

impl<D: Driver> ReadPump<D> {
    /// Start a thread feeding every inbound packet to `handler`.
    pub fn spawn<F>(session: Arc<Session<D>>, mut handler: F) -> TunResult<Self>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let pumped = session.clone();
        let thread = thread::Builder::new()
            .name(format!("tunring-reader-{}", session.adapter_name()))
            .spawn(move || pump(&pumped, &mut handler))?;
        Ok(Self {
            session,
            thread: Some(thread),
        })
    }

    pub fn session(&self) -> &Arc<Session<D>> {
        &self.session
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Shut the session down and wait for the thread. Returns the number
    /// of packets delivered to the handler.
    pub fn stop(mut self) -> TunResult<u64> {
        self.session.shutdown();
        self.join_thread()
    }

    /// Wait for the thread to exit on its own, e.g. after the driver ended
    /// the session.
    pub fn join(mut self) -> TunResult<u64> {
        self.join_thread()
    }

    fn join_thread(&mut self) -> TunResult<u64> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| TunError::ContractViolation("packet handler panicked")),
            None => Ok(0),
        }
    }
}

impl<D: Driver> Drop for ReadPump<D> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.session.shutdown();
            let _ = self.join_thread();
        }
    }
}

fn pump<D: Driver>(session: &Session<D>, handler: &mut impl FnMut(&[u8])) -> u64 {
    let mut delivered = 0;
    'outer: loop {
        if let Err(e) = session.wait_readable(None) {
            log_exit(&e);
            break;
        }
        loop {
            match session.try_receive() {
                Ok(packet) => {
                    handler(&packet);
                    delivered += 1;
                }
                Err(TunError::WouldBlock) => break,
                Err(e) => {
                    log_exit(&e);
                    break 'outer;
                }
            }
        }
    }
    tracing::debug!(adapter = %session.adapter_name(), delivered, "reader stopped");
    delivered
}

fn log_exit(e: &TunError) {
    if !e.is_terminal() {
        tracing::warn!(error = %e, "reader failed");
    }
}
