//! tokio front end for a session.
//!
//! Packets only ever move on the calling task, so every future here is
//! cancel-safe: dropping one between polls neither takes nor sends a packet.
//! An empty receive ring parks a readiness wait on tokio's blocking pool,
//! and a full send ring backs off on the timer.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tunring_core::{Driver, TunError, TunResult};

use crate::session::Session;

/// Async wrapper around a shared [`Session`]. Dropping it shuts the session
/// down, which also ends any receive still parked on the blocking pool.
pub struct AsyncSession<D: Driver> {
    session: Arc<Session<D>>,
}

impl<D: Driver> AsyncSession<D> {
    pub fn new(session: Session<D>) -> Self {
        Self::from_arc(Arc::new(session))
    }

    pub fn from_arc(session: Arc<Session<D>>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<Session<D>> {
        &self.session
    }

    /// Receive the next packet.
    pub async fn recv(&self) -> TunResult<Vec<u8>> {
        self.recv_inner(None).await
    }

    /// Receive the next packet, failing with `TimedOut` after `timeout`.
    pub async fn recv_timeout(&self, timeout: Duration) -> TunResult<Vec<u8>> {
        self.recv_inner(Some(timeout)).await
    }

    async fn recv_inner(&self, timeout: Option<Duration>) -> TunResult<Vec<u8>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            match self.session.try_receive() {
                Ok(packet) => return Ok(packet.to_vec()),
                Err(TunError::WouldBlock) => {}
                Err(e) => return Err(e),
            }
            let remaining = match deadline {
                Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                    Some(left) if !left.is_zero() => Some(left),
                    _ => return Err(TunError::TimedOut),
                },
                None => None,
            };
            // An abandoned wait only observes readiness. It ends on the next
            // packet or at shutdown.
            let session = self.session.clone();
            let readable = tokio::task::spawn_blocking(move || session.wait_readable(remaining))
                .await
                .map_err(join_error)??;
            if !readable {
                return Err(TunError::TimedOut);
            }
        }
    }

    /// Send a packet, retrying while the ring is full. Gives up with
    /// `TimedOut` after the session's `send_retries`.
    pub async fn send(&self, packet: &[u8]) -> TunResult<()> {
        let config = self.session.config();
        let mut attempt = 0;
        loop {
            match self.session.try_send(packet) {
                Err(TunError::ResourceExhausted { .. }) if attempt < config.send_retries => {
                    attempt += 1;
                    tokio::time::sleep(config.send_backoff).await;
                }
                Err(TunError::ResourceExhausted { .. }) => return Err(TunError::TimedOut),
                result => return result,
            }
        }
    }

    pub fn shutdown(&self) {
        self.session.shutdown();
    }
}

impl<D: Driver> Drop for AsyncSession<D> {
    fn drop(&mut self) {
        self.session.shutdown();
    }
}

fn join_error(e: tokio::task::JoinError) -> TunError {
    TunError::Io(io::Error::other(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AdapterConfig, SessionConfig, SessionManager};
    use tunring_mem::MemDriver;

    fn start(driver: &MemDriver, name: &str) -> (SessionManager<MemDriver>, AsyncSession<MemDriver>) {
        let manager = SessionManager::new(driver.clone());
        let adapter = manager.create_adapter(&AdapterConfig::new(name)).unwrap();
        let session = adapter
            .start_session(&SessionConfig::default().with_ring_capacity(4))
            .unwrap();
        (manager, AsyncSession::new(session))
    }

    #[tokio::test]
    async fn test_recv_ready_packet() {
        let driver = MemDriver::new();
        let (_manager, session) = start(&driver, "a-ready");
        driver.inject("a-ready", b"now");

        assert_eq!(session.recv().await.unwrap(), b"now");
    }

    #[tokio::test]
    async fn test_recv_waits_for_packet() {
        let driver = MemDriver::new();
        let (_manager, session) = start(&driver, "a-wait");

        let peer = driver.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            peer.inject("a-wait", b"later");
        });

        assert_eq!(session.recv().await.unwrap(), b"later");
    }

    #[tokio::test]
    async fn test_recv_timeout() {
        let driver = MemDriver::new();
        let (_manager, session) = start(&driver, "a-tmo");

        assert!(matches!(
            session.recv_timeout(Duration::from_millis(10)).await,
            Err(TunError::TimedOut)
        ));
    }

    #[tokio::test]
    async fn test_dropped_recv_keeps_packet() {
        let driver = MemDriver::new();
        let (_manager, session) = start(&driver, "a-drop");

        let abandoned = tokio::time::timeout(Duration::from_millis(20), session.recv()).await;
        assert!(abandoned.is_err());

        driver.inject("a-drop", b"important");
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(session.recv().await.unwrap(), b"important");
        assert_eq!(session.session().stats().packets_received, 1);
    }

    #[tokio::test]
    async fn test_send_gives_up_when_full() {
        let driver = MemDriver::new();
        let (_manager, session) = start(&driver, "a-stuck");
        for _ in 0..4 {
            session.send(b"fill").await.unwrap();
        }

        assert!(matches!(session.send(b"more").await, Err(TunError::TimedOut)));
        assert_eq!(driver.drain_outbound("a-stuck").len(), 4);
    }

    #[tokio::test]
    async fn test_send_waits_for_space() {
        let driver = MemDriver::new();
        let (_manager, session) = start(&driver, "a-full");
        for _ in 0..4 {
            session.send(b"fill").await.unwrap();
        }

        let peer = driver.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            peer.drain_outbound("a-full");
        });

        session.send(b"more").await.unwrap();
        assert_eq!(session.session().stats().packets_sent, 5);
    }

    #[tokio::test]
    async fn test_shutdown_ends_recv() {
        let driver = MemDriver::new();
        let (_manager, session) = start(&driver, "a-stop");
        let inner = session.session().clone();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            inner.shutdown();
        });

        assert!(matches!(session.recv().await, Err(TunError::SessionEnded)));
        stopper.await.unwrap();
    }
}
