//! Packet sessions: the ring pair between an adapter and this process.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tunring_core::{Driver, Event, Luid, RawPacket, TunError, TunResult, Wakeup};

use crate::adapter::AdapterInner;
use crate::packet::{ReceivedPacket, SendPacket};
use crate::stats::{Counters, SessionStats};

/// Parameters for starting a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Ring capacity, in the driver's unit. `None` uses the driver default.
    pub ring_capacity: Option<u32>,
    /// Non-blocking receive attempts before waiting on the read event.
    /// The second half of them yield the thread.
    pub spin_count: u32,
    /// Extra attempts `send` makes while the send ring is full.
    pub send_retries: u32,
    /// Pause between those attempts.
    pub send_backoff: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ring_capacity: None,
            spin_count: 64,
            send_retries: 50,
            send_backoff: Duration::from_millis(1),
        }
    }
}

impl SessionConfig {
    pub fn with_ring_capacity(mut self, capacity: u32) -> Self {
        self.ring_capacity = Some(capacity);
        self
    }

    pub fn with_spin_count(mut self, spin_count: u32) -> Self {
        self.spin_count = spin_count;
        self
    }

    pub fn with_send_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.send_retries = retries;
        self.send_backoff = backoff;
        self
    }
}

/// A running packet session on an adapter.
///
/// `Session` is `Send + Sync`: any number of threads may send and receive
/// concurrently. Packet handles borrow the session, so it cannot end while
/// one is outstanding. The session ends on [`end`](Self::end) or drop.
pub struct Session<D: Driver> {
    adapter: Arc<AdapterInner<D>>,
    handle: D::Session,
    read_event: D::Event,
    shutdown: D::Event,
    capacity: u32,
    config: SessionConfig,
    counters: Counters,
}

impl<D: Driver> Session<D> {
    pub(crate) fn start(adapter: Arc<AdapterInner<D>>, config: SessionConfig) -> TunResult<Self> {
        let driver = &adapter.shared.driver;
        let bounds = driver.capacity_bounds();
        let capacity = match config.ring_capacity {
            Some(capacity) => bounds.validate(capacity)?,
            None => bounds.default,
        };

        adapter.claim_session()?;

        let handle = match driver.start_session(adapter.handle, capacity) {
            Ok(handle) => handle,
            Err(e) => {
                adapter.release_session();
                return Err(e);
            }
        };

        let events = driver
            .read_wait_event(handle)
            .and_then(|read| Ok((read, D::Event::new_manual_reset()?)));
        let (read_event, shutdown) = match events {
            Ok(events) => events,
            Err(e) => {
                // SAFETY: the session was just started and nothing else has seen it.
                unsafe { driver.end_session(handle) };
                adapter.release_session();
                return Err(e);
            }
        };

        adapter.shared.sessions.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(adapter = %adapter.name, capacity, "started session");

        Ok(Self {
            adapter,
            handle,
            read_event,
            shutdown,
            capacity,
            config,
            counters: Counters::default(),
        })
    }

    #[inline]
    fn driver(&self) -> &D {
        &self.adapter.shared.driver
    }

    /// Ring capacity negotiated at start.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter.name
    }

    pub fn adapter_luid(&self) -> Luid {
        self.driver().adapter_luid(self.adapter.handle)
    }

    /// Raw driver handle, for driver-specific calls.
    pub fn raw_handle(&self) -> D::Session {
        self.handle
    }

    /// Event signalled when the receive ring has packets. Only valid while
    /// the session runs.
    pub fn read_wait_event(&self) -> &D::Event {
        &self.read_event
    }

    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    /// Terminal signal. Blocked receivers wake with `SessionEnded` and every
    /// later operation fails with it. The driver session itself ends when
    /// this value is ended or dropped.
    pub fn shutdown(&self) {
        if let Err(e) = self.shutdown.set() {
            tracing::warn!(error = %e, "failed to signal session shutdown");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_set()
    }

    fn check_open(&self) -> TunResult<()> {
        if self.is_shut_down() {
            return Err(TunError::SessionEnded);
        }
        Ok(())
    }

    /// Take the next inbound packet without blocking. An empty ring is
    /// `WouldBlock`.
    pub fn try_receive(&self) -> TunResult<ReceivedPacket<'_, D>> {
        self.check_open()?;
        let raw = self.driver().receive_packet(self.handle)?;
        self.counters.record_received(raw.len());
        tracing::trace!(len = raw.len(), "received packet");
        Ok(ReceivedPacket::new(self, raw))
    }

    /// Receive, spinning briefly and then blocking on the read event.
    /// `None` waits until a packet arrives or the session shuts down.
    pub fn receive(&self, timeout: Option<Duration>) -> TunResult<ReceivedPacket<'_, D>> {
        self.receive_with(None, timeout)
    }

    /// [`receive`](Self::receive) that also gives up with `Interrupted` once
    /// `interrupt` is signalled. A packet already queued is still returned.
    /// The caller resets `interrupt` before reusing it.
    pub fn receive_interruptible(
        &self,
        interrupt: &D::Event,
        timeout: Option<Duration>,
    ) -> TunResult<ReceivedPacket<'_, D>> {
        self.receive_with(Some(interrupt), timeout)
    }

    fn receive_with(
        &self,
        interrupt: Option<&D::Event>,
        timeout: Option<Duration>,
    ) -> TunResult<ReceivedPacket<'_, D>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let yield_after = self.config.spin_count / 2;
        loop {
            for i in 0..self.config.spin_count.max(1) {
                match self.try_receive() {
                    Err(TunError::WouldBlock) => {
                        if i >= yield_after {
                            thread::yield_now();
                        }
                    }
                    result => return result,
                }
            }
            if !self.wait_until(deadline, interrupt)? {
                return Err(TunError::TimedOut);
            }
        }
    }

    /// Block until the receive ring signals readiness. Returns `false` on
    /// timeout and `SessionEnded` once the session shuts down.
    pub fn wait_readable(&self, timeout: Option<Duration>) -> TunResult<bool> {
        self.check_open()?;
        self.wait_until(timeout.map(|t| Instant::now() + t), None)
    }

    /// [`wait_readable`](Self::wait_readable) that fails with `Interrupted`
    /// once `interrupt` is signalled.
    pub fn wait_readable_interruptible(
        &self,
        interrupt: &D::Event,
        timeout: Option<Duration>,
    ) -> TunResult<bool> {
        self.check_open()?;
        self.wait_until(timeout.map(|t| Instant::now() + t), Some(interrupt))
    }

    fn wait_until(&self, deadline: Option<Instant>, interrupt: Option<&D::Event>) -> TunResult<bool> {
        let timeout = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(false);
                }
                Some(deadline - now)
            }
            None => None,
        };
        let wakeup = match interrupt {
            Some(interrupt) => self
                .read_event
                .wait_interruptible(&self.shutdown, interrupt, timeout)?,
            None => self.read_event.wait_either(&self.shutdown, timeout)?,
        };
        match wakeup {
            Wakeup::Ready => Ok(true),
            Wakeup::Cancelled => Err(TunError::SessionEnded),
            Wakeup::Interrupted => Err(TunError::Interrupted),
            Wakeup::TimedOut => Ok(false),
        }
    }

    /// Blocking receive into `buf`. Returns the packet length.
    pub fn recv_into(&self, buf: &mut [u8]) -> TunResult<usize> {
        copy_out(self.receive(None)?, buf)
    }

    /// Non-blocking receive into `buf`.
    pub fn try_recv_into(&self, buf: &mut [u8]) -> TunResult<usize> {
        copy_out(self.try_receive()?, buf)
    }

    /// Reserve a send buffer of `size` bytes. A full ring is
    /// `ResourceExhausted`.
    pub fn allocate_send_packet(&self, size: usize) -> TunResult<SendPacket<'_, D>> {
        self.check_open()?;
        let size = tunring_core::validate_packet_size(size)?;
        match self.driver().allocate_send_packet(self.handle, size) {
            Ok(raw) => Ok(SendPacket::new(self, raw)),
            Err(e) => {
                if let TunError::ResourceExhausted { .. } = e {
                    self.counters.record_ring_full();
                    tracing::trace!(size, "send ring full");
                }
                Err(e)
            }
        }
    }

    /// Copy `packet` into the send ring without waiting for space.
    pub fn try_send(&self, packet: &[u8]) -> TunResult<()> {
        let mut buf = self.allocate_send_packet(packet.len())?;
        buf.copy_from_slice(packet);
        buf.send();
        Ok(())
    }

    /// Copy `packet` into the send ring, retrying while it is full. Gives
    /// up with `TimedOut` after `send_retries` attempts.
    pub fn send(&self, packet: &[u8]) -> TunResult<()> {
        let mut attempt = 0;
        loop {
            match self.try_send(packet) {
                Err(TunError::ResourceExhausted { .. }) if attempt < self.config.send_retries => {
                    attempt += 1;
                    thread::sleep(self.config.send_backoff);
                }
                Err(TunError::ResourceExhausted { .. }) => {
                    tracing::debug!(attempts = attempt + 1, "send ring stayed full");
                    return Err(TunError::TimedOut);
                }
                result => return result,
            }
        }
    }

    /// Copy `packet` into the send ring, waiting for space for as long as
    /// it takes. Fails with `Interrupted` once `interrupt` is signalled while
    /// the ring is full.
    pub fn send_interruptible(&self, packet: &[u8], interrupt: &D::Event) -> TunResult<()> {
        loop {
            match self.try_send(packet) {
                Err(TunError::ResourceExhausted { .. }) => {
                    match interrupt.wait_either(&self.shutdown, Some(self.config.send_backoff))? {
                        Wakeup::Ready | Wakeup::Interrupted => return Err(TunError::Interrupted),
                        Wakeup::Cancelled => return Err(TunError::SessionEnded),
                        Wakeup::TimedOut => {}
                    }
                }
                result => return result,
            }
        }
    }

    /// End the session and release its rings.
    pub fn end(self) {}

    pub(crate) fn release_raw(&self, raw: RawPacket) {
        // SAFETY: called once per received packet, from its handle's drop,
        // while the session is borrowed and therefore running.
        unsafe { self.driver().release_receive_packet(self.handle, raw) };
    }

    pub(crate) fn commit_raw(&self, raw: RawPacket) {
        // SAFETY: called once per allocated packet, from `SendPacket::send`,
        // while the session is borrowed and therefore running.
        unsafe { self.driver().send_packet(self.handle, raw) };
        self.counters.record_sent(raw.len());
        tracing::trace!(len = raw.len(), "sent packet");
    }

    pub(crate) fn discard_raw(&self, raw: RawPacket) {
        // SAFETY: as for commit_raw, from `SendPacket`'s drop.
        unsafe { self.driver().send_packet(self.handle, raw) };
    }
}

fn copy_out<D: Driver>(packet: ReceivedPacket<'_, D>, buf: &mut [u8]) -> TunResult<usize> {
    let len = packet.len();
    if buf.len() < len {
        return Err(TunError::InvalidArgument(format!(
            "buffer of {} bytes is too small for a {len}-byte packet",
            buf.len()
        )));
    }
    buf[..len].copy_from_slice(&packet);
    Ok(len)
}

impl<D: Driver> Drop for Session<D> {
    fn drop(&mut self) {
        self.shutdown();
        // SAFETY: packet handles borrow the session, so none is outstanding,
        // and the handle is never used again.
        unsafe { self.driver().end_session(self.handle) };
        self.adapter.release_session();
        self.adapter.shared.sessions.fetch_sub(1, Ordering::AcqRel);
        tracing::debug!(adapter = %self.adapter.name, "ended session");
    }
}

impl<D: Driver> std::fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("adapter", &self.adapter.name)
            .field("handle", &self.handle)
            .field("capacity", &self.capacity)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AdapterConfig, SessionManager};
    use tunring_core::Signal;
    use tunring_mem::MemDriver;

    fn setup(name: &str, capacity: u32) -> (MemDriver, SessionManager<MemDriver>, Session<MemDriver>) {
        let driver = MemDriver::new();
        let manager = SessionManager::new(driver.clone());
        let adapter = manager.create_adapter(&AdapterConfig::new(name)).unwrap();
        let session = adapter
            .start_session(&SessionConfig::default().with_ring_capacity(capacity))
            .unwrap();
        (driver, manager, session)
    }

    #[test]
    fn test_capacity_defaults_and_bounds() {
        let manager = SessionManager::new(MemDriver::new());
        let adapter = manager.create_adapter(&AdapterConfig::new("cap")).unwrap();

        for bad in [3, 2, 8192] {
            assert!(matches!(
                adapter.start_session(&SessionConfig::default().with_ring_capacity(bad)),
                Err(TunError::InvalidArgument(_))
            ));
        }
        let session = adapter.start_session(&SessionConfig::default()).unwrap();
        assert_eq!(session.capacity(), 256);
    }

    #[test]
    fn test_receive_fifo() {
        let (driver, _manager, session) = setup("fifo", 8);
        for i in 0..5u8 {
            assert!(driver.inject("fifo", &[i; 3]));
        }
        for i in 0..5u8 {
            let packet = session.try_receive().unwrap();
            assert_eq!(&*packet, &[i; 3]);
        }
        assert!(matches!(session.try_receive(), Err(TunError::WouldBlock)));
        assert_eq!(session.stats().packets_received, 5);
        assert_eq!(session.stats().bytes_received, 15);
    }

    #[test]
    fn test_recv_into_short_buffer_releases() {
        let (driver, _manager, session) = setup("short", 4);
        driver.inject("short", &[7; 40]);

        let mut small = [0u8; 10];
        assert!(matches!(
            session.try_recv_into(&mut small),
            Err(TunError::InvalidArgument(_))
        ));
        assert_eq!(driver.outstanding_packets(), 0);

        driver.inject("short", &[8; 4]);
        assert_eq!(session.try_recv_into(&mut small).unwrap(), 4);
        assert_eq!(&small[..4], &[8; 4]);
    }

    #[test]
    fn test_receive_timeout() {
        let (_driver, _manager, session) = setup("tmo", 4);
        let start = Instant::now();
        assert!(matches!(
            session.receive(Some(Duration::from_millis(30))),
            Err(TunError::TimedOut)
        ));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_receive_wakes_on_inject() {
        let (driver, _manager, session) = setup("wake", 4);
        let session = Arc::new(session);

        let receiver = {
            let session = session.clone();
            thread::spawn(move || {
                session
                    .receive(Some(Duration::from_secs(5)))
                    .map(|p| p.to_vec())
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert!(driver.inject("wake", b"late"));

        assert_eq!(receiver.join().unwrap().unwrap(), b"late");
    }

    #[test]
    fn test_receive_interruptible() {
        let (driver, _manager, session) = setup("intr", 4);
        let session = Arc::new(session);
        let interrupt = Signal::new();

        let receiver = {
            let session = session.clone();
            let interrupt = interrupt.clone();
            thread::spawn(move || {
                session
                    .receive_interruptible(&interrupt, Some(Duration::from_secs(5)))
                    .map(|p| p.to_vec())
            })
        };
        while interrupt.waiter_count() == 0 {
            thread::yield_now();
        }
        interrupt.set();
        assert!(matches!(
            receiver.join().unwrap(),
            Err(TunError::Interrupted)
        ));

        // The session is untouched, and a queued packet wins over the interrupt.
        assert!(!session.is_shut_down());
        driver.inject("intr", b"after");
        assert_eq!(
            &*session
                .receive_interruptible(&interrupt, Some(Duration::ZERO))
                .unwrap(),
            b"after"
        );
        assert!(matches!(
            session.wait_readable_interruptible(&interrupt, None),
            Err(TunError::Interrupted)
        ));

        interrupt.reset();
        assert!(!session
            .wait_readable_interruptible(&interrupt, Some(Duration::from_millis(10)))
            .unwrap());
    }

    #[test]
    fn test_shutdown_wins_over_interrupt() {
        let (_driver, _manager, session) = setup("intr-end", 4);
        let interrupt = Signal::new();
        interrupt.set();
        session.shutdown();
        assert!(matches!(
            session.receive_interruptible(&interrupt, None),
            Err(TunError::SessionEnded)
        ));
    }

    #[test]
    fn test_send_interruptible() {
        let (driver, _manager, session) = setup("intr-tx", 4);
        let session = Arc::new(session);
        let interrupt = Signal::new();

        session.send_interruptible(b"free", &interrupt).unwrap();
        for _ in 0..3 {
            session.try_send(b"x").unwrap();
        }

        let sender = {
            let session = session.clone();
            let interrupt = interrupt.clone();
            thread::spawn(move || session.send_interruptible(b"blocked", &interrupt))
        };
        thread::sleep(Duration::from_millis(20));
        interrupt.set();
        assert!(matches!(sender.join().unwrap(), Err(TunError::Interrupted)));

        interrupt.reset();
        assert_eq!(driver.drain_outbound("intr-tx").len(), 4);
        session.send_interruptible(b"room", &interrupt).unwrap();
        assert_eq!(driver.drain_outbound("intr-tx"), vec![b"room".to_vec()]);
    }

    #[test]
    fn test_shutdown_is_terminal() {
        let (driver, _manager, session) = setup("term", 4);
        driver.inject("term", b"pending");

        session.shutdown();
        assert!(matches!(session.try_receive(), Err(TunError::SessionEnded)));
        assert!(matches!(
            session.receive(None),
            Err(TunError::SessionEnded)
        ));
        assert!(matches!(session.try_send(b"x"), Err(TunError::SessionEnded)));
        assert!(matches!(
            session.wait_readable(None),
            Err(TunError::SessionEnded)
        ));
    }

    #[test]
    fn test_driver_eof_is_terminal() {
        let (driver, _manager, session) = setup("eof", 4);
        driver.fail_session("eof");
        assert!(matches!(
            session.receive(Some(Duration::from_secs(1))),
            Err(TunError::SessionEnded)
        ));
    }

    #[test]
    fn test_send_copies_and_counts() {
        let (driver, _manager, session) = setup("tx", 4);
        session.send(b"first").unwrap();
        session.try_send(b"second").unwrap();

        assert_eq!(
            driver.drain_outbound("tx"),
            vec![b"first".to_vec(), b"second".to_vec()]
        );
        let stats = session.stats();
        assert_eq!(stats.packets_sent, 2);
        assert_eq!(stats.bytes_sent, 11);
    }

    #[test]
    fn test_send_gives_up_when_ring_stays_full() {
        let driver = MemDriver::new();
        let manager = SessionManager::new(driver.clone());
        let adapter = manager.create_adapter(&AdapterConfig::new("full")).unwrap();
        let config = SessionConfig::default()
            .with_ring_capacity(4)
            .with_send_retries(3, Duration::from_millis(1));
        let session = adapter.start_session(&config).unwrap();

        for _ in 0..4 {
            session.try_send(b"x").unwrap();
        }
        assert!(matches!(
            session.try_send(b"x"),
            Err(TunError::ResourceExhausted { .. })
        ));
        assert!(matches!(session.send(b"x"), Err(TunError::TimedOut)));
        assert_eq!(session.stats().send_ring_full, 5);

        driver.drain_outbound("full");
        session.send(b"y").unwrap();
    }

    #[test]
    fn test_packet_size_checked() {
        let (_driver, _manager, session) = setup("size", 4);
        assert!(matches!(
            session.allocate_send_packet(0),
            Err(TunError::InvalidArgument(_))
        ));
        assert!(matches!(
            session.allocate_send_packet(0x1_0000),
            Err(TunError::InvalidArgument(_))
        ));
        assert!(session.allocate_send_packet(0xFFFF).is_ok());
    }

    #[test]
    fn test_unsent_packet_is_zeroed() {
        let (driver, _manager, session) = setup("drop", 4);
        {
            let mut packet = session.allocate_send_packet(4).unwrap();
            packet.copy_from_slice(b"junk");
        }
        assert_eq!(driver.drain_outbound("drop"), vec![vec![0u8; 4]]);
        assert_eq!(session.stats().packets_sent, 0);
        assert!(driver.violations().is_empty());
    }
}
