//! tunring-testkit: Conformance scenarios for tunring drivers.
//!
//! Provides the `DriverFactory` trait and shared scenarios that every
//! driver must pass. Drivers that let a test play the network peer also
//! implement `Loopback`, which unlocks the packet-flow scenarios.
//!
//! # Usage
//!
//! ```ignore
//! use tunring_testkit::{DriverFactory, TestError};
//!
//! struct MyDriverFactory;
//!
//! impl DriverFactory for MyDriverFactory {
//!     type Driver = MyDriver;
//!
//!     fn create() -> Result<Self::Driver, TestError> {
//!         Ok(MyDriver::new())
//!     }
//!
//!     fn small_capacity() -> u32 {
//!         MyDriver::MIN_CAPACITY
//!     }
//! }
//!
//! #[test]
//! fn my_driver_empty_receive() {
//!     tunring_testkit::run_empty_receive_would_block::<MyDriverFactory>();
//! }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tunring::{
    AdapterConfig, Driver, Event, Logger, ManagerConfig, ReadPump, SessionConfig,
    SessionManager, TunError,
};

/// Error type for test scenarios.
#[derive(Debug)]
pub enum TestError {
    /// Driver or adapter creation failed.
    Setup(String),
    /// A tunring call failed unexpectedly.
    Tun(TunError),
    /// Assertion failed.
    Assertion(String),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Setup(msg) => write!(f, "setup error: {}", msg),
            TestError::Tun(e) => write!(f, "tunring error: {}", e),
            TestError::Assertion(msg) => write!(f, "assertion failed: {}", msg),
        }
    }
}

impl std::error::Error for TestError {}

impl From<TunError> for TestError {
    fn from(e: TunError) -> Self {
        TestError::Tun(e)
    }
}

/// Factory trait for creating drivers under test.
pub trait DriverFactory: 'static {
    /// The driver type being tested.
    type Driver: Driver;

    /// Create a fresh driver.
    fn create() -> Result<Self::Driver, TestError>;

    /// Smallest ring capacity the driver accepts.
    fn small_capacity() -> u32;

    /// Adapter name for a scenario. Names must not collide between
    /// scenarios that may run in parallel.
    fn adapter_name(scenario: &str) -> String {
        format!("tunring-{}", scenario)
    }
}

/// Peer-side controls for drivers that can simulate the network.
pub trait Loopback: DriverFactory {
    /// Queue an inbound packet. `false` if the ring is full.
    fn inject(driver: &Self::Driver, adapter: &str, packet: &[u8]) -> bool;

    /// Take every packet the host has sent, in order.
    fn drain(driver: &Self::Driver, adapter: &str) -> Vec<Vec<u8>>;

    /// Make the session report end of file.
    fn fail(driver: &Self::Driver, adapter: &str) -> bool;

    /// Received packets not yet released.
    fn outstanding(driver: &Self::Driver) -> usize;

    /// ABI misuse the driver has observed.
    fn violations(driver: &Self::Driver) -> usize;
}

fn manager<F: DriverFactory>() -> Result<SessionManager<F::Driver>, TestError> {
    Ok(SessionManager::with_config(
        F::create()?,
        ManagerConfig::default().with_logger(Logger::Disabled),
    ))
}

fn interrupt_event<F: DriverFactory>() -> Result<<F::Driver as Driver>::Event, TestError> {
    Ok(<<F::Driver as Driver>::Event as Event>::new_manual_reset()?)
}

fn small<F: DriverFactory>() -> SessionConfig {
    SessionConfig::default().with_ring_capacity(F::small_capacity())
}

fn check(cond: bool, msg: impl FnOnce() -> String) -> Result<(), TestError> {
    if cond {
        Ok(())
    } else {
        Err(TestError::Assertion(msg()))
    }
}

fn expect_err<T>(
    result: Result<T, TunError>,
    what: &str,
    matches: impl FnOnce(&TunError) -> bool,
) -> Result<(), TestError> {
    match result {
        Err(e) if matches(&e) => Ok(()),
        Err(e) => Err(TestError::Assertion(format!("{}: unexpected error {}", what, e))),
        Ok(_) => Err(TestError::Assertion(format!("{}: expected an error", what))),
    }
}

macro_rules! scenario {
    ($(#[$doc:meta])* $name:ident, $inner:ident, $bound:ident) => {
        $(#[$doc])*
        pub fn $name<F: $bound>() {
            if let Err(e) = $inner::<F>() {
                panic!("{} failed: {}", stringify!($name), e);
            }
        }
    };
}

// ============================================================================
// Driver-agnostic scenarios
// ============================================================================

scenario!(
    /// Receiving on an empty ring returns `WouldBlock` at once.
    run_empty_receive_would_block,
    empty_receive_would_block,
    DriverFactory
);

fn empty_receive_would_block<F: DriverFactory>() -> Result<(), TestError> {
    let manager = manager::<F>()?;
    let adapter = manager.create_adapter(&AdapterConfig::new(F::adapter_name("empty")))?;
    let session = adapter.start_session(&small::<F>())?;

    let start = Instant::now();
    for _ in 0..100 {
        expect_err(session.try_receive(), "try_receive", |e| {
            matches!(e, TunError::WouldBlock)
        })?;
    }
    check(start.elapsed() < Duration::from_secs(1), || {
        "try_receive blocked".into()
    })
}

scenario!(
    /// A blocking receive with a timeout gives up with `TimedOut`.
    run_receive_timeout,
    receive_timeout,
    DriverFactory
);

fn receive_timeout<F: DriverFactory>() -> Result<(), TestError> {
    let manager = manager::<F>()?;
    let adapter = manager.create_adapter(&AdapterConfig::new(F::adapter_name("timeout")))?;
    let session = adapter.start_session(&small::<F>())?;

    let timeout = Duration::from_millis(50);
    let start = Instant::now();
    expect_err(session.receive(Some(timeout)), "receive", |e| {
        matches!(e, TunError::TimedOut)
    })?;
    check(start.elapsed() >= timeout, || "returned before timeout".into())
}

scenario!(
    /// Shutting a session down wakes a blocked receiver with a terminal
    /// error, never a packet.
    run_shutdown_unblocks_waiter,
    shutdown_unblocks_waiter,
    DriverFactory
);

fn shutdown_unblocks_waiter<F: DriverFactory>() -> Result<(), TestError> {
    let manager = manager::<F>()?;
    let adapter = manager.create_adapter(&AdapterConfig::new(F::adapter_name("shutdown")))?;
    let session = Arc::new(adapter.start_session(&small::<F>())?);

    let waiter = {
        let session = session.clone();
        thread::spawn(move || session.receive(None).map(|p| p.len()))
    };
    thread::sleep(Duration::from_millis(20));
    session.shutdown();

    let result = waiter
        .join()
        .map_err(|_| TestError::Setup("waiter panicked".into()))?;
    expect_err(result, "blocked receive", |e| e.is_terminal())
}

scenario!(
    /// Only one session may run per adapter.
    run_second_session_rejected,
    second_session_rejected,
    DriverFactory
);

fn second_session_rejected<F: DriverFactory>() -> Result<(), TestError> {
    let manager = manager::<F>()?;
    let adapter = manager.create_adapter(&AdapterConfig::new(F::adapter_name("second")))?;
    let session = adapter.start_session(&small::<F>())?;

    expect_err(adapter.start_session(&small::<F>()), "second start", |e| {
        matches!(e, TunError::ContractViolation(_))
    })?;
    session.end();
    adapter.start_session(&small::<F>())?;
    Ok(())
}

scenario!(
    /// A second handle on the same adapter cannot start a session while the
    /// first one's runs.
    run_second_handle_session_rejected,
    second_handle_session_rejected,
    DriverFactory
);

fn second_handle_session_rejected<F: DriverFactory>() -> Result<(), TestError> {
    let manager = manager::<F>()?;
    let name = F::adapter_name("handles");
    let first = manager.create_adapter(&AdapterConfig::new(name.clone()))?;
    let second = manager.open_adapter(&name)?;
    let session = first.start_session(&small::<F>())?;

    expect_err(second.start_session(&small::<F>()), "start on second handle", |e| {
        matches!(e, TunError::ContractViolation(_))
    })?;
    session.end();
    second.start_session(&small::<F>())?;
    Ok(())
}

scenario!(
    /// An interrupt cuts one blocked receive short without ending the
    /// session.
    run_receive_interruptible,
    receive_interruptible,
    DriverFactory
);

fn receive_interruptible<F: DriverFactory>() -> Result<(), TestError> {
    let manager = manager::<F>()?;
    let adapter = manager.create_adapter(&AdapterConfig::new(F::adapter_name("interrupt")))?;
    let session = Arc::new(adapter.start_session(&small::<F>())?);
    let interrupt = Arc::new(interrupt_event::<F>()?);

    let waiter = {
        let session = session.clone();
        let interrupt = interrupt.clone();
        thread::spawn(move || {
            session
                .receive_interruptible(&interrupt, Some(Duration::from_secs(5)))
                .map(|p| p.len())
        })
    };
    thread::sleep(Duration::from_millis(20));
    interrupt.set()?;

    let result = waiter
        .join()
        .map_err(|_| TestError::Setup("waiter panicked".into()))?;
    expect_err(result, "interrupted receive", |e| {
        matches!(e, TunError::Interrupted)
    })?;
    check(!session.is_shut_down(), || "interrupt ended the session".into())?;

    interrupt.reset()?;
    expect_err(session.try_receive(), "try_receive after interrupt", |e| {
        matches!(e, TunError::WouldBlock)
    })?;
    expect_err(
        session.receive_interruptible(&interrupt, Some(Duration::from_millis(20))),
        "receive after reset",
        |e| matches!(e, TunError::TimedOut),
    )
}

scenario!(
    /// Closing an adapter with a running session is reported, and the
    /// driver-level close waits for the session to end.
    run_close_deferred_while_session_active,
    close_deferred_while_session_active,
    DriverFactory
);

fn close_deferred_while_session_active<F: DriverFactory>() -> Result<(), TestError> {
    let manager = manager::<F>()?;
    let adapter = manager.create_adapter(&AdapterConfig::new(F::adapter_name("deferred")))?;
    let session = adapter.start_session(&small::<F>())?;

    expect_err(adapter.close(), "close", |e| {
        matches!(e, TunError::ContractViolation(_))
    })?;
    check(manager.open_adapters() == 1, || {
        "adapter closed under a running session".into()
    })?;

    session.end();
    check(manager.open_adapters() == 0, || {
        "adapter not closed after session end".into()
    })
}

scenario!(
    /// Deleting the driver is refused while a session runs.
    run_delete_driver_rejected_with_session,
    delete_driver_rejected_with_session,
    DriverFactory
);

fn delete_driver_rejected_with_session<F: DriverFactory>() -> Result<(), TestError> {
    let manager = manager::<F>()?;
    let adapter = manager.create_adapter(&AdapterConfig::new(F::adapter_name("delete")))?;
    let _session = adapter.start_session(&small::<F>())?;

    expect_err(manager.delete_driver(), "delete_driver", |e| {
        matches!(e, TunError::ContractViolation(_))
    })?;
    manager.driver_version()?;
    Ok(())
}

scenario!(
    /// Installing a logger replaces the previous one.
    run_logger_replacement,
    logger_replacement,
    DriverFactory
);

fn logger_replacement<F: DriverFactory>() -> Result<(), TestError> {
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let counter = first.clone();
    let manager = SessionManager::with_config(
        F::create()?,
        ManagerConfig::default().with_logger(Logger::custom(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })),
    );
    drop(manager.create_adapter(&AdapterConfig::new(F::adapter_name("log-a")))?);
    let seen_by_first = first.load(Ordering::SeqCst);
    check(seen_by_first > 0, || "first logger got no records".into())?;

    let counter = second.clone();
    manager.set_logger(Logger::custom(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    drop(manager.create_adapter(&AdapterConfig::new(F::adapter_name("log-b")))?);

    check(first.load(Ordering::SeqCst) == seen_by_first, || {
        "replaced logger still called".into()
    })?;
    check(second.load(Ordering::SeqCst) > 0, || {
        "new logger got no records".into()
    })?;
    manager.set_logger(Logger::Disabled);
    Ok(())
}

// ============================================================================
// Loopback scenarios
// ============================================================================

scenario!(
    /// An interrupt ends a send waiting on a full ring. The ring keeps the
    /// packets it already holds.
    run_send_interruptible,
    send_interruptible,
    Loopback
);

fn send_interruptible<F: Loopback>() -> Result<(), TestError> {
    let manager = manager::<F>()?;
    let name = F::adapter_name("send-interrupt");
    let adapter = manager.create_adapter(&AdapterConfig::new(name.clone()))?;
    let session = adapter.start_session(&small::<F>())?;
    let interrupt = interrupt_event::<F>()?;

    let mut queued = 0;
    loop {
        match session.try_send(&[0x45; 64]) {
            Ok(()) => queued += 1,
            Err(TunError::ResourceExhausted { .. }) => break,
            Err(e) => return Err(e.into()),
        }
    }

    interrupt.set()?;
    expect_err(
        session.send_interruptible(&[0x45; 64], &interrupt),
        "send on full ring",
        |e| matches!(e, TunError::Interrupted),
    )?;

    check(F::drain(manager.driver(), &name).len() == queued, || {
        "queued packets lost".into()
    })?;
    interrupt.reset()?;
    session.send_interruptible(&[0x45; 64], &interrupt)?;
    check(F::drain(manager.driver(), &name).len() == 1, || {
        "send after reset not delivered".into()
    })
}

scenario!(
    /// Packets injected by the peer arrive in order; packets sent reach the
    /// peer in order.
    run_loopback_round_trip,
    loopback_round_trip,
    Loopback
);

fn loopback_round_trip<F: Loopback>() -> Result<(), TestError> {
    let name = F::adapter_name("round-trip");
    let manager = manager::<F>()?;
    let adapter = manager.create_adapter(&AdapterConfig::new(name.clone()))?;
    let session = adapter.start_session(&small::<F>())?;
    let driver = manager.driver();

    let inbound: Vec<Vec<u8>> = (0..3u8).map(|i| vec![0x45, i, i, i]).collect();
    for packet in &inbound {
        check(F::inject(driver, &name, packet), || "inject failed".into())?;
    }
    for expected in &inbound {
        let packet = session.receive(Some(Duration::from_secs(1)))?;
        check(&*packet == expected.as_slice(), || {
            format!("expected {:?}, got {:?}", expected, &*packet)
        })?;
    }

    let outbound: Vec<Vec<u8>> = (0..3u8).map(|i| vec![0x60, i]).collect();
    for packet in &outbound {
        session.send(packet)?;
    }
    let drained = F::drain(driver, &name);
    check(drained == outbound, || {
        format!("peer saw {:?}", drained)
    })?;

    let stats = session.stats();
    check(stats.packets_received == 3 && stats.packets_sent == 3, || {
        format!("unexpected stats {:?}", stats)
    })
}

/// Fill the send ring without sending anything and return how many buffers
/// fit before the driver reported `ResourceExhausted`.
pub fn run_send_ring_exhaustion<F: Loopback>() -> usize {
    match send_ring_exhaustion::<F>() {
        Ok(count) => count,
        Err(e) => panic!("run_send_ring_exhaustion failed: {}", e),
    }
}

fn send_ring_exhaustion<F: Loopback>() -> Result<usize, TestError> {
    let name = F::adapter_name("exhaustion");
    let manager = manager::<F>()?;
    let adapter = manager.create_adapter(&AdapterConfig::new(name.clone()))?;
    let session = adapter.start_session(&small::<F>())?;

    let first = session.allocate_send_packet(100)?;
    first.send();

    let mut held = Vec::new();
    loop {
        match session.allocate_send_packet(100) {
            Ok(packet) => held.push(packet),
            Err(TunError::ResourceExhausted { .. }) => break,
            Err(e) => return Err(e.into()),
        }
        check(held.len() <= 1 << 20, || "send ring never filled".into())?;
    }
    let count = held.len() + 1;

    for mut packet in held {
        packet.copy_from_slice(&[0x45; 100]);
        packet.send();
    }
    let drained = F::drain(manager.driver(), &name);
    check(drained.len() == count, || {
        format!("peer saw {} of {} packets", drained.len(), count)
    })?;
    check(session.stats().send_ring_full == 1, || {
        "ring-full count not recorded".into()
    })?;
    Ok(count)
}

scenario!(
    /// Every received packet is released exactly once, however it is
    /// consumed.
    run_packets_released_exactly_once,
    packets_released_exactly_once,
    Loopback
);

fn packets_released_exactly_once<F: Loopback>() -> Result<(), TestError> {
    let name = F::adapter_name("release");
    let manager = manager::<F>()?;
    let adapter = manager.create_adapter(&AdapterConfig::new(name.clone()))?;
    let session = adapter.start_session(&small::<F>())?;
    let driver = manager.driver();

    for i in 0..3u8 {
        check(F::inject(driver, &name, &[i; 32]), || "inject failed".into())?;
    }
    let a = session.try_receive()?;
    let b = session.try_receive()?;
    check(F::outstanding(driver) == 2, || "expected two held packets".into())?;

    b.release();
    drop(a);
    let mut short = [0u8; 8];
    expect_err(session.try_recv_into(&mut short), "short recv_into", |e| {
        matches!(e, TunError::InvalidArgument(_))
    })?;

    check(F::outstanding(driver) == 0, || "packet leaked".into())?;
    session.end();
    check(F::violations(driver) == 0, || {
        "driver saw a double or unknown release".into()
    })
}

scenario!(
    /// A reader thread drains the ring and stops on shutdown.
    run_reader_drains_ring,
    reader_drains_ring,
    Loopback
);

fn reader_drains_ring<F: Loopback>() -> Result<(), TestError> {
    let name = F::adapter_name("reader");
    let manager = manager::<F>()?;
    let adapter = manager.create_adapter(&AdapterConfig::new(name.clone()))?;
    let session = Arc::new(adapter.start_session(&small::<F>())?);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let pump = ReadPump::spawn(session, move |p| sink.lock().push(p[0]))?;

    let total = 20u8;
    for i in 0..total {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !F::inject(manager.driver(), &name, &[i]) {
            check(Instant::now() < deadline, || "ring never drained".into())?;
            thread::sleep(Duration::from_millis(1));
        }
    }
    let deadline = Instant::now() + Duration::from_secs(5);
    while seen.lock().len() < total as usize && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }

    let delivered = pump.stop()?;
    check(delivered == total as u64, || {
        format!("reader delivered {} of {}", delivered, total)
    })?;
    let seen = seen.lock();
    check(*seen == (0..total).collect::<Vec<_>>(), || {
        format!("out of order: {:?}", *seen)
    })
}

scenario!(
    /// End of file from the driver is terminal for blocked and future calls.
    run_driver_eof_is_terminal,
    driver_eof_is_terminal,
    Loopback
);

fn driver_eof_is_terminal<F: Loopback>() -> Result<(), TestError> {
    let name = F::adapter_name("eof");
    let manager = manager::<F>()?;
    let adapter = manager.create_adapter(&AdapterConfig::new(name.clone()))?;
    let session = Arc::new(adapter.start_session(&small::<F>())?);

    let waiter = {
        let session = session.clone();
        thread::spawn(move || session.receive(Some(Duration::from_secs(5))).map(|p| p.len()))
    };
    thread::sleep(Duration::from_millis(20));
    check(F::fail(manager.driver(), &name), || "no session to fail".into())?;

    let result = waiter
        .join()
        .map_err(|_| TestError::Setup("waiter panicked".into()))?;
    expect_err(result, "blocked receive", |e| e.is_terminal())?;
    expect_err(session.try_send(&[1]), "send after eof", |e| e.is_terminal())?;
    tracing::debug!("eof scenario complete");
    Ok(())
}
