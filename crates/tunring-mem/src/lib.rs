//! In-memory adapter driver.
//!
//! `MemDriver` implements [`Driver`] without any kernel component. Every
//! session gets two [`PacketRing`]s: *inbound* (peer to host, read with
//! `receive_packet`) and *outbound* (host to peer, filled with
//! `allocate_send_packet`/`send_packet`). The test harness plays the peer
//! through [`MemDriver::inject`] and [`MemDriver::drain_outbound`].
//!
//! Misuse that the real driver would punish with memory corruption (double
//! release, sending an unknown buffer, ending a session with packets still
//! held) is recorded as a [`Violation`] instead, so tests can assert on it.
//!
//! # Example
//!
//! ```
//! use tunring_core::Driver;
//! use tunring_mem::MemDriver;
//!
//! let driver = MemDriver::new();
//! let adapter = driver.create_adapter("mem0", "test", None).unwrap();
//! let session = driver.start_session(adapter, 8).unwrap();
//!
//! assert!(driver.inject("mem0", b"hello"));
//! let packet = driver.receive_packet(session).unwrap();
//! assert_eq!(unsafe { packet.as_slice() }, b"hello");
//!
//! unsafe {
//!     driver.release_receive_packet(session, packet);
//!     driver.end_session(session);
//!     driver.close_adapter(adapter);
//! }
//! assert!(driver.violations().is_empty());
//! ```

mod ring;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tunring_core::{
    CapacityBounds, Driver, DriverVersion, Guid, LogLevel, LogRecord, LogSink, Luid, RawPacket,
    Signal, TunError, TunResult,
};

pub use ring::{PacketRing, RingError, SlotHandle, SlotState};

/// Ring capacities accepted by the in-memory driver, in packet slots.
pub const MEM_CAPACITY_BOUNDS: CapacityBounds = CapacityBounds {
    min: 4,
    max: 4096,
    default: 256,
};

/// Version reported by a freshly constructed driver.
pub const DEFAULT_VERSION: DriverVersion = DriverVersion::new(0, 14);

/// Handle to an open adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemAdapter(u64);

/// Handle to a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemSession(u64);

/// Lifecycle call observed by the driver, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateAdapter(String),
    OpenAdapter(String),
    CloseAdapter(String),
    StartSession(String),
    EndSession(String),
    DeleteDriver,
}

/// Misuse of the driver ABI detected at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub op: &'static str,
    pub detail: String,
}

struct Device {
    name: String,
    luid: Luid,
    guid: Option<Guid>,
    handles: u32,
    session: Option<u64>,
}

struct AdapterEntry {
    device: u64,
    /// Closing a created handle removes the device.
    created: bool,
}

struct SessionEntry {
    device: u64,
    inbound: PacketRing,
    outbound: PacketRing,
    read_event: Signal,
    failed: bool,
}

struct State {
    installed: bool,
    version: DriverVersion,
    devices: HashMap<u64, Device>,
    adapters: HashMap<u64, AdapterEntry>,
    sessions: HashMap<u64, SessionEntry>,
    next_id: u64,
    next_index: u32,
    /// Total ring slots the driver may hand out, `None` for unlimited.
    slot_budget: Option<u64>,
    slots_in_use: u64,
    calls: Vec<Call>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn device_id(&self, name: &str) -> Option<u64> {
        self.devices
            .iter()
            .find(|(_, d)| d.name.eq_ignore_ascii_case(name))
            .map(|(id, _)| *id)
    }

    fn session_for(&mut self, name: &str) -> Option<&mut SessionEntry> {
        let device = self.device_id(name)?;
        let session = self.devices.get(&device)?.session?;
        self.sessions.get_mut(&session)
    }

    fn device_name(&self, device: u64) -> String {
        self.devices
            .get(&device)
            .map(|d| d.name.clone())
            .unwrap_or_default()
    }
}

struct Inner {
    state: Mutex<State>,
    logger: RwLock<Option<LogSink>>,
    violations: Mutex<Vec<Violation>>,
}

/// Fake driver backed by process memory. Cloning yields another handle to
/// the same driver, so a test can keep one as the "peer".
#[derive(Clone)]
pub struct MemDriver {
    inner: Arc<Inner>,
}

impl Default for MemDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemDriver {
    pub fn new() -> Self {
        Self::with_version(DEFAULT_VERSION)
    }

    /// A driver reporting `version` from `running_driver_version`.
    pub fn with_version(version: DriverVersion) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    installed: true,
                    version,
                    devices: HashMap::new(),
                    adapters: HashMap::new(),
                    sessions: HashMap::new(),
                    next_id: 0,
                    next_index: 0,
                    slot_budget: None,
                    slots_in_use: 0,
                    calls: Vec::new(),
                }),
                logger: RwLock::new(None),
                violations: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Limit the ring slots all sessions may hold together. Sessions that
    /// would exceed it fail to start with `ResourceExhausted`.
    pub fn with_slot_budget(self, slots: u64) -> Self {
        self.inner.state.lock().slot_budget = Some(slots);
        self
    }

    /// Queue `bytes` on the inbound ring of the named adapter's session.
    /// Returns `false` if there is no session, its inbound ring is full, or
    /// `bytes` is not a valid packet size.
    pub fn inject(&self, adapter: &str, bytes: &[u8]) -> bool {
        if tunring_core::validate_packet_size(bytes.len()).is_err() {
            return false;
        }
        let mut state = self.inner.state.lock();
        let Some(session) = state.session_for(adapter) else {
            return false;
        };
        if session.failed {
            return false;
        }
        let handle = match session.inbound.alloc(bytes.len()) {
            Ok(handle) => handle,
            Err(_) => return false,
        };
        let committed = session
            .inbound
            .write(handle, bytes)
            .and_then(|_| session.inbound.commit(handle));
        if committed.is_err() {
            return false;
        }
        session.read_event.set();
        tracing::trace!(adapter, len = bytes.len(), "injected inbound packet");
        true
    }

    /// Take every packet the host has sent on the named adapter, in order.
    pub fn drain_outbound(&self, adapter: &str) -> Vec<Vec<u8>> {
        let mut state = self.inner.state.lock();
        let Some(session) = state.session_for(adapter) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        while let Some(handle) = session.outbound.pop() {
            if let Ok(bytes) = session.outbound.bytes(handle) {
                out.push(bytes.to_vec());
            }
            let _ = session.outbound.release(handle);
        }
        out
    }

    /// Simulate surprise removal: the session reports end of file from now
    /// on and its waiters are woken.
    pub fn fail_session(&self, adapter: &str) -> bool {
        let mut state = self.inner.state.lock();
        let Some(session) = state.session_for(adapter) else {
            return false;
        };
        session.failed = true;
        session.read_event.set();
        drop(state);
        self.log(LogLevel::Error, format!("{adapter}: adapter removed"));
        true
    }

    /// Contract violations recorded so far.
    pub fn violations(&self) -> Vec<Violation> {
        self.inner.violations.lock().clone()
    }

    /// Lifecycle calls received so far.
    pub fn calls(&self) -> Vec<Call> {
        self.inner.state.lock().calls.clone()
    }

    pub fn adapter_exists(&self, name: &str) -> bool {
        self.inner.state.lock().device_id(name).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.inner.state.lock().sessions.len()
    }

    pub fn is_installed(&self) -> bool {
        self.inner.state.lock().installed
    }

    /// Packets received by the host and not yet released, across sessions.
    pub fn outstanding_packets(&self) -> usize {
        self.inner
            .state
            .lock()
            .sessions
            .values()
            .map(|s| s.inbound.count(SlotState::Delivered))
            .sum()
    }

    fn log(&self, level: LogLevel, message: String) {
        let sink = self.inner.logger.read().clone();
        if let Some(sink) = sink {
            sink(&LogRecord::new(level, message));
        }
    }

    fn violation(&self, op: &'static str, detail: String) {
        tracing::warn!(op, %detail, "driver contract violation");
        self.inner.violations.lock().push(Violation { op, detail });
    }
}

impl std::fmt::Debug for MemDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MemDriver")
            .field("installed", &state.installed)
            .field("devices", &state.devices.len())
            .field("sessions", &state.sessions.len())
            .finish()
    }
}

impl Driver for MemDriver {
    type Adapter = MemAdapter;
    type Session = MemSession;
    type Event = Signal;

    fn capacity_bounds(&self) -> CapacityBounds {
        MEM_CAPACITY_BOUNDS
    }

    fn create_adapter(
        &self,
        name: &str,
        tunnel_type: &str,
        requested_guid: Option<Guid>,
    ) -> TunResult<MemAdapter> {
        let mut state = self.inner.state.lock();
        if state.device_id(name).is_some() {
            drop(state);
            self.log(LogLevel::Error, format!("{name}: adapter already exists"));
            return Err(TunError::driver(format!("adapter {name} already exists")));
        }
        if let Some(guid) = requested_guid {
            if state.devices.values().any(|d| d.guid == Some(guid)) {
                return Err(TunError::driver(format!("adapter GUID {guid} in use")));
            }
        }

        state.installed = true;
        state.next_index += 1;
        let device = state.next_id();
        let luid = Luid::from_parts(state.next_index, Luid::IF_TYPE_PROP_VIRTUAL);
        state.devices.insert(
            device,
            Device {
                name: name.to_owned(),
                luid,
                guid: requested_guid,
                handles: 1,
                session: None,
            },
        );
        let handle = state.next_id();
        state.adapters.insert(
            handle,
            AdapterEntry {
                device,
                created: true,
            },
        );
        state.calls.push(Call::CreateAdapter(name.to_owned()));
        drop(state);

        self.log(
            LogLevel::Info,
            format!("{name}: created adapter of type {tunnel_type}"),
        );
        Ok(MemAdapter(handle))
    }

    fn open_adapter(&self, name: &str) -> TunResult<MemAdapter> {
        let mut state = self.inner.state.lock();
        let device = state
            .device_id(name)
            .ok_or_else(|| TunError::not_found(name))?;
        if let Some(d) = state.devices.get_mut(&device) {
            d.handles += 1;
        }
        let handle = state.next_id();
        state.adapters.insert(
            handle,
            AdapterEntry {
                device,
                created: false,
            },
        );
        state.calls.push(Call::OpenAdapter(name.to_owned()));
        Ok(MemAdapter(handle))
    }

    unsafe fn close_adapter(&self, adapter: MemAdapter) {
        let mut state = self.inner.state.lock();
        let Some(entry) = state.adapters.remove(&adapter.0) else {
            drop(state);
            self.violation("close_adapter", format!("unknown adapter {:?}", adapter));
            return;
        };
        let name = state.device_name(entry.device);
        state.calls.push(Call::CloseAdapter(name.clone()));

        let mut remove = entry.created;
        let mut active_session = false;
        if let Some(device) = state.devices.get_mut(&entry.device) {
            device.handles -= 1;
            remove |= device.handles == 0;
            active_session = device.session.is_some();
        }
        if remove && !active_session {
            state.devices.remove(&entry.device);
        }
        drop(state);

        if active_session {
            self.violation(
                "close_adapter",
                format!("{name}: closed while a session is active"),
            );
        } else if remove {
            self.log(LogLevel::Info, format!("{name}: removed adapter"));
        }
    }

    fn adapter_luid(&self, adapter: MemAdapter) -> Luid {
        let state = self.inner.state.lock();
        state
            .adapters
            .get(&adapter.0)
            .and_then(|a| state.devices.get(&a.device))
            .map(|d| d.luid)
            .unwrap_or_default()
    }

    fn running_driver_version(&self) -> TunResult<DriverVersion> {
        let state = self.inner.state.lock();
        if !state.installed {
            return Err(TunError::driver("driver is not loaded"));
        }
        Ok(state.version)
    }

    fn delete_driver(&self) -> TunResult<()> {
        let mut state = self.inner.state.lock();
        state.calls.push(Call::DeleteDriver);
        if !state.sessions.is_empty() {
            drop(state);
            self.violation("delete_driver", "sessions still active".to_owned());
            return Err(TunError::driver("driver is in use"));
        }
        if !state.devices.is_empty() {
            return Err(TunError::driver(format!(
                "driver is in use by {} adapter(s)",
                state.devices.len()
            )));
        }
        state.installed = false;
        drop(state);
        self.log(LogLevel::Info, "driver removed".to_owned());
        Ok(())
    }

    fn set_logger(&self, sink: Option<LogSink>) {
        *self.inner.logger.write() = sink;
    }

    fn start_session(&self, adapter: MemAdapter, capacity: u32) -> TunResult<MemSession> {
        let capacity = MEM_CAPACITY_BOUNDS.validate(capacity)?;
        let mut state = self.inner.state.lock();
        let device = state
            .adapters
            .get(&adapter.0)
            .map(|a| a.device)
            .ok_or_else(|| TunError::driver(format!("unknown adapter {:?}", adapter)))?;
        if state.devices.get(&device).and_then(|d| d.session).is_some() {
            return Err(TunError::ContractViolation(
                "adapter already has an active session",
            ));
        }

        // Inbound and outbound rings.
        let slots = 2 * capacity as u64;
        if let Some(budget) = state.slot_budget {
            if state.slots_in_use + slots > budget {
                return Err(TunError::ResourceExhausted {
                    what: "ring memory",
                });
            }
        }
        state.slots_in_use += slots;

        let id = state.next_id();
        state.sessions.insert(
            id,
            SessionEntry {
                device,
                inbound: PacketRing::new(capacity),
                outbound: PacketRing::new(capacity),
                read_event: Signal::new(),
                failed: false,
            },
        );
        if let Some(d) = state.devices.get_mut(&device) {
            d.session = Some(id);
        }
        let name = state.device_name(device);
        state.calls.push(Call::StartSession(name.clone()));
        drop(state);

        tracing::debug!(adapter = %name, capacity, "started in-memory session");
        Ok(MemSession(id))
    }

    unsafe fn end_session(&self, session: MemSession) {
        let mut state = self.inner.state.lock();
        let Some(entry) = state.sessions.remove(&session.0) else {
            drop(state);
            self.violation("end_session", format!("unknown session {:?}", session));
            return;
        };
        state.slots_in_use -= 2 * entry.inbound.capacity() as u64;

        let name = state.device_name(entry.device);
        let mut orphaned = false;
        if let Some(device) = state.devices.get_mut(&entry.device) {
            device.session = None;
            orphaned = device.handles == 0;
        }
        // A close that arrived while the session ran is completed now.
        if orphaned {
            state.devices.remove(&entry.device);
        }
        state.calls.push(Call::EndSession(name.clone()));
        drop(state);

        // Wake anyone still holding the event.
        entry.read_event.set();

        let held = entry.inbound.count(SlotState::Delivered);
        if held > 0 {
            self.violation(
                "end_session",
                format!("{name}: ended with {held} unreleased packet(s)"),
            );
        }
        let unsent = entry.outbound.count(SlotState::Allocated);
        if unsent > 0 {
            self.violation(
                "end_session",
                format!("{name}: ended with {unsent} unsent packet(s)"),
            );
        }
    }

    fn read_wait_event(&self, session: MemSession) -> TunResult<Signal> {
        self.inner
            .state
            .lock()
            .sessions
            .get(&session.0)
            .map(|s| s.read_event.clone())
            .ok_or(TunError::SessionEnded)
    }

    fn receive_packet(&self, session: MemSession) -> TunResult<RawPacket> {
        let mut state = self.inner.state.lock();
        let entry = state
            .sessions
            .get_mut(&session.0)
            .ok_or(TunError::SessionEnded)?;
        if entry.failed {
            return Err(TunError::SessionEnded);
        }
        let Some(handle) = entry.inbound.pop() else {
            entry.read_event.reset();
            return Err(TunError::WouldBlock);
        };
        if entry.inbound.is_drained() {
            entry.read_event.reset();
        }
        let (ptr, len) = entry
            .inbound
            .buffer_ptr(handle)
            .map_err(|e| TunError::driver(e.to_string()))?;
        Ok(RawPacket::new(ptr, len).with_tag(handle.to_tag()))
    }

    unsafe fn release_receive_packet(&self, session: MemSession, packet: RawPacket) {
        let mut state = self.inner.state.lock();
        let result = match state.sessions.get_mut(&session.0) {
            None => Err("unknown session".to_owned()),
            Some(entry) => entry
                .inbound
                .resolve(lent_slot(&packet), packet.as_ptr(), SlotState::Delivered)
                .and_then(|handle| entry.inbound.release(handle))
                .map_err(|e| format!("{:p} is not a received packet: {e}", packet.as_ptr())),
        };
        drop(state);
        if let Err(detail) = result {
            self.violation("release_receive_packet", detail);
        }
    }

    fn allocate_send_packet(&self, session: MemSession, size: u32) -> TunResult<RawPacket> {
        let size = tunring_core::validate_packet_size(size as usize)?;
        let mut state = self.inner.state.lock();
        let entry = state
            .sessions
            .get_mut(&session.0)
            .ok_or(TunError::SessionEnded)?;
        if entry.failed {
            return Err(TunError::SessionEnded);
        }
        let handle = entry.outbound.alloc(size as usize).map_err(|e| match e {
            RingError::Full => TunError::ResourceExhausted { what: "send ring" },
            other => TunError::driver(other.to_string()),
        })?;
        let (ptr, len) = entry
            .outbound
            .buffer_ptr(handle)
            .map_err(|e| TunError::driver(e.to_string()))?;
        Ok(RawPacket::new(ptr, len).with_tag(handle.to_tag()))
    }

    unsafe fn send_packet(&self, session: MemSession, packet: RawPacket) {
        let mut state = self.inner.state.lock();
        let result = match state.sessions.get_mut(&session.0) {
            None => Err("unknown session".to_owned()),
            Some(entry) => entry
                .outbound
                .resolve(lent_slot(&packet), packet.as_ptr(), SlotState::Allocated)
                .and_then(|handle| entry.outbound.commit(handle))
                .map_err(|e| format!("{:p} is not an allocated packet: {e}", packet.as_ptr())),
        };
        drop(state);
        if let Err(detail) = result {
            self.violation("send_packet", detail);
        }
    }
}

/// Slot a packet was lent from, as recorded in its tag.
fn lent_slot(packet: &RawPacket) -> SlotHandle {
    SlotHandle::from_tag(packet.tag())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_collision_is_driver_error() {
        let driver = MemDriver::new();
        let _a = driver.create_adapter("dup", "t", None).unwrap();
        assert!(matches!(
            driver.create_adapter("DUP", "t", None),
            Err(TunError::Driver { .. })
        ));
    }

    #[test]
    fn test_open_missing_is_not_found() {
        let driver = MemDriver::new();
        assert!(matches!(
            driver.open_adapter("nope"),
            Err(TunError::NotFound { .. })
        ));
    }

    #[test]
    fn test_close_created_removes_device() {
        let driver = MemDriver::new();
        let created = driver.create_adapter("gone", "t", None).unwrap();
        let opened = driver.open_adapter("gone").unwrap();

        unsafe { driver.close_adapter(opened) };
        assert!(driver.adapter_exists("gone"));
        unsafe { driver.close_adapter(created) };
        assert!(!driver.adapter_exists("gone"));
    }

    #[test]
    fn test_luids_are_distinct() {
        let driver = MemDriver::new();
        let a = driver.create_adapter("a", "t", None).unwrap();
        let b = driver.create_adapter("b", "t", None).unwrap();

        let (la, lb) = (driver.adapter_luid(a), driver.adapter_luid(b));
        assert_ne!(la, lb);
        assert_eq!(la.if_type(), Luid::IF_TYPE_PROP_VIRTUAL);
    }

    #[test]
    fn test_send_ring_exhaustion() {
        let driver = MemDriver::new();
        let adapter = driver.create_adapter("ex", "t", None).unwrap();
        let session = driver.start_session(adapter, 4).unwrap();

        let first = driver.allocate_send_packet(session, 100).unwrap();
        unsafe { driver.send_packet(session, first) };
        for _ in 0..3 {
            driver.allocate_send_packet(session, 100).unwrap();
        }
        assert!(matches!(
            driver.allocate_send_packet(session, 100),
            Err(TunError::ResourceExhausted { .. })
        ));
    }

    #[test]
    fn test_double_release_recorded() {
        let driver = MemDriver::new();
        let adapter = driver.create_adapter("dr", "t", None).unwrap();
        let session = driver.start_session(adapter, 4).unwrap();
        assert!(driver.inject("dr", b"x"));

        let packet = driver.receive_packet(session).unwrap();
        unsafe {
            driver.release_receive_packet(session, packet);
            driver.release_receive_packet(session, packet);
        }

        let violations = driver.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].op, "release_receive_packet");
    }

    #[test]
    fn test_stale_release_after_reuse_recorded() {
        let driver = MemDriver::new();
        let adapter = driver.create_adapter("reuse", "t", None).unwrap();
        let session = driver.start_session(adapter, 4).unwrap();

        let mut stale = None;
        for _ in 0..4 {
            assert!(driver.inject("reuse", b"x"));
            let packet = driver.receive_packet(session).unwrap();
            stale.get_or_insert(packet);
            unsafe { driver.release_receive_packet(session, packet) };
        }
        let stale = stale.unwrap();

        // The ring wrapped: slot 0 is back, in the same buffer.
        assert!(driver.inject("reuse", b"y"));
        let live = driver.receive_packet(session).unwrap();
        assert_eq!(live.as_ptr(), stale.as_ptr());
        assert_ne!(live.tag(), stale.tag());

        unsafe { driver.release_receive_packet(session, stale) };
        let violations = driver.violations();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].detail.contains("stale"));

        unsafe { driver.release_receive_packet(session, live) };
        assert_eq!(driver.violations().len(), 1);
        assert_eq!(driver.outstanding_packets(), 0);
    }

    #[test]
    fn test_second_handle_cannot_start_session() {
        let driver = MemDriver::new();
        let first = driver.create_adapter("twice", "t", None).unwrap();
        let second = driver.open_adapter("twice").unwrap();
        let _session = driver.start_session(first, 4).unwrap();

        assert!(matches!(
            driver.start_session(second, 4),
            Err(TunError::ContractViolation(_))
        ));
    }

    #[test]
    fn test_read_event_tracks_ring() {
        let driver = MemDriver::new();
        let adapter = driver.create_adapter("ev", "t", None).unwrap();
        let session = driver.start_session(adapter, 4).unwrap();
        let event = driver.read_wait_event(session).unwrap();

        assert!(!event.is_set());
        driver.inject("ev", b"1");
        assert!(event.is_set());

        let packet = driver.receive_packet(session).unwrap();
        assert!(!event.is_set());
        unsafe { driver.release_receive_packet(session, packet) };
        assert!(matches!(
            driver.receive_packet(session),
            Err(TunError::WouldBlock)
        ));
    }

    #[test]
    fn test_fail_session_is_eof() {
        let driver = MemDriver::new();
        let adapter = driver.create_adapter("eof", "t", None).unwrap();
        let session = driver.start_session(adapter, 4).unwrap();

        assert!(driver.fail_session("eof"));
        assert!(matches!(
            driver.receive_packet(session),
            Err(TunError::SessionEnded)
        ));
        assert!(matches!(
            driver.allocate_send_packet(session, 1),
            Err(TunError::SessionEnded)
        ));
    }

    #[test]
    fn test_slot_budget() {
        let driver = MemDriver::new().with_slot_budget(16);
        let adapter = driver.create_adapter("b", "t", None).unwrap();
        assert!(matches!(
            driver.start_session(adapter, 16),
            Err(TunError::ResourceExhausted { .. })
        ));
        assert!(driver.start_session(adapter, 8).is_ok());
    }

    #[test]
    fn test_delete_driver() {
        let driver = MemDriver::new();
        let adapter = driver.create_adapter("d", "t", None).unwrap();
        assert!(driver.delete_driver().is_err());

        unsafe { driver.close_adapter(adapter) };
        driver.delete_driver().unwrap();
        assert!(!driver.is_installed());
        assert!(driver.running_driver_version().is_err());
    }

    #[test]
    fn test_logger_receives_records() {
        let driver = MemDriver::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        driver.set_logger(Some(Arc::new(move |r: &LogRecord| {
            sink_seen.lock().push(r.message.clone());
        })));

        let _ = driver.create_adapter("log0", "t", None).unwrap();
        assert!(seen.lock()[0].contains("log0"));
    }
}

/// Conformance tests using tunring-testkit.
#[cfg(test)]
mod conformance_tests {
    use super::*;
    use tunring_testkit::{DriverFactory, Loopback, TestError};

    struct MemFactory;

    impl DriverFactory for MemFactory {
        type Driver = MemDriver;

        fn create() -> Result<Self::Driver, TestError> {
            Ok(MemDriver::new())
        }

        fn small_capacity() -> u32 {
            MEM_CAPACITY_BOUNDS.min
        }
    }

    impl Loopback for MemFactory {
        fn inject(driver: &MemDriver, adapter: &str, packet: &[u8]) -> bool {
            driver.inject(adapter, packet)
        }

        fn drain(driver: &MemDriver, adapter: &str) -> Vec<Vec<u8>> {
            driver.drain_outbound(adapter)
        }

        fn fail(driver: &MemDriver, adapter: &str) -> bool {
            driver.fail_session(adapter)
        }

        fn outstanding(driver: &MemDriver) -> usize {
            driver.outstanding_packets()
        }

        fn violations(driver: &MemDriver) -> usize {
            driver.violations().len()
        }
    }

    #[test]
    fn empty_receive_would_block() {
        tunring_testkit::run_empty_receive_would_block::<MemFactory>();
    }

    #[test]
    fn receive_timeout() {
        tunring_testkit::run_receive_timeout::<MemFactory>();
    }

    #[test]
    fn shutdown_unblocks_waiter() {
        tunring_testkit::run_shutdown_unblocks_waiter::<MemFactory>();
    }

    #[test]
    fn second_session_rejected() {
        tunring_testkit::run_second_session_rejected::<MemFactory>();
    }

    #[test]
    fn second_handle_session_rejected() {
        tunring_testkit::run_second_handle_session_rejected::<MemFactory>();
    }

    #[test]
    fn receive_interruptible() {
        tunring_testkit::run_receive_interruptible::<MemFactory>();
    }

    #[test]
    fn close_deferred_while_session_active() {
        tunring_testkit::run_close_deferred_while_session_active::<MemFactory>();
    }

    #[test]
    fn delete_driver_rejected_with_session() {
        tunring_testkit::run_delete_driver_rejected_with_session::<MemFactory>();
    }

    #[test]
    fn logger_replacement() {
        tunring_testkit::run_logger_replacement::<MemFactory>();
    }

    // Loopback tests (peer-driven packet flow)

    #[test]
    fn loopback_round_trip() {
        tunring_testkit::run_loopback_round_trip::<MemFactory>();
    }

    #[test]
    fn send_interruptible() {
        tunring_testkit::run_send_interruptible::<MemFactory>();
    }

    #[test]
    fn send_ring_exhaustion() {
        let count = tunring_testkit::run_send_ring_exhaustion::<MemFactory>();
        assert_eq!(count, MEM_CAPACITY_BOUNDS.min as usize);
    }

    #[test]
    fn packets_released_exactly_once() {
        tunring_testkit::run_packets_released_exactly_once::<MemFactory>();
    }

    #[test]
    fn reader_drains_ring() {
        tunring_testkit::run_reader_drains_ring::<MemFactory>();
    }

    #[test]
    fn driver_eof_is_terminal() {
        tunring_testkit::run_driver_eof_is_terminal::<MemFactory>();
    }
}
