//! The driver capability set.
//!
//! [`Driver`] mirrors the fourteen entry points exported by the adapter
//! driver one-to-one. The session manager only ever talks to a driver through
//! this trait, so a fake driver can replace the vendor binary in tests.
//!
//! Methods that hand a handle back to the driver for the last time are
//! `unsafe`: the caller promises the handle is live and never used again.
//! The safe wrappers in `tunring` uphold this with ownership.

use std::ptr::NonNull;

use crate::error::TunResult;
use crate::event::Event;
use crate::limits::CapacityBounds;
use crate::log::LogSink;
use crate::types::{DriverVersion, Guid, Luid};

/// A packet buffer inside a session ring.
///
/// Points at memory owned by the driver. It stays valid from the call that
/// produced it (receive or allocate) until the matching release or send.
/// The `tag` is opaque driver data handed back unchanged with the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPacket {
    ptr: NonNull<u8>,
    len: u32,
    tag: u64,
}

// SAFETY: RawPacket is an address plus a length. Access to the bytes is
// gated by the owning packet handle, which is not Sync.
unsafe impl Send for RawPacket {}
unsafe impl Sync for RawPacket {}

impl RawPacket {
    pub fn new(ptr: NonNull<u8>, len: u32) -> Self {
        Self { ptr, len, tag: 0 }
    }

    pub fn with_tag(self, tag: u64) -> Self {
        Self { tag, ..self }
    }

    #[inline]
    pub fn tag(&self) -> u64 {
        self.tag
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Safety
    ///
    /// The packet must not have been released or sent, and no mutable
    /// view of it may be alive for `'a`.
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        // SAFETY: guaranteed by the caller.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len as usize) }
    }

    /// # Safety
    ///
    /// The packet must be an allocated, unsent send buffer, and the returned
    /// view must be the only one alive for `'a`.
    pub unsafe fn as_mut_slice<'a>(&self) -> &'a mut [u8] {
        // SAFETY: guaranteed by the caller.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len as usize) }
    }
}

/// Capability set of a virtual network adapter driver.
pub trait Driver: Send + Sync + 'static {
    /// Adapter handle returned by create/open.
    type Adapter: Copy + Send + Sync + std::fmt::Debug + 'static;
    /// Session handle returned by start_session.
    type Session: Copy + Send + Sync + std::fmt::Debug + 'static;
    /// Wait primitive used for receive readiness and cancellation.
    type Event: Event + 'static;

    /// Ring capacities accepted by [`start_session`](Self::start_session).
    fn capacity_bounds(&self) -> CapacityBounds {
        CapacityBounds::WINTUN
    }

    /// WintunCreateAdapter.
    fn create_adapter(
        &self,
        name: &str,
        tunnel_type: &str,
        requested_guid: Option<Guid>,
    ) -> TunResult<Self::Adapter>;

    /// WintunOpenAdapter.
    fn open_adapter(&self, name: &str) -> TunResult<Self::Adapter>;

    /// WintunCloseAdapter.
    ///
    /// # Safety
    ///
    /// `adapter` must be live, must have no running session, and must not
    /// be used again.
    unsafe fn close_adapter(&self, adapter: Self::Adapter);

    /// WintunGetAdapterLUID.
    fn adapter_luid(&self, adapter: Self::Adapter) -> Luid;

    /// WintunGetRunningDriverVersion.
    fn running_driver_version(&self) -> TunResult<DriverVersion>;

    /// WintunDeleteDriver.
    fn delete_driver(&self) -> TunResult<()>;

    /// WintunSetLogger. `None` silences the driver.
    fn set_logger(&self, sink: Option<LogSink>);

    /// WintunStartSession.
    fn start_session(&self, adapter: Self::Adapter, capacity: u32) -> TunResult<Self::Session>;

    /// WintunEndSession.
    ///
    /// # Safety
    ///
    /// `session` must be live, every received packet must have been
    /// released, and the handle must not be used again.
    unsafe fn end_session(&self, session: Self::Session);

    /// WintunGetReadWaitEvent. The event belongs to the session and is only
    /// valid until it ends.
    fn read_wait_event(&self, session: Self::Session) -> TunResult<Self::Event>;

    /// WintunReceivePacket. Never blocks: an empty ring is `WouldBlock`.
    fn receive_packet(&self, session: Self::Session) -> TunResult<RawPacket>;

    /// WintunReleaseReceivePacket.
    ///
    /// # Safety
    ///
    /// `packet` must come from `receive_packet` on this session and must be
    /// released exactly once.
    unsafe fn release_receive_packet(&self, session: Self::Session, packet: RawPacket);

    /// WintunAllocateSendPacket. A full ring is `ResourceExhausted`.
    fn allocate_send_packet(&self, session: Self::Session, size: u32) -> TunResult<RawPacket>;

    /// WintunSendPacket.
    ///
    /// # Safety
    ///
    /// `packet` must come from `allocate_send_packet` on this session and
    /// must be sent exactly once.
    unsafe fn send_packet(&self, session: Self::Session, packet: RawPacket);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_packet_views() {
        let mut buf = [1u8, 2, 3, 4];
        let ptr = NonNull::new(buf.as_mut_ptr()).unwrap();
        let packet = RawPacket::new(ptr, 3);

        assert_eq!(packet.len(), 3);
        assert!(!packet.is_empty());
        assert_eq!(packet.tag(), 0);
        assert_eq!(packet.with_tag(7).tag(), 7);
        assert_ne!(packet.with_tag(7), packet);
        unsafe {
            packet.as_mut_slice()[0] = 9;
            assert_eq!(packet.as_slice(), &[9, 2, 3]);
        }
    }
}
