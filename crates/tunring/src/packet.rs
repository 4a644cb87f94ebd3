//! Borrowed views into a session's rings.

use std::cell::Cell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use tunring_core::{Driver, RawPacket};

use crate::session::Session;

/// A packet taken from the receive ring.
///
/// Derefs to the packet bytes. The ring slot goes back to the driver when
/// this is dropped or [`release`](Self::release)d, exactly once.
pub struct ReceivedPacket<'s, D: Driver> {
    session: &'s Session<D>,
    raw: RawPacket,
}

impl<'s, D: Driver> ReceivedPacket<'s, D> {
    pub(crate) fn new(session: &'s Session<D>, raw: RawPacket) -> Self {
        Self { session, raw }
    }

    /// Return the slot to the driver now.
    pub fn release(self) {}
}

impl<D: Driver> Deref for ReceivedPacket<'_, D> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the packet is live until drop and never written to.
        unsafe { self.raw.as_slice() }
    }
}

impl<D: Driver> Drop for ReceivedPacket<'_, D> {
    fn drop(&mut self) {
        self.session.release_raw(self.raw);
    }
}

impl<D: Driver> std::fmt::Debug for ReceivedPacket<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceivedPacket")
            .field("len", &self.raw.len())
            .finish()
    }
}

/// A writable buffer reserved in the send ring.
///
/// Fill it through `DerefMut`, then [`send`](Self::send) it. Dropping it
/// unsent still has to hand the slot back, so the buffer is zeroed and
/// committed, and a warning is logged.
pub struct SendPacket<'s, D: Driver> {
    session: &'s Session<D>,
    raw: RawPacket,
    /// One thread fills a buffer at a time.
    _not_sync: PhantomData<Cell<()>>,
}

impl<'s, D: Driver> SendPacket<'s, D> {
    pub(crate) fn new(session: &'s Session<D>, raw: RawPacket) -> Self {
        Self {
            session,
            raw,
            _not_sync: PhantomData,
        }
    }

    /// Commit the buffer to the driver.
    pub fn send(self) {
        let (session, raw) = (self.session, self.raw);
        std::mem::forget(self);
        session.commit_raw(raw);
    }
}

impl<D: Driver> Deref for SendPacket<'_, D> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the buffer is allocated and unsent; views borrow self.
        unsafe { self.raw.as_slice() }
    }
}

impl<D: Driver> DerefMut for SendPacket<'_, D> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` makes this view unique.
        unsafe { self.raw.as_mut_slice() }
    }
}

impl<D: Driver> Drop for SendPacket<'_, D> {
    fn drop(&mut self) {
        tracing::warn!(len = self.raw.len(), "send packet dropped unsent, committing zeroed buffer");
        self.fill(0);
        self.session.discard_raw(self.raw);
    }
}

impl<D: Driver> std::fmt::Debug for SendPacket<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendPacket")
            .field("len", &self.raw.len())
            .finish()
    }
}
