//! Fixed-capacity packet ring with generation-checked slots.
//!
//! One producer reserves slots in order (`alloc`), fills and commits them.
//! One consumer takes committed slots in the same order (`pop`) and releases
//! them, possibly out of order. A slot only becomes reusable once every
//! older slot has been released, so the ring behaves like the driver's:
//! a single unreleased packet eventually stalls the producer.
//!
//! ```text
//!   tail            read              head
//!    |  Delivered    |  Committed /    |  Free ...
//!    |  or Free      |  Allocated      |
//! ```
//!
//! Indices are monotonic `u64`s masked by the capacity.

use std::ptr::NonNull;

/// Lifecycle of a ring slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    /// Reserved by the producer, being filled.
    Allocated,
    /// Filled and visible to the consumer.
    Committed,
    /// Handed to the consumer, awaiting release.
    Delivered,
}

/// Identifies one use of a slot. The generation changes every time the slot
/// is reallocated, so a handle from an earlier use is detected as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    pub index: u32,
    pub generation: u32,
}

impl SlotHandle {
    /// Pack into the opaque tag a `RawPacket` carries.
    pub fn to_tag(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_tag(tag: u64) -> Self {
        Self {
            index: tag as u32,
            generation: (tag >> 32) as u32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    Full,
    InvalidIndex,
    StaleGeneration,
    /// The handle is live but the pointer is not its buffer.
    PointerMismatch,
    InvalidState {
        expected: SlotState,
        found: SlotState,
    },
}

impl std::fmt::Display for RingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RingError::Full => write!(f, "ring full"),
            RingError::InvalidIndex => write!(f, "slot index out of range"),
            RingError::StaleGeneration => write!(f, "stale slot generation"),
            RingError::PointerMismatch => write!(f, "pointer does not match slot buffer"),
            RingError::InvalidState { expected, found } => {
                write!(f, "slot is {:?}, expected {:?}", found, expected)
            }
        }
    }
}

impl std::error::Error for RingError {}

struct Slot {
    state: SlotState,
    generation: u32,
    buf: Vec<u8>,
}

pub struct PacketRing {
    slots: Vec<Slot>,
    /// Next slot to allocate.
    head: u64,
    /// Next slot to deliver.
    read: u64,
    /// Oldest slot not yet released.
    tail: u64,
}

impl PacketRing {
    /// Create a ring with `capacity` slots.
    ///
    /// # Panics
    /// Panics if capacity is not a power of 2.
    pub fn new(capacity: u32) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be power of 2");
        Self {
            slots: (0..capacity)
                .map(|_| Slot {
                    state: SlotState::Free,
                    generation: 0,
                    buf: Vec::new(),
                })
                .collect(),
            head: 0,
            read: 0,
            tail: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    #[inline]
    fn mask(&self) -> u64 {
        self.slots.len() as u64 - 1
    }

    /// Slots between the oldest unreleased one and the next allocation.
    #[inline]
    pub fn in_use(&self) -> usize {
        (self.head - self.tail) as usize
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.in_use() >= self.slots.len()
    }

    /// True when no committed packet is waiting for the consumer.
    pub fn is_drained(&self) -> bool {
        self.read == self.head || self.slot_at(self.read).state != SlotState::Committed
    }

    /// Reserve the next slot with a zeroed buffer of `len` bytes.
    pub fn alloc(&mut self, len: usize) -> Result<SlotHandle, RingError> {
        if self.is_full() {
            return Err(RingError::Full);
        }
        let index = (self.head & self.mask()) as u32;
        let slot = &mut self.slots[index as usize];
        if slot.state != SlotState::Free {
            return Err(RingError::InvalidState {
                expected: SlotState::Free,
                found: slot.state,
            });
        }
        slot.state = SlotState::Allocated;
        slot.generation = slot.generation.wrapping_add(1);
        slot.buf.clear();
        slot.buf.resize(len, 0);
        self.head += 1;
        Ok(SlotHandle {
            index,
            generation: slot.generation,
        })
    }

    /// Make an allocated slot visible to the consumer.
    pub fn commit(&mut self, handle: SlotHandle) -> Result<(), RingError> {
        self.transition(handle, SlotState::Allocated, SlotState::Committed)
    }

    /// Take the oldest committed slot, if it is next in order.
    pub fn pop(&mut self) -> Option<SlotHandle> {
        if self.is_drained() {
            return None;
        }
        let index = (self.read & self.mask()) as u32;
        let slot = &mut self.slots[index as usize];
        slot.state = SlotState::Delivered;
        self.read += 1;
        Some(SlotHandle {
            index,
            generation: slot.generation,
        })
    }

    /// Return a delivered slot and reclaim every released slot at the tail.
    pub fn release(&mut self, handle: SlotHandle) -> Result<(), RingError> {
        self.transition(handle, SlotState::Delivered, SlotState::Free)?;
        while self.tail < self.read && self.slot_at(self.tail).state == SlotState::Free {
            self.tail += 1;
        }
        Ok(())
    }

    /// Copy `data` into an allocated slot, truncating to its length.
    pub fn write(&mut self, handle: SlotHandle, data: &[u8]) -> Result<(), RingError> {
        let slot = self.check(handle, SlotState::Allocated)?;
        let n = data.len().min(slot.buf.len());
        slot.buf[..n].copy_from_slice(&data[..n]);
        Ok(())
    }

    /// Bytes of a slot that has not been freed.
    pub fn bytes(&self, handle: SlotHandle) -> Result<&[u8], RingError> {
        self.validate(handle)?;
        let slot = &self.slots[handle.index as usize];
        if slot.state == SlotState::Free {
            return Err(RingError::InvalidState {
                expected: SlotState::Delivered,
                found: SlotState::Free,
            });
        }
        Ok(&slot.buf)
    }

    /// Stable pointer to the slot's buffer. Valid until the slot is freed.
    pub fn buffer_ptr(&mut self, handle: SlotHandle) -> Result<(NonNull<u8>, u32), RingError> {
        self.validate(handle)?;
        let slot = &mut self.slots[handle.index as usize];
        let len = slot.buf.len() as u32;
        let ptr = NonNull::new(slot.buf.as_mut_ptr()).ok_or(RingError::InvalidIndex)?;
        Ok((ptr, len))
    }

    /// Check that `handle` is the current use of its slot, is in `state`,
    /// and owns the buffer at `ptr`.
    pub fn resolve(
        &self,
        handle: SlotHandle,
        ptr: *const u8,
        state: SlotState,
    ) -> Result<SlotHandle, RingError> {
        self.validate(handle)?;
        let slot = &self.slots[handle.index as usize];
        if slot.state != state {
            return Err(RingError::InvalidState {
                expected: state,
                found: slot.state,
            });
        }
        if slot.buf.as_ptr() != ptr {
            return Err(RingError::PointerMismatch);
        }
        Ok(handle)
    }

    pub fn get_state(&self, index: u32) -> Option<SlotState> {
        self.slots.get(index as usize).map(|s| s.state)
    }

    pub fn get_generation(&self, index: u32) -> Option<u32> {
        self.slots.get(index as usize).map(|s| s.generation)
    }

    pub fn count(&self, state: SlotState) -> usize {
        self.slots.iter().filter(|s| s.state == state).count()
    }

    fn slot_at(&self, pos: u64) -> &Slot {
        &self.slots[(pos & self.mask()) as usize]
    }

    fn validate(&self, handle: SlotHandle) -> Result<(), RingError> {
        let slot = self
            .slots
            .get(handle.index as usize)
            .ok_or(RingError::InvalidIndex)?;
        if slot.generation != handle.generation {
            return Err(RingError::StaleGeneration);
        }
        Ok(())
    }

    fn check(&mut self, handle: SlotHandle, expected: SlotState) -> Result<&mut Slot, RingError> {
        self.validate(handle)?;
        let slot = &mut self.slots[handle.index as usize];
        if slot.state != expected {
            return Err(RingError::InvalidState {
                expected,
                found: slot.state,
            });
        }
        Ok(slot)
    }

    fn transition(
        &mut self,
        handle: SlotHandle,
        from: SlotState,
        to: SlotState,
    ) -> Result<(), RingError> {
        self.check(handle, from)?.state = to;
        Ok(())
    }
}

impl std::fmt::Debug for PacketRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketRing")
            .field("capacity", &self.capacity())
            .field("head", &self.head)
            .field("read", &self.read)
            .field("tail", &self.tail)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(ring: &mut PacketRing, data: &[u8]) -> SlotHandle {
        let h = ring.alloc(data.len()).unwrap();
        ring.write(h, data).unwrap();
        ring.commit(h).unwrap();
        h
    }

    #[test]
    fn test_fifo_order() {
        let mut ring = PacketRing::new(4);
        push(&mut ring, b"one");
        push(&mut ring, b"two");

        let a = ring.pop().unwrap();
        assert_eq!(ring.bytes(a).unwrap(), b"one");
        let b = ring.pop().unwrap();
        assert_eq!(ring.bytes(b).unwrap(), b"two");
        assert!(ring.pop().is_none());
    }

    #[test]
    fn test_full_until_tail_released() {
        let mut ring = PacketRing::new(4);
        let handles: Vec<_> = (0..4u8).map(|i| push(&mut ring, &[i])).collect();
        assert_eq!(ring.alloc(1), Err(RingError::Full));

        let delivered: Vec<_> = (0..4).map(|_| ring.pop().unwrap()).collect();
        assert_eq!(delivered, handles);

        // Releasing a newer slot does not free space while the oldest is held.
        ring.release(delivered[1]).unwrap();
        assert_eq!(ring.alloc(1), Err(RingError::Full));

        ring.release(delivered[0]).unwrap();
        assert_eq!(ring.in_use(), 2);
        assert!(ring.alloc(1).is_ok());
    }

    #[test]
    fn test_uncommitted_blocks_delivery() {
        let mut ring = PacketRing::new(4);
        let first = ring.alloc(1).unwrap();
        push(&mut ring, b"x");

        assert!(ring.pop().is_none());
        ring.commit(first).unwrap();
        assert_eq!(ring.pop(), Some(first));
        assert!(ring.pop().is_some());
    }

    #[test]
    fn test_double_release_detected() {
        let mut ring = PacketRing::new(4);
        push(&mut ring, b"x");
        let h = ring.pop().unwrap();

        ring.release(h).unwrap();
        assert_eq!(
            ring.release(h),
            Err(RingError::InvalidState {
                expected: SlotState::Delivered,
                found: SlotState::Free,
            })
        );
    }

    #[test]
    fn test_stale_generation_detected() {
        let mut ring = PacketRing::new(4);
        for _ in 0..4 {
            push(&mut ring, b"x");
            let h = ring.pop().unwrap();
            ring.release(h).unwrap();
        }
        // Slot 0 has been reused once the ring wrapped.
        let h = push(&mut ring, b"y");
        assert_eq!(h.index, 0);
        assert_eq!(h.generation, 2);

        let stale = SlotHandle {
            index: 0,
            generation: 1,
        };
        assert_eq!(ring.commit(stale), Err(RingError::StaleGeneration));
    }

    #[test]
    fn test_resolve_by_pointer() {
        let mut ring = PacketRing::new(4);
        push(&mut ring, b"abc");
        let h = ring.pop().unwrap();
        let (ptr, len) = ring.buffer_ptr(h).unwrap();

        assert_eq!(len, 3);
        assert_eq!(SlotHandle::from_tag(h.to_tag()), h);
        assert_eq!(ring.resolve(h, ptr.as_ptr(), SlotState::Delivered), Ok(h));
        assert!(matches!(
            ring.resolve(h, ptr.as_ptr(), SlotState::Allocated),
            Err(RingError::InvalidState { .. })
        ));
        assert_eq!(
            ring.resolve(h, ptr.as_ptr().wrapping_add(1), SlotState::Delivered),
            Err(RingError::PointerMismatch)
        );
    }

    #[test]
    fn test_reused_buffer_rejects_old_handle() {
        let mut ring = PacketRing::new(1);
        push(&mut ring, b"old");
        let old = ring.pop().unwrap();
        let (old_ptr, _) = ring.buffer_ptr(old).unwrap();
        ring.release(old).unwrap();

        // Same slot, same allocation, next generation.
        push(&mut ring, b"new");
        let new = ring.pop().unwrap();
        let (new_ptr, _) = ring.buffer_ptr(new).unwrap();
        assert_eq!(new.index, old.index);
        assert_eq!(new_ptr, old_ptr);

        assert_eq!(
            ring.resolve(old, old_ptr.as_ptr(), SlotState::Delivered),
            Err(RingError::StaleGeneration)
        );
        assert_eq!(ring.resolve(new, new_ptr.as_ptr(), SlotState::Delivered), Ok(new));
    }
}
