//! Differential model of `PacketRing`.
//!
//! Applies an operation sequence to the real ring and to a plain queue
//! side by side, and reports the first place they disagree.

use std::collections::VecDeque;

use tunring_mem::{PacketRing, RingError, SlotHandle, SlotState};

/// Minimum ring capacity (must be power of 2).
pub const MIN_CAPACITY: u32 = 4;
/// Maximum ring capacity for fuzzing (keep small to find edge cases faster).
pub const MAX_CAPACITY: u32 = 64;

/// One step against the ring. `pick` selects among eligible slots modulo
/// their count, so every input is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingOp {
    /// Producer reserves a slot and fills it.
    Alloc { len: u16, tag: u8 },
    /// Producer publishes one of its reserved slots.
    Commit { pick: u8 },
    /// Consumer takes the next slot.
    Pop,
    /// Consumer returns one of its delivered slots.
    Release { pick: u8 },
    /// Consumer returns a slot it already returned.
    ReleaseStale { pick: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    handle: SlotHandle,
    len: usize,
    tag: u8,
    state: SlotState,
}

/// Queue model of the ring. `entries` spans tail to head.
struct Model {
    capacity: usize,
    entries: VecDeque<Entry>,
    /// Offset of the next slot to deliver, relative to the tail.
    read: usize,
    released: Vec<SlotHandle>,
}

impl Model {
    fn pick(&self, state: SlotState, pick: u8) -> Option<usize> {
        let eligible: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.state == state)
            .map(|(i, _)| i)
            .collect();
        if eligible.is_empty() {
            None
        } else {
            Some(eligible[pick as usize % eligible.len()])
        }
    }

    fn reclaim(&mut self) {
        while self.read > 0 && self.entries.front().map(|e| e.state) == Some(SlotState::Free) {
            self.entries.pop_front();
            self.read -= 1;
        }
    }

    fn count(&self, state: SlotState) -> usize {
        self.entries.iter().filter(|e| e.state == state).count()
    }
}

/// Run `ops` against a ring of roughly `capacity` slots.
pub fn execute_and_verify(capacity: u32, ops: &[RingOp]) -> Result<(), String> {
    let capacity = capacity
        .next_power_of_two()
        .clamp(MIN_CAPACITY, MAX_CAPACITY);
    let mut ring = PacketRing::new(capacity);
    let mut model = Model {
        capacity: capacity as usize,
        entries: VecDeque::new(),
        read: 0,
        released: Vec::new(),
    };

    for (i, op) in ops.iter().enumerate() {
        match *op {
            RingOp::Alloc { len, tag } => {
                let len = 1 + len as usize % 1500;
                let result = ring.alloc(len);
                if model.entries.len() >= model.capacity {
                    if result != Err(RingError::Full) {
                        return Err(format!("op {}: alloc on full ring gave {:?}", i, result));
                    }
                    continue;
                }
                let handle = result.map_err(|e| format!("op {}: alloc failed: {}", i, e))?;
                ring.write(handle, &vec![tag; len])
                    .map_err(|e| format!("op {}: write failed: {}", i, e))?;
                model.entries.push_back(Entry {
                    handle,
                    len,
                    tag,
                    state: SlotState::Allocated,
                });
            }
            RingOp::Commit { pick } => {
                let Some(idx) = model.pick(SlotState::Allocated, pick) else {
                    continue;
                };
                ring.commit(model.entries[idx].handle)
                    .map_err(|e| format!("op {}: commit failed: {}", i, e))?;
                model.entries[idx].state = SlotState::Committed;
            }
            RingOp::Pop => {
                let expected = model
                    .entries
                    .get(model.read)
                    .filter(|e| e.state == SlotState::Committed)
                    .copied();
                let popped = ring.pop();
                match (expected, popped) {
                    (None, None) => {}
                    (Some(entry), Some(handle)) => {
                        if handle != entry.handle {
                            return Err(format!(
                                "op {}: delivered {:?}, expected {:?}",
                                i, handle, entry.handle
                            ));
                        }
                        let bytes = ring
                            .bytes(handle)
                            .map_err(|e| format!("op {}: bytes failed: {}", i, e))?;
                        if bytes.len() != entry.len || bytes.iter().any(|&b| b != entry.tag) {
                            return Err(format!("op {}: payload corrupted", i));
                        }
                        model.entries[model.read].state = SlotState::Delivered;
                        model.read += 1;
                    }
                    (expected, popped) => {
                        // INVARIANT: delivery is strictly in allocation order
                        return Err(format!(
                            "op {}: pop gave {:?}, expected {:?}",
                            i,
                            popped,
                            expected.map(|e| e.handle)
                        ));
                    }
                }
            }
            RingOp::Release { pick } => {
                let Some(idx) = model.pick(SlotState::Delivered, pick) else {
                    continue;
                };
                let handle = model.entries[idx].handle;
                ring.release(handle)
                    .map_err(|e| format!("op {}: release failed: {}", i, e))?;
                model.entries[idx].state = SlotState::Free;
                model.released.push(handle);
                model.reclaim();
            }
            RingOp::ReleaseStale { pick } => {
                if model.released.is_empty() {
                    continue;
                }
                let handle = model.released[pick as usize % model.released.len()];
                // INVARIANT: a slot is returned at most once per generation
                match ring.release(handle) {
                    Err(RingError::StaleGeneration) | Err(RingError::InvalidState { .. }) => {}
                    other => {
                        return Err(format!(
                            "op {}: second release of {:?} gave {:?}",
                            i, handle, other
                        ))
                    }
                }
            }
        }

        // INVARIANT: occupancy and per-state counts match the model
        if ring.in_use() != model.entries.len() {
            return Err(format!(
                "op {}: in_use {} but model holds {}",
                i,
                ring.in_use(),
                model.entries.len()
            ));
        }
        for state in [
            SlotState::Allocated,
            SlotState::Committed,
            SlotState::Delivered,
        ] {
            if ring.count(state) != model.count(state) {
                return Err(format!(
                    "op {}: {:?} count {} but model has {}",
                    i,
                    state,
                    ring.count(state),
                    model.count(state)
                ));
            }
        }
        if ring.is_full() != (model.entries.len() >= model.capacity) {
            return Err(format!("op {}: is_full disagrees with model", i));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_delivery() {
        let ops = [
            RingOp::Alloc { len: 10, tag: 1 },
            RingOp::Alloc { len: 20, tag: 2 },
            RingOp::Commit { pick: 1 },
            // second slot is committed but the first is not, so nothing pops
            RingOp::Pop,
            RingOp::Commit { pick: 0 },
            RingOp::Pop,
            RingOp::Pop,
            RingOp::Release { pick: 1 },
            RingOp::Release { pick: 0 },
        ];
        execute_and_verify(4, &ops).unwrap();
    }

    #[test]
    fn test_fill_and_reclaim() {
        let mut ops = Vec::new();
        for tag in 0..6 {
            ops.push(RingOp::Alloc { len: 64, tag });
        }
        for _ in 0..4 {
            ops.push(RingOp::Commit { pick: 0 });
            ops.push(RingOp::Pop);
        }
        // release out of order: tail only moves once the oldest is back
        ops.push(RingOp::Release { pick: 3 });
        ops.push(RingOp::Alloc { len: 1, tag: 9 });
        ops.push(RingOp::Release { pick: 0 });
        ops.push(RingOp::Alloc { len: 1, tag: 9 });
        ops.push(RingOp::ReleaseStale { pick: 0 });
        ops.push(RingOp::ReleaseStale { pick: 1 });
        execute_and_verify(4, &ops).unwrap();
    }

    #[test]
    fn test_capacity_is_clamped() {
        execute_and_verify(0, &[RingOp::Pop]).unwrap();
        execute_and_verify(1000, &[RingOp::Alloc { len: 1, tag: 0 }]).unwrap();
    }
}
