//! Differential model of a session over the in-memory driver.
//!
//! Drives a real `Session<MemDriver>` through an operation sequence while
//! tracking what both rings should contain, and checks every result,
//! payload and counter against that expectation.

use std::collections::VecDeque;

use tunring::{
    AdapterConfig, Logger, ManagerConfig, ReceivedPacket, SendPacket, SessionConfig,
    SessionManager, TunError,
};
use tunring_mem::{MemDriver, MEM_CAPACITY_BOUNDS};

const ADAPTER: &str = "fuzz0";

/// One step against the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOp {
    /// Peer queues an inbound packet.
    Inject { len: u16, tag: u8 },
    /// Host takes the next packet and holds it.
    Receive,
    /// Host drops one of the packets it holds.
    ReleaseHeld { pick: u8 },
    /// Host copies the next packet out.
    RecvInto { buf_len: u16 },
    /// Host sends a packet in one call.
    Send { len: u16, tag: u8 },
    /// Host reserves a send buffer and holds it.
    Allocate { len: u16, tag: u8 },
    /// Host sends one of its held buffers.
    SendHeld { pick: u8 },
    /// Host drops one of its held buffers unsent.
    DropHeld { pick: u8 },
    /// Peer takes everything the host has sent.
    Drain,
    /// Host shuts the session down.
    Shutdown,
}

#[derive(Debug, PartialEq, Eq)]
enum In {
    Queued,
    Held(u64),
    Released,
}

#[derive(Debug, PartialEq, Eq)]
enum Out {
    Held(u64),
    Committed,
}

struct Model {
    capacity: usize,
    /// Inbound slots from tail to head with their payloads.
    inbound: VecDeque<(Vec<u8>, In)>,
    /// Offset of the next inbound slot to deliver.
    read: usize,
    /// Outbound slots from tail to head. The peer drains eagerly, so the
    /// tail is always the next slot to drain.
    outbound: VecDeque<(Vec<u8>, Out)>,
    shut_down: bool,
    received: u64,
    sent: u64,
    ring_full: u64,
    next_id: u64,
}

impl Model {
    fn id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn reclaim_inbound(&mut self) {
        while self.read > 0 && matches!(self.inbound.front(), Some((_, In::Released))) {
            self.inbound.pop_front();
            self.read -= 1;
        }
    }

    /// Deliver the next queued inbound payload.
    fn deliver(&mut self, state: In) -> Option<Vec<u8>> {
        let (bytes, slot) = self.inbound.get_mut(self.read)?;
        *slot = state;
        self.read += 1;
        Some(bytes.clone())
    }

    fn out_index(&self, id: u64) -> Option<usize> {
        self.outbound
            .iter()
            .position(|(_, s)| *s == Out::Held(id))
    }
}

fn payload(len: u16, tag: u8) -> Vec<u8> {
    vec![tag; 1 + len as usize % 1500]
}

fn expect_err<T>(i: usize, what: &str, result: Result<T, TunError>, want: fn(&TunError) -> bool) -> Result<(), String> {
    match result {
        Err(e) if want(&e) => Ok(()),
        Err(e) => Err(format!("op {}: {} failed with {}", i, what, e)),
        Ok(_) => Err(format!("op {}: {} unexpectedly succeeded", i, what)),
    }
}

fn ended(e: &TunError) -> bool {
    matches!(e, TunError::SessionEnded)
}

/// Run `ops` on a fresh session whose rings hold `capacity` packets.
pub fn execute_and_verify(capacity: u32, ops: &[SessionOp]) -> Result<(), String> {
    let capacity = capacity
        .next_power_of_two()
        .clamp(MEM_CAPACITY_BOUNDS.min, 64);
    let manager = SessionManager::with_config(
        MemDriver::new(),
        ManagerConfig::default().with_logger(Logger::Disabled),
    );
    let adapter = manager
        .create_adapter(&AdapterConfig::new(ADAPTER))
        .map_err(|e| format!("setup: {}", e))?;
    let session = adapter
        .start_session(&SessionConfig::default().with_ring_capacity(capacity))
        .map_err(|e| format!("setup: {}", e))?;
    let peer = manager.driver();

    let mut model = Model {
        capacity: capacity as usize,
        inbound: VecDeque::new(),
        read: 0,
        outbound: VecDeque::new(),
        shut_down: false,
        received: 0,
        sent: 0,
        ring_full: 0,
        next_id: 0,
    };
    let mut held_in: Vec<(u64, ReceivedPacket<'_, MemDriver>)> = Vec::new();
    let mut held_out: Vec<(u64, SendPacket<'_, MemDriver>)> = Vec::new();

    for (i, op) in ops.iter().enumerate() {
        match *op {
            SessionOp::Inject { len, tag } => {
                let bytes = payload(len, tag);
                let accepted = peer.inject(ADAPTER, &bytes);
                let room = model.inbound.len() < model.capacity;
                if accepted != room {
                    return Err(format!(
                        "op {}: inject returned {} with {} of {} slots used",
                        i,
                        accepted,
                        model.inbound.len(),
                        model.capacity
                    ));
                }
                if accepted {
                    model.inbound.push_back((bytes, In::Queued));
                }
            }
            SessionOp::Receive => {
                let result = session.try_receive();
                if model.shut_down {
                    expect_err(i, "receive after shutdown", result, ended)?;
                    continue;
                }
                let id = model.id();
                match (model.deliver(In::Held(id)), result) {
                    (None, Err(TunError::WouldBlock)) => {}
                    (Some(expected), Ok(packet)) => {
                        if *packet != expected[..] {
                            return Err(format!("op {}: received wrong payload", i));
                        }
                        model.received += 1;
                        held_in.push((id, packet));
                    }
                    (expected, Err(e)) => {
                        return Err(format!(
                            "op {}: receive failed with {} (expected packet: {})",
                            i,
                            e,
                            expected.is_some()
                        ))
                    }
                    (None, Ok(_)) => {
                        return Err(format!("op {}: received from an empty ring", i))
                    }
                }
            }
            SessionOp::ReleaseHeld { pick } => {
                if held_in.is_empty() {
                    continue;
                }
                let (id, packet) = held_in.remove(pick as usize % held_in.len());
                drop(packet);
                let slot = model
                    .inbound
                    .iter_mut()
                    .find(|(_, s)| *s == In::Held(id))
                    .ok_or_else(|| format!("op {}: held packet missing from model", i))?;
                slot.1 = In::Released;
                model.reclaim_inbound();
            }
            SessionOp::RecvInto { buf_len } => {
                let mut buf = vec![0u8; buf_len as usize % 1600];
                let result = session.try_recv_into(&mut buf);
                if model.shut_down {
                    expect_err(i, "recv_into after shutdown", result, ended)?;
                    continue;
                }
                match model.deliver(In::Released) {
                    None => expect_err(i, "recv_into on empty ring", result, |e| {
                        matches!(e, TunError::WouldBlock)
                    })?,
                    Some(expected) => {
                        model.received += 1;
                        if buf.len() < expected.len() {
                            expect_err(i, "short recv_into", result, |e| {
                                matches!(e, TunError::InvalidArgument(_))
                            })?;
                        } else {
                            let n = result.map_err(|e| format!("op {}: recv_into: {}", i, e))?;
                            if buf[..n] != expected[..] {
                                return Err(format!("op {}: recv_into copied wrong bytes", i));
                            }
                        }
                        model.reclaim_inbound();
                    }
                }
            }
            SessionOp::Send { len, tag } => {
                let bytes = payload(len, tag);
                let result = session.try_send(&bytes);
                if model.shut_down {
                    expect_err(i, "send after shutdown", result, ended)?;
                } else if model.outbound.len() >= model.capacity {
                    model.ring_full += 1;
                    expect_err(i, "send on full ring", result, |e| {
                        matches!(e, TunError::ResourceExhausted { .. })
                    })?;
                } else {
                    result.map_err(|e| format!("op {}: send: {}", i, e))?;
                    model.sent += 1;
                    model.outbound.push_back((bytes, Out::Committed));
                }
            }
            SessionOp::Allocate { len, tag } => {
                let bytes = payload(len, tag);
                let result = session.allocate_send_packet(bytes.len());
                if model.shut_down {
                    expect_err(i, "allocate after shutdown", result, ended)?;
                } else if model.outbound.len() >= model.capacity {
                    model.ring_full += 1;
                    expect_err(i, "allocate on full ring", result, |e| {
                        matches!(e, TunError::ResourceExhausted { .. })
                    })?;
                } else {
                    let mut packet = result.map_err(|e| format!("op {}: allocate: {}", i, e))?;
                    if packet.iter().any(|&b| b != 0) {
                        return Err(format!("op {}: send buffer not zeroed", i));
                    }
                    packet.copy_from_slice(&bytes);
                    let id = model.id();
                    model.outbound.push_back((bytes, Out::Held(id)));
                    held_out.push((id, packet));
                }
            }
            SessionOp::SendHeld { pick } | SessionOp::DropHeld { pick } => {
                if held_out.is_empty() {
                    continue;
                }
                let (id, packet) = held_out.remove(pick as usize % held_out.len());
                let idx = model
                    .out_index(id)
                    .ok_or_else(|| format!("op {}: held buffer missing from model", i))?;
                if matches!(op, SessionOp::SendHeld { .. }) {
                    packet.send();
                    model.sent += 1;
                } else {
                    // INVARIANT: an abandoned buffer goes out zeroed, not stale
                    drop(packet);
                    model.outbound[idx].0.fill(0);
                }
                model.outbound[idx].1 = Out::Committed;
            }
            SessionOp::Drain => {
                let drained = peer.drain_outbound(ADAPTER);
                let mut expected = Vec::new();
                while matches!(model.outbound.front(), Some((_, Out::Committed))) {
                    if let Some((bytes, _)) = model.outbound.pop_front() {
                        expected.push(bytes);
                    }
                }
                // INVARIANT: the peer sees packets in allocation order
                if drained != expected {
                    return Err(format!(
                        "op {}: peer drained {} packets, expected {}",
                        i,
                        drained.len(),
                        expected.len()
                    ));
                }
            }
            SessionOp::Shutdown => {
                session.shutdown();
                model.shut_down = true;
            }
        }

        let stats = session.stats();
        if stats.packets_received != model.received
            || stats.packets_sent != model.sent
            || stats.send_ring_full != model.ring_full
        {
            return Err(format!("op {}: stats {:?} diverged from model", i, stats));
        }
        if peer.outstanding_packets() != held_in.len() {
            return Err(format!(
                "op {}: driver holds {} packets, host holds {}",
                i,
                peer.outstanding_packets(),
                held_in.len()
            ));
        }
    }

    drop(held_in);
    drop(held_out);
    session.end();
    drop(adapter);

    // INVARIANT: nothing the host did was a misuse of the driver
    let violations = manager.driver().violations();
    if !violations.is_empty() {
        return Err(format!("driver violations: {:?}", violations));
    }
    if manager.driver().adapter_exists(ADAPTER) {
        return Err("adapter survived its last handle".into());
    }
    Ok(())
}
