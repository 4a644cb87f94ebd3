//! Per-session traffic counters.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct Counters {
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_ring_full: AtomicU64,
}

impl Counters {
    pub(crate) fn record_received(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_ring_full(&self) {
        self.send_ring_full.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> SessionStats {
        SessionStats {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_ring_full: self.send_ring_full.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a session's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    /// Allocations refused because the send ring was full.
    pub send_ring_full: u64,
}

impl SessionStats {
    /// Counter growth since `earlier`.
    pub fn delta(&self, earlier: &SessionStats) -> SessionStats {
        SessionStats {
            packets_received: self.packets_received.saturating_sub(earlier.packets_received),
            bytes_received: self.bytes_received.saturating_sub(earlier.bytes_received),
            packets_sent: self.packets_sent.saturating_sub(earlier.packets_sent),
            bytes_sent: self.bytes_sent.saturating_sub(earlier.bytes_sent),
            send_ring_full: self.send_ring_full.saturating_sub(earlier.send_ring_full),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_delta() {
        let counters = Counters::default();
        counters.record_received(100);
        let before = counters.snapshot();

        counters.record_received(20);
        counters.record_sent(60);
        counters.record_ring_full();
        let after = counters.snapshot();

        assert_eq!(after.bytes_received, 120);
        let delta = after.delta(&before);
        assert_eq!(delta.packets_received, 1);
        assert_eq!(delta.bytes_received, 20);
        assert_eq!(delta.bytes_sent, 60);
        assert_eq!(delta.send_ring_full, 1);
    }
}
