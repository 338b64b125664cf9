//! Counters kept by a running bus.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a bus's traffic.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BusStats {
    /// Messages handed to the transport.
    pub sent: u64,
    /// Messages received and decoded.
    pub received: u64,
    /// Receive-side failures (undecodable payloads, transport errors).
    pub failed: u64,
    /// Client-acknowledged deliveries settled.
    pub acknowledged: u64,
    /// Requests still awaiting responses.
    pub pending_requests: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    failed: AtomicU64,
    acknowledged: AtomicU64,
}

impl Counters {
    pub(crate) fn sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn acknowledged(&self) {
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, pending_requests: usize) -> BusStats {
        BusStats {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            pending_requests,
        }
    }
}
