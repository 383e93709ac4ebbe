//! Observability counters.
//!
//! The runtime exposes per-flow and per-channel counters through these
//! structs; how they leave the process (scrape, push, log line) is the
//! embedder's business. The runtime itself only logs a snapshot per flow at
//! shutdown.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters owned by one flow.
#[derive(Debug, Default)]
pub struct FlowMetrics {
    records_in: AtomicU64,
    records_dropped: AtomicU64,
    records_written: AtomicU64,
}

impl FlowMetrics {
    /// A raw line was read from the input.
    pub fn record_in(&self) {
        self.records_in.fetch_add(1, Ordering::Relaxed);
    }

    /// A record was dropped by a filter, parser or format before reaching
    /// the output.
    pub fn record_dropped(&self) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// A record was written and acknowledged.
    pub fn record_written(&self) {
        self.records_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FlowMetricsSnapshot {
        FlowMetricsSnapshot {
            records_in: self.records_in.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FlowMetricsSnapshot {
    pub records_in: u64,
    pub records_dropped: u64,
    pub records_written: u64,
}

/// Counters owned by one reliability channel.
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    retries: AtomicU64,
    permanent_drops: AtomicU64,
}

impl ChannelMetrics {
    /// A message was re-enqueued after a nack or an ack timeout.
    pub fn retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// A message was dropped for good after exhausting its retries.
    pub fn permanent_drop(&self) {
        self.permanent_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ChannelMetricsSnapshot {
        ChannelMetricsSnapshot {
            retries: self.retries.load(Ordering::Relaxed),
            permanent_drops: self.permanent_drops.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChannelMetricsSnapshot {
    pub retries: u64,
    pub permanent_drops: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = FlowMetrics::default();
        metrics.record_in();
        metrics.record_in();
        metrics.record_dropped();
        metrics.record_written();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.records_in, 2);
        assert_eq!(snapshot.records_dropped, 1);
        assert_eq!(snapshot.records_written, 1);
    }
}
