use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::CompletionReason;

/// Engine-wide counters, shared between the assembler and its notifier tasks.
#[derive(Debug, Default)]
pub struct AssemblerStats {
    segments: AtomicU64,
    malformed: AtomicU64,
    anomalies: AtomicU64,
    connections_created: AtomicU64,
    peak_connections: AtomicUsize,
    closed: AtomicU64,
    reset: AtomicU64,
    idle: AtomicU64,
    shutdown: AtomicU64,
    empty_skipped: AtomicU64,
    delivered: AtomicU64,
    dropped_oldest: AtomicU64,
    dropped_timeout: AtomicU64,
}

impl AssemblerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_segment(&self) {
        self.segments.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_anomaly(&self) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_created(&self, live: usize) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
        self.update_peak(live);
    }

    pub(crate) fn record_completion(&self, reason: CompletionReason) {
        let counter = match reason {
            CompletionReason::Closed => &self.closed,
            CompletionReason::Reset => &self.reset,
            CompletionReason::Idle => &self.idle,
            CompletionReason::Shutdown => &self.shutdown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_empty(&self) {
        self.empty_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_oldest(&self) {
        self.dropped_oldest.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_timeout(&self) {
        self.dropped_timeout.fetch_add(1, Ordering::Relaxed);
    }

    /// Update peak connections if current is higher.
    fn update_peak(&self, current: usize) {
        let mut peak = self.peak_connections.load(Ordering::Relaxed);
        while current > peak {
            match self.peak_connections.compare_exchange_weak(
                peak,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => peak = actual,
            }
        }
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            segments: self.segments.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            connections_created: self.connections_created.load(Ordering::Relaxed),
            peak_connections: self.peak_connections.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            reset: self.reset.load(Ordering::Relaxed),
            idle: self.idle.load(Ordering::Relaxed),
            shutdown: self.shutdown.load(Ordering::Relaxed),
            empty_skipped: self.empty_skipped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_oldest: self.dropped_oldest.load(Ordering::Relaxed),
            dropped_timeout: self.dropped_timeout.load(Ordering::Relaxed),
        }
    }
}

/// Assembler statistics for monitoring.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Segments submitted, malformed ones included.
    pub segments: u64,
    /// Segments rejected by validation.
    pub malformed: u64,
    /// Segments whose flags made no sense for the connection state.
    pub anomalies: u64,
    pub connections_created: u64,
    /// Most connections tracked at once (high watermark).
    pub peak_connections: usize,

    /// Completions by reason.
    pub closed: u64,
    pub reset: u64,
    pub idle: u64,
    pub shutdown: u64,

    /// Completed connections that never carried payload.
    pub empty_skipped: u64,
    /// Streams pushed to the delivery channel.
    pub delivered: u64,
    /// Streams evicted from a full channel to make room.
    pub dropped_oldest: u64,
    /// Streams dropped after the block timeout.
    pub dropped_timeout: u64,
}

impl StatsSnapshot {
    pub fn completed(&self) -> u64 {
        self.closed + self.reset + self.idle + self.shutdown
    }

    pub fn dropped(&self) -> u64 {
        self.dropped_oldest + self.dropped_timeout
    }
}
