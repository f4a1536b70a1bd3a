//! Assembler configuration.

use std::time::Duration;

use crate::error::ConfigError;
use crate::stream::OverlapPolicy;

/// What a completion does when the delivery channel is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Evict the oldest queued stream to make room.
    DropOldest,
    /// Wait for the consumer, dropping the new stream after `timeout`.
    Block { timeout: Duration },
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        DeliveryPolicy::Block {
            timeout: Duration::from_secs(5),
        }
    }
}

/// Which clock the idle reaper measures staleness against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReapClock {
    /// Wall-clock time; for live capture.
    #[default]
    Wall,
    /// Latest capture timestamp submitted; for replaying stored captures.
    Capture,
}

/// Configuration for the [`Assembler`](crate::stream::Assembler) and its reaper.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Connections idle longer than this are force-completed.
    pub staleness_threshold: Duration,
    /// How often the reaper sweeps.
    pub sweep_interval: Duration,
    /// Finished streams the delivery channel holds before backpressure.
    pub delivery_capacity: usize,
    pub delivery_policy: DeliveryPolicy,
    pub overlap_policy: OverlapPolicy,
    /// Out-of-order bytes buffered per direction before skipping ahead.
    pub max_buffered_bytes: usize,
    pub reap_clock: ReapClock,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            staleness_threshold: Duration::from_secs(40),
            sweep_interval: Duration::from_secs(10),
            delivery_capacity: 1024,
            delivery_policy: DeliveryPolicy::default(),
            overlap_policy: OverlapPolicy::default(),
            max_buffered_bytes: 16 * 1024 * 1024, // 16 MB per direction
            reap_clock: ReapClock::default(),
        }
    }
}

impl AssemblerConfig {
    pub fn with_staleness_threshold(mut self, threshold: Duration) -> Self {
        self.staleness_threshold = threshold;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_delivery(mut self, capacity: usize, policy: DeliveryPolicy) -> Self {
        self.delivery_capacity = capacity;
        self.delivery_policy = policy;
        self
    }

    pub fn with_overlap_policy(mut self, policy: OverlapPolicy) -> Self {
        self.overlap_policy = policy;
        self
    }

    pub fn with_max_buffered_bytes(mut self, limit: usize) -> Self {
        self.max_buffered_bytes = limit;
        self
    }

    pub fn with_reap_clock(mut self, clock: ReapClock) -> Self {
        self.reap_clock = clock;
        self
    }

    /// Check for values that would make the engine unusable.
    ///
    /// A zero staleness threshold is allowed: it reaps every connection
    /// on each sweep.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delivery_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroSweepInterval);
        }
        if self.max_buffered_bytes == 0 {
            return Err(ConfigError::ZeroBufferLimit);
        }
        Ok(())
    }
}
