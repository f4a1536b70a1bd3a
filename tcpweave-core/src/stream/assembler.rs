use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use super::delivery;
use super::notify::CompletionSignal;
use super::{
    AssemblerStats, Classifier, CompletionNotifier, CompletionReason, Connection, ConnectionState,
    Direction, FinishedStream, FlowKey, Ingest, Segment, StatsSnapshot, StreamHandler,
    StreamReceiver, StreamRegistry, Transition,
};
use crate::config::{AssemblerConfig, ReapClock};
use crate::error::{Error, Result, SegmentError};

/// What one [`Assembler::submit`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub direction: Direction,
    /// The segment opened a new connection.
    pub created: bool,
    pub transition: Transition,
    pub ingest: Ingest,
    /// Set when this segment ended the connection.
    pub completed: Option<CompletionReason>,
}

/// Central orchestrator for TCP stream reassembly.
///
/// Safe to share across capture workers: all connection state sits behind
/// one lock, so segments are processed one at a time. Completion signals
/// are fired after the lock is released.
pub struct Assembler {
    registry: Mutex<StreamRegistry>,
    config: AssemblerConfig,
    classifier: Arc<dyn Classifier>,
    notifier: CompletionNotifier,
    stats: Arc<AssemblerStats>,
    /// Newest capture timestamp submitted (microseconds).
    latest_capture_us: AtomicI64,
}

impl Assembler {
    /// Create an assembler and the receiver its finished streams go to.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: AssemblerConfig,
        classifier: impl Classifier + 'static,
    ) -> Result<(Self, StreamReceiver)> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let stats = Arc::new(AssemblerStats::new());
        let (queue, receiver) = delivery::channel(
            config.delivery_capacity,
            config.delivery_policy,
            Arc::clone(&stats),
        );
        let notifier = CompletionNotifier::new(queue, runtime, Arc::clone(&stats));

        let assembler = Self {
            registry: Mutex::new(StreamRegistry::new(
                config.overlap_policy,
                config.max_buffered_bytes,
            )),
            config,
            classifier: Arc::new(classifier),
            notifier,
            stats,
            latest_capture_us: AtomicI64::new(i64::MIN),
        };
        Ok((assembler, receiver))
    }

    /// Process one TCP segment.
    ///
    /// Malformed segments are logged, counted and returned as an error; they
    /// never touch connection state.
    pub fn submit(&self, segment: &Segment) -> std::result::Result<SubmitOutcome, SegmentError> {
        self.stats.record_segment();
        if let Err(e) = segment.validate() {
            self.stats.record_malformed();
            warn!(
                flow = %segment.net,
                ports = %segment.transport,
                error = %e,
                "Dropping malformed segment"
            );
            return Err(e);
        }
        self.latest_capture_us
            .fetch_max(segment.timestamp_us, Ordering::Relaxed);

        let (outcome, completion) = {
            let mut registry = self.registry.lock();
            let (conn, created) = registry.resolve(segment, self.classifier.as_ref());
            let key = *conn.key();
            if created {
                conn.attach_signal(self.notifier.watch(key));
            }

            // 1. Lifecycle
            let direction = conn.direction(segment);
            let transition = conn.accept(segment, direction);
            if let Transition::Anomaly { state, reason } = transition {
                self.stats.record_anomaly();
                debug!(
                    %key,
                    state = state.as_str(),
                    flags = %segment.flags,
                    reason,
                    "TCP state anomaly"
                );
            }

            // 2. Payload
            let ingest = conn.reassemble(segment, direction);
            trace!(
                %key,
                direction = direction.as_str(),
                seq = segment.seq,
                len = segment.payload.len(),
                ?ingest,
                "Segment"
            );

            // 3. Termination
            if created {
                self.stats.record_created(registry.len());
            }
            let completed = if transition.entered_terminal() {
                match transition.state() {
                    ConnectionState::Reset => Some(CompletionReason::Reset),
                    _ => Some(CompletionReason::Closed),
                }
            } else {
                None
            };
            let completion = completed
                .and_then(|reason| registry.remove(&key).and_then(|c| self.finish(c, reason)));

            let outcome = SubmitOutcome {
                direction,
                created,
                transition,
                ingest,
                completed,
            };
            (outcome, completion)
        };

        if let Some((signal, stream)) = completion {
            signal.fire(stream);
        }
        Ok(outcome)
    }

    /// Force-complete every connection with no activity before `cutoff_us`.
    ///
    /// Returns the number of connections completed.
    pub fn flush_older_than(&self, cutoff_us: i64) -> usize {
        let completions: Vec<_> = {
            let mut registry = self.registry.lock();
            registry
                .stale_keys(cutoff_us)
                .into_iter()
                .filter_map(|key| registry.remove(&key))
                .filter_map(|conn| self.finish(conn, CompletionReason::Idle))
                .collect()
        };
        self.fire_all(completions)
    }

    /// Force-complete connections idle longer than the staleness threshold,
    /// measured from `now_us`. A zero threshold completes everything.
    pub fn reap_idle(&self, now_us: i64) -> usize {
        let threshold = duration_us(self.config.staleness_threshold);
        let cutoff = if threshold == 0 {
            i64::MAX
        } else {
            now_us.saturating_sub(threshold)
        };
        let reaped = self.flush_older_than(cutoff);
        if reaped > 0 {
            debug!(reaped, remaining = self.active_connections(), "Reaped idle connections");
        }
        reaped
    }

    /// Complete every remaining connection.
    pub fn flush_all(&self) -> usize {
        let completions: Vec<_> = {
            let mut registry = self.registry.lock();
            registry
                .drain()
                .into_iter()
                .filter_map(|conn| self.finish(conn, CompletionReason::Shutdown))
                .collect()
        };
        self.fire_all(completions)
    }

    /// The "now" the reaper measures staleness against.
    pub fn reap_now_us(&self) -> i64 {
        match self.config.reap_clock {
            ReapClock::Wall => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_micros() as i64)
                .unwrap_or(0),
            ReapClock::Capture => self.latest_capture_us.load(Ordering::Relaxed),
        }
    }

    /// Newest capture timestamp submitted, if any.
    pub fn latest_capture_us(&self) -> Option<i64> {
        match self.latest_capture_us.load(Ordering::Relaxed) {
            i64::MIN => None,
            ts => Some(ts),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.registry.lock().len()
    }

    /// Whether a connection for this flow is currently tracked.
    pub fn is_tracking(&self, key: &FlowKey) -> bool {
        self.registry.lock().get(key).is_some()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Finalize a connection already removed from the registry.
    fn finish(
        &self,
        mut conn: Connection,
        reason: CompletionReason,
    ) -> Option<(CompletionSignal, FinishedStream)> {
        if !conn.mark_published() {
            return None;
        }
        let signal = conn.take_signal()?;
        let key = *conn.key();
        self.stats.record_completion(reason);
        let stream = conn.complete(reason);
        debug!(
            %key,
            reason = reason.as_str(),
            state = stream.final_state.as_str(),
            packets = stream.packets,
            gaps = stream.gap_count(),
            "Connection complete"
        );
        Some((signal, stream))
    }

    fn fire_all(&self, completions: Vec<(CompletionSignal, FinishedStream)>) -> usize {
        let count = completions.len();
        for (signal, stream) in completions {
            signal.fire(stream);
        }
        count
    }
}

fn duration_us(d: std::time::Duration) -> i64 {
    i64::try_from(d.as_micros()).unwrap_or(i64::MAX)
}
