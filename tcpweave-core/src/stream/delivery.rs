//! Bounded hand-off of finished streams to the downstream consumer.
//!
//! Any number of [`DeliveryQueue`] handles feed a single [`StreamReceiver`].
//! The channel closes once every queue handle is dropped and the queue has
//! drained.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;

use super::{AssemblerStats, FinishedStream};
use crate::config::DeliveryPolicy;
use crate::error::DeliveryError;

struct Shared {
    queue: ArrayQueue<FinishedStream>,
    /// Signalled when a stream is pushed or the last sender goes away.
    items: Notify,
    /// Signalled when the receiver frees a slot or goes away.
    space: Notify,
    senders: AtomicUsize,
    receiver_alive: AtomicBool,
    stats: Arc<AssemblerStats>,
}

/// Create a bounded delivery channel.
pub fn channel(
    capacity: usize,
    policy: DeliveryPolicy,
    stats: Arc<AssemblerStats>,
) -> (DeliveryQueue, StreamReceiver) {
    let shared = Arc::new(Shared {
        queue: ArrayQueue::new(capacity),
        items: Notify::new(),
        space: Notify::new(),
        senders: AtomicUsize::new(1),
        receiver_alive: AtomicBool::new(true),
        stats,
    });
    (
        DeliveryQueue {
            shared: Arc::clone(&shared),
            policy,
        },
        StreamReceiver { shared },
    )
}

/// Sending half of the delivery channel.
pub struct DeliveryQueue {
    shared: Arc<Shared>,
    policy: DeliveryPolicy,
}

impl DeliveryQueue {
    /// Hand a finished stream to the consumer under the configured policy.
    ///
    /// With [`DeliveryPolicy::Block`] this waits for a free slot; on timeout
    /// the new stream is dropped and counted.
    pub async fn push(&self, stream: FinishedStream) -> Result<(), DeliveryError> {
        if !self.shared.receiver_alive.load(Ordering::Acquire) {
            return Err(DeliveryError::Disconnected);
        }

        match self.policy {
            DeliveryPolicy::DropOldest => {
                if let Some(evicted) = self.shared.queue.force_push(stream) {
                    self.shared.stats.record_dropped_oldest();
                    warn!(
                        flow = %evicted.network,
                        ports = %evicted.transport,
                        "Delivery channel full, dropped oldest stream"
                    );
                }
                self.delivered();
                Ok(())
            }
            DeliveryPolicy::Block { timeout } => {
                let deadline = Instant::now() + timeout;
                let mut stream = stream;
                loop {
                    match self.shared.queue.push(stream) {
                        Ok(()) => {
                            self.delivered();
                            return Ok(());
                        }
                        Err(rejected) => stream = rejected,
                    }
                    if !self.shared.receiver_alive.load(Ordering::Acquire) {
                        return Err(DeliveryError::Disconnected);
                    }
                    let space = self.shared.space.notified();
                    if tokio::time::timeout_at(deadline, space).await.is_err() {
                        self.shared.stats.record_dropped_timeout();
                        warn!(
                            flow = %stream.network,
                            ports = %stream.transport,
                            waited = ?timeout,
                            "Delivery channel full, dropped stream"
                        );
                        return Err(DeliveryError::Timeout { waited: timeout });
                    }
                }
            }
        }
    }

    fn delivered(&self) {
        self.shared.stats.record_delivered();
        self.shared.items.notify_one();
    }

    pub fn policy(&self) -> DeliveryPolicy {
        self.policy
    }

    pub fn is_disconnected(&self) -> bool {
        !self.shared.receiver_alive.load(Ordering::Acquire)
    }
}

impl Clone for DeliveryQueue {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(&self.shared),
            policy: self.policy,
        }
    }
}

impl Drop for DeliveryQueue {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Last sender: wake the receiver so it can observe the close
            self.shared.items.notify_one();
        }
    }
}

/// Receiving half of the delivery channel.
pub struct StreamReceiver {
    shared: Arc<Shared>,
}

impl StreamReceiver {
    /// Wait for the next finished stream.
    ///
    /// Returns `None` once all senders are gone and the queue is empty.
    pub async fn recv(&mut self) -> Option<FinishedStream> {
        loop {
            if let Some(stream) = self.try_recv() {
                return Some(stream);
            }
            if self.shared.senders.load(Ordering::Acquire) == 0 {
                // A push may have raced the close
                return self.try_recv();
            }
            self.shared.items.notified().await;
        }
    }

    /// Take a stream if one is queued.
    pub fn try_recv(&mut self) -> Option<FinishedStream> {
        let stream = self.shared.queue.pop()?;
        self.shared.space.notify_one();
        Some(stream)
    }

    /// Number of streams waiting.
    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    /// True when no sender remains.
    pub fn is_closed(&self) -> bool {
        self.shared.senders.load(Ordering::Acquire) == 0
    }

    /// Streams lost to backpressure so far.
    pub fn dropped(&self) -> u64 {
        self.shared.stats.snapshot().dropped()
    }
}

impl Drop for StreamReceiver {
    fn drop(&mut self) {
        self.shared.receiver_alive.store(false, Ordering::Release);
        self.shared.space.notify_waiters();
        self.shared.space.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{
        BufferStats, CompletionReason, ConnectionState, NetworkFlow, ProtocolLabel,
        TransportFlow,
    };
    use bytes::Bytes;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn stream(port: u16) -> FinishedStream {
        FinishedStream {
            network: NetworkFlow::new(
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            ),
            transport: TransportFlow::new(port, 80),
            protocol: ProtocolLabel::new("http"),
            to_server: Bytes::from_static(b"GET"),
            to_client: Bytes::new(),
            reason: CompletionReason::Closed,
            final_state: ConnectionState::Closed,
            packets: 1,
            payload_packets: 1,
            first_seen_us: 0,
            last_seen_us: 0,
            to_server_stats: BufferStats::default(),
            to_client_stats: BufferStats::default(),
        }
    }

    fn stats() -> Arc<AssemblerStats> {
        Arc::new(AssemblerStats::new())
    }

    // Test 1: FIFO order
    #[tokio::test]
    async fn test_fifo() {
        let (tx, mut rx) = channel(4, DeliveryPolicy::DropOldest, stats());
        tx.push(stream(1)).await.unwrap();
        tx.push(stream(2)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().transport.src, 1);
        assert_eq!(rx.recv().await.unwrap().transport.src, 2);
    }

    // Test 2: Drop-oldest keeps the newest streams
    #[tokio::test]
    async fn test_drop_oldest() {
        let stats = stats();
        let (tx, mut rx) = channel(2, DeliveryPolicy::DropOldest, Arc::clone(&stats));
        for port in 1..=3 {
            tx.push(stream(port)).await.unwrap();
        }
        assert_eq!(rx.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap().transport.src, 2);
        assert_eq!(rx.try_recv().unwrap().transport.src, 3);
        assert!(rx.try_recv().is_none());
        assert_eq!(stats.snapshot().dropped_oldest, 1);
    }

    // Test 3: Block times out and drops the new stream
    #[tokio::test(start_paused = true)]
    async fn test_block_timeout() {
        let timeout = Duration::from_millis(100);
        let (tx, mut rx) = channel(1, DeliveryPolicy::Block { timeout }, stats());
        tx.push(stream(1)).await.unwrap();

        let err = tx.push(stream(2)).await.unwrap_err();
        assert_eq!(err, DeliveryError::Timeout { waited: timeout });
        assert_eq!(rx.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap().transport.src, 1);
    }

    // Test 4: Block resumes when the consumer frees a slot
    #[tokio::test]
    async fn test_block_resumes() {
        let timeout = Duration::from_secs(5);
        let (tx, mut rx) = channel(1, DeliveryPolicy::Block { timeout }, stats());
        tx.push(stream(1)).await.unwrap();

        let pusher = tokio::spawn(async move { tx.push(stream(2)).await });
        assert_eq!(rx.recv().await.unwrap().transport.src, 1);
        pusher.await.unwrap().unwrap();
        assert_eq!(rx.recv().await.unwrap().transport.src, 2);
        // Sender moved into the task and dropped with it
        assert!(rx.recv().await.is_none());
    }

    // Test 5: Closing after the last sender drops
    #[tokio::test]
    async fn test_close_after_senders_drop() {
        let (tx, mut rx) = channel(4, DeliveryPolicy::DropOldest, stats());
        let tx2 = tx.clone();
        tx.push(stream(1)).await.unwrap();
        drop(tx);
        assert!(!rx.is_closed());
        drop(tx2);
        assert!(rx.is_closed());
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    // Test 6: Pushing after the receiver is gone
    #[tokio::test]
    async fn test_receiver_dropped() {
        let (tx, rx) = channel(4, DeliveryPolicy::DropOldest, stats());
        drop(rx);
        assert!(tx.is_disconnected());
        assert_eq!(
            tx.push(stream(1)).await.unwrap_err(),
            DeliveryError::Disconnected
        );
    }
}
