use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::{AssemblerStats, DeliveryQueue, FinishedStream, FlowKey};

/// One-shot completion signal held by a live connection.
#[derive(Debug)]
pub struct CompletionSignal {
    tx: oneshot::Sender<FinishedStream>,
}

impl CompletionSignal {
    /// Hand the finished stream to its waiter. Returns false if the waiter
    /// is gone.
    pub fn fire(self, stream: FinishedStream) -> bool {
        self.tx.send(stream).is_ok()
    }
}

/// Spawns one waiter per connection that publishes the finished stream.
///
/// Waiters drop streams that never carried payload. Backpressure from the
/// delivery channel stalls only the waiter, never segment ingestion.
pub struct CompletionNotifier {
    queue: DeliveryQueue,
    runtime: Handle,
    stats: Arc<AssemblerStats>,
}

impl CompletionNotifier {
    pub fn new(queue: DeliveryQueue, runtime: Handle, stats: Arc<AssemblerStats>) -> Self {
        Self {
            queue,
            runtime,
            stats,
        }
    }

    /// Start waiting for a connection's completion.
    ///
    /// If the returned signal is dropped without firing, the waiter exits.
    pub fn watch(&self, key: FlowKey) -> CompletionSignal {
        let (tx, rx) = oneshot::channel::<FinishedStream>();
        let queue = self.queue.clone();
        let stats = Arc::clone(&self.stats);

        self.runtime.spawn(async move {
            let stream = match rx.await {
                Ok(stream) => stream,
                Err(_) => {
                    trace!(%key, "Completion signal dropped");
                    return;
                }
            };

            if stream.is_empty() {
                stats.record_empty();
                debug!(%key, reason = stream.reason.as_str(), "Skipping stream without payload");
                return;
            }

            debug!(
                %key,
                protocol = %stream.protocol,
                to_server = stream.to_server.len(),
                to_client = stream.to_client.len(),
                reason = stream.reason.as_str(),
                "Publishing stream"
            );
            if let Err(e) = queue.push(stream).await {
                debug!(%key, error = %e, "Stream not delivered");
            }
        });

        CompletionSignal { tx }
    }
}
