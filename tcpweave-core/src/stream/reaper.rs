use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::Assembler;

/// Periodic sweep that force-completes idle connections.
///
/// Without it, a capture that misses a FIN or RST leaks that connection
/// forever.
pub struct IdleReaper {
    assembler: Arc<Assembler>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl IdleReaper {
    /// Start sweeping every `sweep_interval` of the assembler's config.
    pub fn spawn(assembler: Arc<Assembler>) -> Self {
        let (stop, mut stopped) = oneshot::channel::<()>();
        let sweeper = Arc::clone(&assembler);
        let period = assembler.config().sweep_interval;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick fires immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = interval.tick() => {
                        let now = sweeper.reap_now_us();
                        sweeper.reap_idle(now);
                    }
                }
            }
            debug!("Idle reaper stopped");
        });

        debug!(?period, "Idle reaper started");
        Self {
            assembler,
            stop: Some(stop),
            task: Some(task),
        }
    }

    /// Run one sweep right away.
    pub fn sweep_now(&self) -> usize {
        self.assembler.reap_idle(self.assembler.reap_now_us())
    }

    /// Stop sweeping and complete every connection still tracked.
    ///
    /// Returns the number of connections flushed.
    pub async fn shutdown(mut self) -> usize {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Idle reaper task failed");
            }
        }
        let flushed = self.assembler.flush_all();
        info!(flushed, "Assembler shut down");
        flushed
    }
}

impl Drop for IdleReaper {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AssemblerConfig, DeliveryPolicy, ReapClock};
    use crate::stream::{
        CompletionReason, NetworkFlow, PortTable, Segment, TcpFlags, TransportFlow,
    };
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn data(port: u16) -> Segment {
        Segment::new(
            NetworkFlow::new(
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            ),
            TransportFlow::new(port, 80),
            1,
            TcpFlags::ACK,
            &b"data"[..],
            0,
        )
    }

    // Test 1: Zero threshold reaps on the first sweep
    #[tokio::test(start_paused = true)]
    async fn test_sweep_reaps() {
        let config = AssemblerConfig::default()
            .with_staleness_threshold(Duration::ZERO)
            .with_sweep_interval(Duration::from_secs(1))
            .with_delivery(8, DeliveryPolicy::DropOldest);
        let (asm, mut rx) = Assembler::new(config, PortTable::default()).unwrap();
        let asm = Arc::new(asm);
        let reaper = IdleReaper::spawn(Arc::clone(&asm));

        asm.submit(&data(40000)).unwrap();
        let stream = rx.recv().await.unwrap();
        assert_eq!(stream.reason, CompletionReason::Idle);
        assert_eq!(asm.active_connections(), 0);

        assert_eq!(reaper.shutdown().await, 0);
    }

    // Test 2: Shutdown flushes what the sweeps left behind
    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes() {
        let config = AssemblerConfig::default()
            .with_reap_clock(ReapClock::Capture)
            .with_delivery(8, DeliveryPolicy::DropOldest);
        let (asm, mut rx) = Assembler::new(config, PortTable::default()).unwrap();
        let asm = Arc::new(asm);
        let reaper = IdleReaper::spawn(Arc::clone(&asm));

        asm.submit(&data(40000)).unwrap();
        asm.submit(&data(40001)).unwrap();
        assert_eq!(reaper.shutdown().await, 2);
        drop(asm);

        let mut reasons = Vec::new();
        while let Some(stream) = rx.recv().await {
            reasons.push(stream.reason);
        }
        assert_eq!(reasons, vec![CompletionReason::Shutdown; 2]);
    }
}
