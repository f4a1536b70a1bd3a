//! Offline replay: read a capture file and feed its TCP segments to an
//! [`Assembler`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tcpweave_core::stream::Assembler;
use tracing::{debug, info, warn};

use crate::decode::decode;
use crate::error::{Error, Result};
use crate::pcap::PcapReader;

/// Counters for one replay run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub frames: u64,
    pub tcp_segments: u64,
    /// Frames without a usable TCP segment (non-IP, non-TCP, fragments).
    pub skipped_frames: u64,
    pub decode_errors: u64,
    /// Segments the assembler rejected.
    pub malformed: u64,
    /// Connections completed by capture-time sweeps.
    pub swept: u64,
    /// The capture ended in a damaged or cut-off record.
    pub truncated: bool,
}

/// Replay a capture file into the assembler on a blocking thread.
///
/// Idle connections are swept on the capture clock as the file is read:
/// whenever capture time advances by the sweep interval, connections idle
/// longer than the staleness threshold are completed. Remaining connections
/// are left for the caller to flush.
///
/// A damaged record after the header ends the replay early: frames read
/// before it are kept and [`ReplaySummary::truncated`] is set.
pub async fn replay(path: PathBuf, assembler: Arc<Assembler>) -> Result<ReplaySummary> {
    let task = tokio::task::spawn_blocking(move || replay_blocking(&path, &assembler));
    task.await
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?
}

fn replay_blocking(path: &Path, assembler: &Assembler) -> Result<ReplaySummary> {
    let mut reader = PcapReader::open(path)?;
    let mut summary = ReplaySummary::default();

    let sweep_us = i64::try_from(assembler.config().sweep_interval.as_micros()).unwrap_or(i64::MAX);
    let mut next_sweep: Option<i64> = None;

    loop {
        let packet = match reader.next_packet() {
            Ok(Some(packet)) => packet,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, frames = summary.frames, "Capture ends early; keeping frames read so far");
                summary.truncated = true;
                break;
            }
        };
        summary.frames += 1;

        let segment = match decode(&packet) {
            Ok(Some(segment)) => segment,
            Ok(None) => {
                summary.skipped_frames += 1;
                continue;
            }
            Err(e) => {
                summary.decode_errors += 1;
                debug!(frame = packet.frame_number, error = %e, "Skipping undecodable frame");
                continue;
            }
        };
        summary.tcp_segments += 1;

        let now = segment.timestamp_us;
        if assembler.submit(&segment).is_err() {
            summary.malformed += 1;
        }

        match next_sweep {
            None => next_sweep = Some(now.saturating_add(sweep_us)),
            Some(due) if now >= due => {
                summary.swept += assembler.reap_idle(now) as u64;
                next_sweep = Some(now.saturating_add(sweep_us));
            }
            Some(_) => {}
        }
    }

    if summary.decode_errors > 0 {
        warn!(count = summary.decode_errors, "Frames could not be decoded");
    }
    info!(
        frames = summary.frames,
        segments = summary.tcp_segments,
        skipped = summary.skipped_frames,
        swept = summary.swept,
        "Replay finished"
    );
    Ok(summary)
}
