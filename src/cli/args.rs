//! Command-line argument definitions.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tcpweave_core::stream::OverlapPolicy;
use tcpweave_core::{AssemblerConfig, DeliveryPolicy, ReapClock};

use super::OutputFormat;

/// What to do when the consumer falls behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backpressure {
    /// Evict the oldest undelivered stream
    DropOldest,
    /// Wait for the consumer, up to --block-timeout
    Block,
}

/// Which copy wins when retransmitted bytes disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Overlap {
    /// Keep the bytes seen first
    First,
    /// Keep the bytes seen last
    Last,
}

impl From<Overlap> for OverlapPolicy {
    fn from(overlap: Overlap) -> Self {
        match overlap {
            Overlap::First => OverlapPolicy::FirstWrite,
            Overlap::Last => OverlapPolicy::LastWrite,
        }
    }
}

/// Reassemble TCP byte streams from a packet capture.
#[derive(Parser, Debug)]
#[command(name = "tcpweave")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// PCAP or PCAPNG file (optionally gzip-compressed)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Output format for the stream summary
    #[arg(long = "format", value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Write each stream's payload to files in this directory
    #[arg(short = 'o', long = "output-dir", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Seconds of inactivity before a connection is completed (0 = every sweep)
    #[arg(long = "idle-timeout", default_value = "40", value_name = "SECS")]
    pub idle_timeout: u64,

    /// Seconds between idle sweeps, in capture time
    #[arg(long = "sweep-interval", default_value = "10", value_name = "SECS")]
    pub sweep_interval: u64,

    /// Completed streams buffered between the engine and the output
    #[arg(long = "channel-capacity", default_value = "1024")]
    pub channel_capacity: usize,

    /// Behavior when the output falls behind
    #[arg(long = "backpressure", value_enum, default_value = "block")]
    pub backpressure: Backpressure,

    /// Milliseconds to wait under --backpressure block before dropping a stream
    #[arg(long = "block-timeout", default_value = "5000", value_name = "MS")]
    pub block_timeout: u64,

    /// Overlap resolution for conflicting retransmissions
    #[arg(long = "overlap", value_enum, default_value = "last")]
    pub overlap: Overlap,

    /// Out-of-order bytes held per direction before skipping ahead
    #[arg(long = "max-buffered", default_value = "16777216", value_name = "BYTES")]
    pub max_buffered: usize,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Assembler configuration for replaying a stored capture.
    pub fn to_config(&self) -> AssemblerConfig {
        let delivery = match self.backpressure {
            Backpressure::DropOldest => DeliveryPolicy::DropOldest,
            Backpressure::Block => DeliveryPolicy::Block {
                timeout: Duration::from_millis(self.block_timeout),
            },
        };

        AssemblerConfig::default()
            .with_staleness_threshold(Duration::from_secs(self.idle_timeout))
            .with_sweep_interval(Duration::from_secs(self.sweep_interval))
            .with_delivery(self.channel_capacity, delivery)
            .with_overlap_policy(self.overlap.into())
            .with_max_buffered_bytes(self.max_buffered)
            .with_reap_clock(ReapClock::Capture)
    }
}
