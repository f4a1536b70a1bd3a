//! tcpweave - Reassemble TCP byte streams from packet captures.
//!
//! This library reads PCAP/PCAPNG files, decodes each frame down to a TCP
//! segment, and drives the [`tcpweave_core`] reassembly engine over them.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tcpweave::replay::replay;
//! use tcpweave_core::stream::{Assembler, PortTable};
//! use tcpweave_core::{AssemblerConfig, ReapClock};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AssemblerConfig::default().with_reap_clock(ReapClock::Capture);
//!     let (assembler, mut streams) = Assembler::new(config, PortTable::default())?;
//!     let assembler = Arc::new(assembler);
//!
//!     replay("capture.pcap".into(), Arc::clone(&assembler)).await?;
//!     assembler.flush_all();
//!     drop(assembler);
//!
//!     while let Some(stream) = streams.recv().await {
//!         println!("{}: {} bytes", stream.protocol, stream.total_bytes());
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod decode;
pub mod error;
pub mod pcap;
pub mod replay;

pub use error::{Error, Result};
