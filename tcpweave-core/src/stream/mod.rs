//! Passive TCP stream reassembly.
//!
//! Segments observed on the wire are grouped into bidirectional connections,
//! each direction's payload is rebuilt into an ordered byte stream, and every
//! finished connection that carried data is handed to a bounded delivery
//! channel exactly once.
//!
//! ## Components
//!
//! - [`Assembler`] - Shared entry point; serializes segment processing
//! - [`StreamRegistry`] - Live connections keyed by normalized [`FlowKey`]
//! - [`Connection`] - Per-connection state implementing [`StreamHandler`]
//! - [`StreamBuffer`] - Out-of-order tolerant byte reassembly for one direction
//! - [`StateMachine`] - Flag-driven TCP lifecycle tracking
//! - [`CompletionNotifier`] - One waiter per connection, publishes on completion
//! - [`IdleReaper`] - Periodic force-completion of idle connections
//! - [`Classifier`] - Port-based protocol labelling seam
//!
//! ## Example
//!
//! ```rust,no_run
//! use tcpweave_core::stream::{Assembler, IdleReaper, PortTable};
//! use tcpweave_core::AssemblerConfig;
//! use std::sync::Arc;
//!
//! # async fn run() -> tcpweave_core::Result<()> {
//! let (assembler, mut streams) = Assembler::new(AssemblerConfig::default(), PortTable::default())?;
//! let assembler = Arc::new(assembler);
//! let reaper = IdleReaper::spawn(Arc::clone(&assembler));
//!
//! // Capture workers call assembler.submit(&segment)...
//!
//! reaper.shutdown().await;
//! drop(assembler);
//! while let Some(stream) = streams.recv().await {
//!     println!("{} {} bytes", stream.protocol, stream.total_bytes());
//! }
//! # Ok(())
//! # }
//! ```

mod assembler;
mod buffer;
mod classify;
mod connection;
pub mod delivery;
mod flow;
mod notify;
mod reaper;
mod registry;
mod segment;
mod state;
mod stats;

pub use assembler::{Assembler, SubmitOutcome};
pub use buffer::{BufferStats, Ingest, OverlapPolicy, SequenceGap, StreamBuffer};
pub use classify::{Classifier, PortTable, ProtocolLabel};
pub use connection::{CompletionReason, Connection, FinishedStream, StreamHandler};
pub use delivery::{DeliveryQueue, StreamReceiver};
pub use flow::{FlowKey, NetworkFlow, TransportFlow};
pub use notify::{CompletionNotifier, CompletionSignal};
pub use reaper::IdleReaper;
pub use registry::StreamRegistry;
pub use segment::{Direction, Segment, TcpFlags};
pub use state::{ConnectionState, StateMachine, Transition};
pub use stats::{AssemblerStats, StatsSnapshot};
