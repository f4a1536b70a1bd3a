//! # tcpweave-core
//!
//! Passive TCP stream reassembly engine.
//!
//! Consumes already-parsed TCP segments from any number of capture workers,
//! tracks connections in both directions, reconstructs each direction's byte
//! stream despite reordering, retransmission and loss, and publishes every
//! finished connection that carried payload exactly once.
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                        tcpweave-core                                |
//! +---------------------------------------------------------------------+
//! |  stream/     - Assembler, registry, buffers, lifecycle, delivery    |
//! |  config      - AssemblerConfig, delivery and reaper policies        |
//! |  error       - Error types                                          |
//! +---------------------------------------------------------------------+
//! ```
//!
//! The engine performs no capture and no packet decoding; the caller builds
//! [`stream::Segment`]s.

pub mod config;
pub mod error;
pub mod stream;

pub use config::{AssemblerConfig, DeliveryPolicy, ReapClock};
pub use error::{ConfigError, DeliveryError, Error, Result, SegmentError};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::config::{AssemblerConfig, DeliveryPolicy, ReapClock};
    pub use crate::error::{Error, Result};
    pub use crate::stream::{
        Assembler, CompletionReason, Direction, FinishedStream, IdleReaper, NetworkFlow,
        OverlapPolicy, PortTable, ProtocolLabel, Segment, StreamReceiver, TcpFlags,
        TransportFlow,
    };
}
