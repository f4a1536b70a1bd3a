//! Error types for tcpweave-core.
//!
//! This module provides structured error types for the reassembly engine:
//!
//! - [`enum@Error`] - Failures constructing an assembler
//! - [`SegmentError`] - Malformed input segments, returned by `submit`
//! - [`ConfigError`] - Invalid assembler configuration
//! - [`DeliveryError`] - Backpressure outcomes on the delivery channel
//!
//! All errors implement `std::error::Error` and can be converted to `anyhow::Error`.

use std::time::Duration;

use thiserror::Error;

/// Main error type for tcpweave-core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The assembler spawns one completion task per connection and needs a runtime
    #[error("No tokio runtime available: the assembler must be created inside a runtime")]
    NoRuntime,
}

/// Errors for segments that cannot be attributed to a flow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmentError {
    /// A port of zero cannot identify a TCP endpoint
    #[error("zero port in transport flow {src}->{dst}")]
    ZeroPort { src: u16, dst: u16 },

    /// Unspecified address on either side
    #[error("unspecified network address in flow {src}->{dst}")]
    UnspecifiedAddress { src: String, dst: String },

    /// IPv4 on one side, IPv6 on the other
    #[error("address family mismatch in flow {src}->{dst}")]
    FamilyMismatch { src: String, dst: String },

    /// Flag combination no TCP stack emits
    #[error("inconsistent flags: {flags}")]
    InconsistentFlags { flags: String },
}

/// Errors related to assembler configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Delivery channel needs room for at least one stream
    #[error("delivery capacity must be greater than zero")]
    ZeroCapacity,

    /// Sweeping with a zero period would spin
    #[error("sweep interval must be greater than zero")]
    ZeroSweepInterval,

    /// Out-of-order buffering disabled entirely
    #[error("max buffered bytes must be greater than zero")]
    ZeroBufferLimit,
}

/// Errors surfaced when a finished stream could not be handed downstream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Queue stayed full for the whole block timeout; the stream was dropped
    #[error("delivery channel full for {waited:?}, stream dropped")]
    Timeout { waited: Duration },

    /// The consumer went away
    #[error("stream receiver dropped")]
    Disconnected,
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
