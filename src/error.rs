//! Error types for tcpweave.

use thiserror::Error;

/// Main error type for tcpweave operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Error reading or parsing PCAP file
    #[error("PCAP error: {0}")]
    Pcap(#[from] PcapError),

    /// Error from the reassembly engine
    #[error("Engine error: {0}")]
    Engine(#[from] tcpweave_core::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to PCAP file reading.
#[derive(Error, Debug)]
pub enum PcapError {
    /// File not found
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    /// Invalid PCAP format
    #[error("Invalid PCAP format: {reason}")]
    InvalidFormat { reason: String },
}

/// Errors turning a captured frame into a TCP segment.
///
/// These are per-frame: the frame is skipped and replay continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Link type we cannot strip
    #[error("Unsupported link type: {link_type}")]
    UnsupportedLinkType { link_type: u16 },

    /// Header did not parse
    #[error("{layer}: {reason}")]
    Malformed { layer: &'static str, reason: String },

    /// Frame shorter than its headers claim
    #[error("{layer}: truncated (need {needed} bytes, have {have})")]
    Truncated {
        layer: &'static str,
        needed: usize,
        have: usize,
    },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
