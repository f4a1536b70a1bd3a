use std::fmt;

use bytes::Bytes;

use super::{FlowKey, NetworkFlow, TransportFlow};
use crate::error::SegmentError;

/// Direction of data flow in a TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ToServer,
    ToClient,
}

impl Direction {
    /// Return a string representation of the direction.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ToServer => "to_server",
            Direction::ToClient => "to_client",
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::ToServer => Direction::ToClient,
            Direction::ToClient => Direction::ToServer,
        }
    }
}

/// TCP control flags relevant to connection tracking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
}

impl TcpFlags {
    pub const SYN: TcpFlags = TcpFlags {
        syn: true,
        ack: false,
        fin: false,
        rst: false,
    };
    pub const SYN_ACK: TcpFlags = TcpFlags {
        syn: true,
        ack: true,
        fin: false,
        rst: false,
    };
    pub const ACK: TcpFlags = TcpFlags {
        syn: false,
        ack: true,
        fin: false,
        rst: false,
    };
    pub const FIN_ACK: TcpFlags = TcpFlags {
        syn: false,
        ack: true,
        fin: true,
        rst: false,
    };
    pub const RST: TcpFlags = TcpFlags {
        syn: false,
        ack: false,
        fin: false,
        rst: true,
    };
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut any = false;
        for (set, name) in [
            (self.syn, "SYN"),
            (self.fin, "FIN"),
            (self.rst, "RST"),
            (self.ack, "ACK"),
        ] {
            if set {
                if any {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                any = true;
            }
        }
        if !any {
            f.write_str("-")?;
        }
        Ok(())
    }
}

/// One observed TCP segment, already parsed by the capture layer.
///
/// The engine only reads segments. `payload` is a [`Bytes`] so capture
/// workers can hand off slices of their packet buffers without copying.
#[derive(Debug, Clone)]
pub struct Segment {
    pub net: NetworkFlow,
    pub transport: TransportFlow,
    pub seq: u32,
    pub flags: TcpFlags,
    pub payload: Bytes,
    /// Capture timestamp (microseconds since epoch).
    pub timestamp_us: i64,
}

impl Segment {
    pub fn new(
        net: NetworkFlow,
        transport: TransportFlow,
        seq: u32,
        flags: TcpFlags,
        payload: impl Into<Bytes>,
        timestamp_us: i64,
    ) -> Self {
        Self {
            net,
            transport,
            seq,
            flags,
            payload: payload.into(),
            timestamp_us,
        }
    }

    /// Order-independent lookup key for this segment's connection.
    pub fn flow_key(&self) -> FlowKey {
        FlowKey::new(&self.net, &self.transport)
    }

    pub fn has_payload(&self) -> bool {
        !self.payload.is_empty()
    }

    /// Reject segments that cannot belong to any real connection.
    pub fn validate(&self) -> Result<(), SegmentError> {
        if self.transport.src == 0 || self.transport.dst == 0 {
            return Err(SegmentError::ZeroPort {
                src: self.transport.src,
                dst: self.transport.dst,
            });
        }
        if self.net.src.is_unspecified() || self.net.dst.is_unspecified() {
            return Err(SegmentError::UnspecifiedAddress {
                src: self.net.src.to_string(),
                dst: self.net.dst.to_string(),
            });
        }
        if self.net.src.is_ipv4() != self.net.dst.is_ipv4() {
            return Err(SegmentError::FamilyMismatch {
                src: self.net.src.to_string(),
                dst: self.net.dst.to_string(),
            });
        }
        // SYN+FIN and SYN+RST never occur in a well-formed exchange
        if self.flags.syn && (self.flags.fin || self.flags.rst) {
            return Err(SegmentError::InconsistentFlags {
                flags: self.flags.to_string(),
            });
        }
        Ok(())
    }
}
