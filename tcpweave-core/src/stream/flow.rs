use std::fmt;
use std::net::IpAddr;

/// Network-layer half of a flow (addresses as seen on one packet).
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct NetworkFlow {
    pub src: IpAddr,
    pub dst: IpAddr,
}

impl NetworkFlow {
    pub fn new(src: IpAddr, dst: IpAddr) -> Self {
        Self { src, dst }
    }

    /// The same flow seen from the other endpoint.
    pub fn reverse(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }
}

impl fmt::Display for NetworkFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.src, self.dst)
    }
}

/// Transport-layer half of a flow (ports as seen on one packet).
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct TransportFlow {
    pub src: u16,
    pub dst: u16,
}

impl TransportFlow {
    pub fn new(src: u16, dst: u16) -> Self {
        Self { src, dst }
    }

    /// The same flow seen from the other endpoint.
    pub fn reverse(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }
}

impl fmt::Display for TransportFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.src, self.dst)
    }
}

/// Normalized flow key (lower endpoint first for consistent lookup).
///
/// Both directions of a connection map to the same key; direction is
/// recovered by the connection, not encoded here.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct FlowKey {
    ip_a: IpAddr,
    port_a: u16,
    ip_b: IpAddr,
    port_b: u16,
}

impl FlowKey {
    /// Create a normalized flow key.
    /// Ensures (ip_a, port_a) <= (ip_b, port_b) lexicographically.
    pub fn new(net: &NetworkFlow, transport: &TransportFlow) -> Self {
        let src = (net.src, transport.src);
        let dst = (net.dst, transport.dst);
        let ((ip_a, port_a), (ip_b, port_b)) = if src <= dst { (src, dst) } else { (dst, src) };
        Self {
            ip_a,
            port_a,
            ip_b,
            port_b,
        }
    }

    /// Whether the given source endpoint is the key's lower endpoint.
    pub fn is_endpoint_a(&self, src_ip: IpAddr, src_port: u16) -> bool {
        src_ip == self.ip_a && src_port == self.port_a
    }

    /// The lower endpoint.
    pub fn endpoint_a(&self) -> (IpAddr, u16) {
        (self.ip_a, self.port_a)
    }

    /// The higher endpoint.
    pub fn endpoint_b(&self) -> (IpAddr, u16) {
        (self.ip_b, self.port_b)
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}<->{}:{}",
            self.ip_a, self.port_a, self.ip_b, self.port_b
        )
    }
}
