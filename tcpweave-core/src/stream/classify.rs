use std::collections::HashMap;
use std::fmt;

use compact_str::CompactString;

use super::TransportFlow;

/// Opaque protocol tag attached to a connection at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProtocolLabel(CompactString);

impl ProtocolLabel {
    pub const UNKNOWN: &'static str = "unknown";

    pub fn new(name: impl Into<CompactString>) -> Self {
        Self(name.into())
    }

    pub fn unknown() -> Self {
        Self(CompactString::new(Self::UNKNOWN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }
}

impl fmt::Display for ProtocolLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Port-based protocol lookup.
///
/// Implementations must be pure: the same ports always give the same label.
pub trait Classifier: Send + Sync {
    fn classify(&self, transport: &TransportFlow) -> ProtocolLabel;
}

impl<F> Classifier for F
where
    F: Fn(&TransportFlow) -> ProtocolLabel + Send + Sync,
{
    fn classify(&self, transport: &TransportFlow) -> ProtocolLabel {
        self(transport)
    }
}

/// Well-known port table.
///
/// The destination port of the flow is checked first, then the source port,
/// so both the client's and the server's view of a flow get the same label.
#[derive(Debug, Clone)]
pub struct PortTable {
    ports: HashMap<u16, ProtocolLabel>,
}

impl PortTable {
    /// Empty table: everything is `unknown`.
    pub fn new() -> Self {
        Self {
            ports: HashMap::new(),
        }
    }

    /// Add or replace a port mapping.
    pub fn with(mut self, port: u16, label: &str) -> Self {
        self.ports.insert(port, ProtocolLabel::new(label));
        self
    }

    pub fn get(&self, port: u16) -> Option<&ProtocolLabel> {
        self.ports.get(&port)
    }
}

impl Default for PortTable {
    /// DNS, HTTP and TLS on their well-known ports.
    fn default() -> Self {
        Self::new().with(53, "dns").with(80, "http").with(443, "tls")
    }
}

impl Classifier for PortTable {
    fn classify(&self, transport: &TransportFlow) -> ProtocolLabel {
        self.get(transport.dst)
            .or_else(|| self.get(transport.src))
            .cloned()
            .unwrap_or_else(ProtocolLabel::unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Default table
    #[test]
    fn test_default_table() {
        let table = PortTable::default();
        assert_eq!(table.classify(&TransportFlow::new(50000, 443)).as_str(), "tls");
        assert_eq!(table.classify(&TransportFlow::new(80, 50000)).as_str(), "http");
        assert_eq!(table.classify(&TransportFlow::new(40000, 53)).as_str(), "dns");
    }

    // Test 2: Unmatched ports
    #[test]
    fn test_unknown_port() {
        let label = PortTable::default().classify(&TransportFlow::new(50000, 8081));
        assert!(label.is_unknown());
        assert_eq!(label.to_string(), "unknown");
    }

    // Test 3: Destination wins when both ports are known
    #[test]
    fn test_destination_first() {
        let table = PortTable::default();
        assert_eq!(table.classify(&TransportFlow::new(53, 443)).as_str(), "tls");
    }

    // Test 4: Closures work as classifiers
    #[test]
    fn test_closure_classifier() {
        let classifier = |t: &TransportFlow| {
            if t.dst == 22 {
                ProtocolLabel::new("ssh")
            } else {
                ProtocolLabel::unknown()
            }
        };
        assert_eq!(classifier.classify(&TransportFlow::new(1, 22)).as_str(), "ssh");
    }

    #[test]
    fn test_custom_entry() {
        let table = PortTable::new().with(6379, "redis");
        assert_eq!(table.classify(&TransportFlow::new(6379, 1)).as_str(), "redis");
        assert!(table.classify(&TransportFlow::new(50000, 80)).is_unknown());
    }
}
