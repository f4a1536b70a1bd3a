use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::{Classifier, Connection, FlowKey, OverlapPolicy, Segment};

/// Live connections keyed by normalized flow.
///
/// Not synchronized; the assembler guards it with a single lock.
#[derive(Debug)]
pub struct StreamRegistry {
    connections: HashMap<FlowKey, Connection>,
    policy: OverlapPolicy,
    max_buffered_bytes: usize,
}

impl StreamRegistry {
    pub fn new(policy: OverlapPolicy, max_buffered_bytes: usize) -> Self {
        Self {
            connections: HashMap::new(),
            policy,
            max_buffered_bytes,
        }
    }

    /// Find the connection for a segment, creating it on first sight.
    ///
    /// Both directions of a flow resolve to the same connection. The bool is
    /// true when the connection was just created.
    pub fn resolve(
        &mut self,
        segment: &Segment,
        classifier: &dyn Classifier,
    ) -> (&mut Connection, bool) {
        match self.connections.entry(segment.flow_key()) {
            Entry::Occupied(entry) => (entry.into_mut(), false),
            Entry::Vacant(entry) => {
                let conn = Connection::new(
                    segment,
                    classifier,
                    self.policy,
                    self.max_buffered_bytes,
                );
                (entry.insert(conn), true)
            }
        }
    }

    pub fn get(&self, key: &FlowKey) -> Option<&Connection> {
        self.connections.get(key)
    }

    /// Remove a connection. Removing an absent key is a no-op.
    pub fn remove(&mut self, key: &FlowKey) -> Option<Connection> {
        self.connections.remove(key)
    }

    /// Keys of connections with no activity at or after `cutoff_us`.
    pub fn stale_keys(&self, cutoff_us: i64) -> Vec<FlowKey> {
        self.connections
            .iter()
            .filter(|(_, conn)| conn.last_activity_us() < cutoff_us)
            .map(|(key, _)| *key)
            .collect()
    }

    /// Remove every connection.
    pub fn drain(&mut self) -> Vec<Connection> {
        self.connections.drain().map(|(_, conn)| conn).collect()
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new(OverlapPolicy::default(), 16 * 1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{NetworkFlow, PortTable, TcpFlags, TransportFlow};
    use std::net::{IpAddr, Ipv4Addr};

    fn seg(src: u8, dst: u8, sport: u16, dport: u16, ts: i64) -> Segment {
        Segment::new(
            NetworkFlow::new(
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, src)),
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, dst)),
            ),
            TransportFlow::new(sport, dport),
            1,
            TcpFlags::ACK,
            &b""[..],
            ts,
        )
    }

    // Test 1: Both directions share one connection
    #[test]
    fn test_resolve_both_directions() {
        let mut registry = StreamRegistry::default();
        let table = PortTable::default();

        let (_, created) = registry.resolve(&seg(1, 2, 40000, 80, 0), &table);
        assert!(created);
        let (_, created) = registry.resolve(&seg(2, 1, 80, 40000, 1), &table);
        assert!(!created);
        assert_eq!(registry.len(), 1);
    }

    // Test 2: Distinct 4-tuples are distinct connections
    #[test]
    fn test_distinct_flows() {
        let mut registry = StreamRegistry::default();
        let table = PortTable::default();
        registry.resolve(&seg(1, 2, 40000, 80, 0), &table);
        registry.resolve(&seg(1, 2, 40001, 80, 0), &table);
        assert_eq!(registry.len(), 2);
    }

    // Test 3: Remove is idempotent
    #[test]
    fn test_remove_twice() {
        let mut registry = StreamRegistry::default();
        let segment = seg(1, 2, 40000, 80, 0);
        registry.resolve(&segment, &PortTable::default());

        assert!(registry.remove(&segment.flow_key()).is_some());
        assert!(registry.remove(&segment.flow_key()).is_none());
        assert!(registry.is_empty());
    }

    // Test 4: Staleness is judged on last activity
    #[test]
    fn test_stale_keys() {
        let mut registry = StreamRegistry::default();
        let table = PortTable::default();
        let old = seg(1, 2, 40000, 80, 100);
        let fresh = seg(1, 2, 40001, 80, 500);
        registry.resolve(&old, &table);
        registry.resolve(&fresh, &table);

        assert_eq!(registry.stale_keys(200), vec![old.flow_key()]);
        assert!(registry.stale_keys(100).is_empty());
        assert_eq!(registry.stale_keys(1000).len(), 2);
    }

    #[test]
    fn test_drain() {
        let mut registry = StreamRegistry::default();
        let table = PortTable::default();
        registry.resolve(&seg(1, 2, 40000, 80, 0), &table);
        registry.resolve(&seg(3, 4, 40000, 80, 0), &table);
        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }
}
