use bytes::Bytes;

use super::notify::CompletionSignal;
use super::{
    BufferStats, Classifier, ConnectionState, Direction, FlowKey, Ingest, NetworkFlow,
    OverlapPolicy, ProtocolLabel, Segment, StateMachine, StreamBuffer, Transition, TransportFlow,
};

/// Why a connection stopped being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionReason {
    /// Both sides sent FIN.
    Closed,
    /// RST seen.
    Reset,
    /// Idle longer than the staleness threshold.
    Idle,
    /// Assembler shut down with the connection still open.
    Shutdown,
}

impl CompletionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionReason::Closed => "closed",
            CompletionReason::Reset => "reset",
            CompletionReason::Idle => "idle",
            CompletionReason::Shutdown => "shutdown",
        }
    }

    /// Whether the connection ended without a clean close.
    pub fn is_forced(&self) -> bool {
        matches!(self, CompletionReason::Idle | CompletionReason::Shutdown)
    }
}

/// The three callbacks the assembler drives for every tracked connection.
pub trait StreamHandler {
    /// Feed a segment's control flags to the lifecycle.
    fn accept(&mut self, segment: &Segment, direction: Direction) -> Transition;

    /// Feed a segment's payload to the direction's buffer.
    fn reassemble(&mut self, segment: &Segment, direction: Direction) -> Ingest;

    /// Finalize, consuming the handler.
    fn complete(self, reason: CompletionReason) -> FinishedStream
    where
        Self: Sized;
}

/// A reassembled connection handed to downstream consumers.
///
/// Flows are oriented client -> server. Each direction's bytes are kept
/// separately and are in strictly increasing sequence order.
#[derive(Debug, Clone)]
pub struct FinishedStream {
    pub network: NetworkFlow,
    pub transport: TransportFlow,
    pub protocol: ProtocolLabel,
    pub to_server: Bytes,
    pub to_client: Bytes,
    pub reason: CompletionReason,
    pub final_state: ConnectionState,
    /// Packet counts.
    pub packets: u64,
    pub payload_packets: u64,
    /// Timing (microseconds).
    pub first_seen_us: i64,
    pub last_seen_us: i64,
    pub to_server_stats: BufferStats,
    pub to_client_stats: BufferStats,
}

impl FinishedStream {
    /// Reconstructed bytes for one direction.
    pub fn payload(&self, direction: Direction) -> &Bytes {
        match direction {
            Direction::ToServer => &self.to_server,
            Direction::ToClient => &self.to_client,
        }
    }

    /// No payload-bearing segment was ever observed.
    pub fn is_empty(&self) -> bool {
        self.payload_packets == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.to_server.len() + self.to_client.len()
    }

    pub fn gap_count(&self) -> u32 {
        self.to_server_stats.gap_count + self.to_client_stats.gap_count
    }
}

/// A tracked TCP connection.
#[derive(Debug)]
pub struct Connection {
    key: FlowKey,
    /// Client -> server orientation.
    net: NetworkFlow,
    transport: TransportFlow,
    protocol: ProtocolLabel,
    state: StateMachine,
    to_server: StreamBuffer,
    to_client: StreamBuffer,
    packets: u64,
    payload_packets: u64,
    first_seen_us: i64,
    last_activity_us: i64,
    published: bool,
    signal: Option<CompletionSignal>,
}

impl Connection {
    /// Create a connection from the first segment seen for its flow.
    pub fn new(
        segment: &Segment,
        classifier: &dyn Classifier,
        policy: OverlapPolicy,
        max_buffered_bytes: usize,
    ) -> Self {
        let (net, transport) = orient(segment);
        Self {
            key: segment.flow_key(),
            net,
            transport,
            protocol: classifier.classify(&transport),
            state: StateMachine::new(),
            to_server: StreamBuffer::new(policy, max_buffered_bytes),
            to_client: StreamBuffer::new(policy, max_buffered_bytes),
            packets: 0,
            payload_packets: 0,
            first_seen_us: segment.timestamp_us,
            last_activity_us: segment.timestamp_us,
            published: false,
            signal: None,
        }
    }

    pub fn key(&self) -> &FlowKey {
        &self.key
    }

    pub fn network_flow(&self) -> &NetworkFlow {
        &self.net
    }

    pub fn transport_flow(&self) -> &TransportFlow {
        &self.transport
    }

    pub fn protocol(&self) -> &ProtocolLabel {
        &self.protocol
    }

    pub fn state(&self) -> ConnectionState {
        self.state.state()
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn payload_packets(&self) -> u64 {
        self.payload_packets
    }

    pub fn last_activity_us(&self) -> i64 {
        self.last_activity_us
    }

    pub fn buffer(&self, direction: Direction) -> &StreamBuffer {
        match direction {
            Direction::ToServer => &self.to_server,
            Direction::ToClient => &self.to_client,
        }
    }

    fn buffer_mut(&mut self, direction: Direction) -> &mut StreamBuffer {
        match direction {
            Direction::ToServer => &mut self.to_server,
            Direction::ToClient => &mut self.to_client,
        }
    }

    /// Determine direction based on source IP/port.
    pub fn direction(&self, segment: &Segment) -> Direction {
        if segment.net.src == self.net.src && segment.transport.src == self.transport.src {
            Direction::ToServer
        } else {
            Direction::ToClient
        }
    }

    /// Record activity; capture timestamps from several workers may interleave.
    pub fn touch(&mut self, timestamp_us: i64) {
        self.last_activity_us = self.last_activity_us.max(timestamp_us);
    }

    pub(crate) fn attach_signal(&mut self, signal: CompletionSignal) {
        self.signal = Some(signal);
    }

    pub(crate) fn take_signal(&mut self) -> Option<CompletionSignal> {
        self.signal.take()
    }

    /// Set the published flag. Returns false if it was already set.
    pub fn mark_published(&mut self) -> bool {
        !std::mem::replace(&mut self.published, true)
    }

    pub fn is_published(&self) -> bool {
        self.published
    }
}

impl StreamHandler for Connection {
    fn accept(&mut self, segment: &Segment, direction: Direction) -> Transition {
        self.packets += 1;
        self.touch(segment.timestamp_us);
        self.state.on_flags(segment.flags, direction)
    }

    fn reassemble(&mut self, segment: &Segment, direction: Direction) -> Ingest {
        let buffer = self.buffer_mut(direction);
        let mut seq = segment.seq;
        if segment.flags.syn {
            buffer.set_initial_seq(seq);
            // SYN payload starts after the SYN's own sequence number
            seq = seq.wrapping_add(1);
        }
        let ingest = buffer.ingest(seq, &segment.payload);
        if segment.has_payload() {
            self.payload_packets += 1;
        }
        ingest
    }

    fn complete(mut self, reason: CompletionReason) -> FinishedStream {
        self.to_server.flush();
        self.to_client.flush();
        FinishedStream {
            network: self.net,
            transport: self.transport,
            protocol: self.protocol,
            to_server_stats: self.to_server.stats(),
            to_client_stats: self.to_client.stats(),
            to_server: self.to_server.take_contiguous(),
            to_client: self.to_client.take_contiguous(),
            reason,
            final_state: self.state.state(),
            packets: self.packets,
            payload_packets: self.payload_packets,
            first_seen_us: self.first_seen_us,
            last_seen_us: self.last_activity_us,
        }
    }
}

/// Orient the first segment's flows client -> server.
///
/// A bare SYN comes from the client and a SYN-ACK from the server; otherwise
/// guess that the lower port is the server.
fn orient(segment: &Segment) -> (NetworkFlow, TransportFlow) {
    let from_client = match (segment.flags.syn, segment.flags.ack) {
        (true, false) => true,
        (true, true) => false,
        _ => segment.transport.src >= segment.transport.dst,
    };
    if from_client {
        (segment.net, segment.transport)
    } else {
        (segment.net.reverse(), segment.transport.reverse())
    }
}
