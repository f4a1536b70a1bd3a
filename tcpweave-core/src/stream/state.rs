use super::{Direction, TcpFlags};

/// TCP connection state as observed by a passive tap.
///
/// `ClosingLocal` means the client (connection initiator) sent the first FIN,
/// `ClosingRemote` means the server did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unseen,
    SynSeen,
    Established,
    ClosingLocal,
    ClosingRemote,
    Closed,
    Reset,
}

impl ConnectionState {
    /// Return a string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Unseen => "unseen",
            ConnectionState::SynSeen => "syn_seen",
            ConnectionState::Established => "established",
            ConnectionState::ClosingLocal => "closing_local",
            ConnectionState::ClosingRemote => "closing_remote",
            ConnectionState::Closed => "closed",
            ConnectionState::Reset => "reset",
        }
    }

    /// `Closed` and `Reset` end the connection.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Reset)
    }
}

/// Outcome of feeding one segment's flags to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State did not change (data, ACKs, duplicate flags).
    Steady(ConnectionState),
    /// State moved.
    Advanced {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Flags make no sense in the current state; state kept as-is.
    Anomaly {
        state: ConnectionState,
        reason: &'static str,
    },
}

impl Transition {
    /// The state after this transition.
    pub fn state(&self) -> ConnectionState {
        match *self {
            Transition::Steady(s) => s,
            Transition::Advanced { to, .. } => to,
            Transition::Anomaly { state, .. } => state,
        }
    }

    /// True only on the transition that enters `Closed` or `Reset`.
    pub fn entered_terminal(&self) -> bool {
        matches!(self, Transition::Advanced { to, .. } if to.is_terminal())
    }
}

/// Flag-driven lifecycle tracker for one connection.
///
/// Tolerates captures that start mid-stream (no SYN) or miss packets, and
/// never refuses input: unexpected flags are reported as
/// [`Transition::Anomaly`] and leave the state untouched.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: ConnectionState,
    anomalies: u32,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Unseen,
            anomalies: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of anomalous segments seen so far.
    pub fn anomalies(&self) -> u32 {
        self.anomalies
    }

    /// Update connection state based on TCP flags.
    pub fn on_flags(&mut self, flags: TcpFlags, direction: Direction) -> Transition {
        use ConnectionState::*;

        let from = self.state;
        if from.is_terminal() {
            return self.anomaly("segment after connection ended");
        }

        if flags.rst {
            self.state = Reset;
            return Transition::Advanced { from, to: Reset };
        }

        let closing = match direction {
            Direction::ToServer => ClosingLocal,
            Direction::ToClient => ClosingRemote,
        };

        let to = match (from, flags.syn, flags.fin) {
            (Unseen, true, _) => SynSeen,
            // Mid-stream capture start
            (Unseen, false, false) => Established,
            (Unseen, false, true) => closing,

            // SYN-ACK or retransmitted SYN
            (SynSeen, true, _) => SynSeen,
            (SynSeen, false, false) => Established,
            (SynSeen, false, true) => closing,

            (Established | ClosingLocal | ClosingRemote, true, _) => {
                return self.anomaly("SYN on established connection");
            }

            (Established, false, true) => closing,

            // Second FIN from the other side
            (ClosingLocal, false, true) if direction == Direction::ToClient => Closed,
            (ClosingRemote, false, true) if direction == Direction::ToServer => Closed,

            // Stay in current state
            (current, _, _) => current,
        };

        self.state = to;
        if to == from {
            Transition::Steady(to)
        } else {
            Transition::Advanced { from, to }
        }
    }

    fn anomaly(&mut self, reason: &'static str) -> Transition {
        self.anomalies += 1;
        Transition::Anomaly {
            state: self.state,
            reason,
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    fn fin() -> TcpFlags {
        TcpFlags::FIN_ACK
    }

    // Test 1: SYN -> SYN-ACK -> ACK
    #[test]
    fn test_three_way_handshake() {
        let mut fsm = StateMachine::new();
        assert_eq!(
            fsm.on_flags(TcpFlags::SYN, Direction::ToServer),
            Transition::Advanced {
                from: Unseen,
                to: SynSeen
            }
        );
        assert_eq!(
            fsm.on_flags(TcpFlags::SYN_ACK, Direction::ToClient),
            Transition::Steady(SynSeen)
        );
        assert_eq!(
            fsm.on_flags(TcpFlags::ACK, Direction::ToServer).state(),
            Established
        );
    }

    // Test 2: FIN from client, then server
    #[test]
    fn test_graceful_close_client_first() {
        let mut fsm = StateMachine::new();
        fsm.on_flags(TcpFlags::ACK, Direction::ToServer);
        assert_eq!(fsm.on_flags(fin(), Direction::ToServer).state(), ClosingLocal);

        let t = fsm.on_flags(fin(), Direction::ToClient);
        assert_eq!(t.state(), Closed);
        assert!(t.entered_terminal());
    }

    // Test 3: FIN from server first
    #[test]
    fn test_graceful_close_server_first() {
        let mut fsm = StateMachine::new();
        fsm.on_flags(TcpFlags::ACK, Direction::ToClient);
        assert_eq!(fsm.on_flags(fin(), Direction::ToClient).state(), ClosingRemote);
        assert_eq!(fsm.on_flags(fin(), Direction::ToServer).state(), Closed);
    }

    // Test 4: Duplicate FIN from the same side is idempotent
    #[test]
    fn test_duplicate_fin() {
        let mut fsm = StateMachine::new();
        fsm.on_flags(TcpFlags::ACK, Direction::ToServer);
        fsm.on_flags(fin(), Direction::ToServer);
        assert_eq!(
            fsm.on_flags(fin(), Direction::ToServer),
            Transition::Steady(ClosingLocal)
        );
        assert_eq!(fsm.anomalies(), 0);
    }

    // Test 5: RST from any non-terminal state
    #[test]
    fn test_rst_from_every_state() {
        for setup in [
            vec![],
            vec![(TcpFlags::SYN, Direction::ToServer)],
            vec![(TcpFlags::ACK, Direction::ToServer)],
            vec![
                (TcpFlags::ACK, Direction::ToServer),
                (fin(), Direction::ToClient),
            ],
        ] {
            let mut fsm = StateMachine::new();
            for (flags, dir) in setup {
                fsm.on_flags(flags, dir);
            }
            let t = fsm.on_flags(TcpFlags::RST, Direction::ToClient);
            assert!(t.entered_terminal());
            assert_eq!(fsm.state(), Reset);
        }
    }

    // Test 6: Mid-stream capture start enters Established directly
    #[test]
    fn test_mid_stream() {
        let mut fsm = StateMachine::new();
        let t = fsm.on_flags(TcpFlags::ACK, Direction::ToClient);
        assert_eq!(
            t,
            Transition::Advanced {
                from: Unseen,
                to: Established
            }
        );
    }

    // Test 7: Second SYN after Established is an anomaly, not a failure
    #[test]
    fn test_syn_after_established() {
        let mut fsm = StateMachine::new();
        fsm.on_flags(TcpFlags::ACK, Direction::ToServer);
        let t = fsm.on_flags(TcpFlags::SYN, Direction::ToServer);
        assert!(matches!(t, Transition::Anomaly { state: Established, .. }));
        assert_eq!(fsm.state(), Established);
        assert_eq!(fsm.anomalies(), 1);

        // Still usable afterwards
        assert_eq!(fsm.on_flags(fin(), Direction::ToServer).state(), ClosingLocal);
    }

    // Test 8: Data after Reset
    #[test]
    fn test_data_after_reset() {
        let mut fsm = StateMachine::new();
        fsm.on_flags(TcpFlags::RST, Direction::ToServer);
        let t = fsm.on_flags(TcpFlags::ACK, Direction::ToServer);
        assert!(matches!(t, Transition::Anomaly { state: Reset, .. }));
        assert!(!t.entered_terminal());
        // A second RST does not re-enter the terminal state
        assert!(!fsm.on_flags(TcpFlags::RST, Direction::ToServer).entered_terminal());
    }

    // Test 9: Teardown-only capture
    #[test]
    fn test_fin_as_first_segment() {
        let mut fsm = StateMachine::new();
        assert_eq!(fsm.on_flags(fin(), Direction::ToClient).state(), ClosingRemote);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ClosingLocal.as_str(), "closing_local");
        assert!(Closed.is_terminal());
        assert!(!SynSeen.is_terminal());
    }
}
