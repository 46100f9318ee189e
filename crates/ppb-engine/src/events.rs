//! Unified event stream for the engine
//!
//! State transitions, command results, structured data and raw traffic are
//! all emitted through one channel so observers see them in a consistent
//! order.

use std::net::SocketAddr;

use ppb_protocol::{Address, CommandData, SequenceReport, TechCommand};

use crate::state::PpbState;

/// Destination of an outgoing datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// One bridge endpoint
    Unicast(SocketAddr),
    /// Every bridge on the local network, at this port
    Broadcast(u16),
}

/// Unified event enum for all engine activity
#[derive(Debug, Clone)]
pub enum EngineEvent {
    // -------------------------------------------------------------------------
    // Address lifecycle events
    // -------------------------------------------------------------------------
    /// An address moved between states
    StateChanged {
        /// Address whose state changed
        address: Address,
        /// Previous state
        from: PpbState,
        /// New state
        to: PpbState,
    },

    /// An address completed its connection handshake
    Connected {
        /// Connected address
        address: Address,
    },

    /// All addresses were disconnected
    Disconnected,

    // -------------------------------------------------------------------------
    // Command events
    // -------------------------------------------------------------------------
    /// A command finished
    CommandCompleted {
        /// Target address
        address: Address,
        /// Finished command
        command: TechCommand,
        /// Whether the command succeeded
        success: bool,
        /// Summary or failure reason
        message: String,
    },

    /// Data packets are arriving for a command
    CommandProgress {
        /// Target address
        address: Address,
        /// Running command
        command: TechCommand,
        /// Packets received so far
        received: usize,
        /// Packets expected
        expected: usize,
    },

    /// A command produced structured data
    DataReady {
        /// Source address
        address: Address,
        /// Producing command
        command: TechCommand,
        /// The data
        data: CommandData,
    },

    /// A received test sequence was compared against the reference
    SequenceAnalyzed {
        /// Source address
        address: Address,
        /// Comparison result
        report: SequenceReport,
    },

    // -------------------------------------------------------------------------
    // Traffic events
    // -------------------------------------------------------------------------
    /// Datagram sent to the bridge
    DatagramOut {
        /// Raw bytes
        data: Vec<u8>,
        /// Destination
        target: Target,
    },

    /// Datagram received from the bridge
    DatagramIn {
        /// Raw bytes
        data: Vec<u8>,
        /// Sender
        from: SocketAddr,
    },

    /// An error occurred
    Error {
        /// Address involved, if any
        address: Option<Address>,
        /// Error message
        message: String,
    },
}

impl EngineEvent {
    /// Check if this is a traffic event
    pub fn is_traffic(&self) -> bool {
        matches!(
            self,
            EngineEvent::DatagramOut { .. } | EngineEvent::DatagramIn { .. }
        )
    }

    /// Get the address if this event is associated with one
    pub fn address(&self) -> Option<Address> {
        match self {
            EngineEvent::StateChanged { address, .. }
            | EngineEvent::Connected { address }
            | EngineEvent::CommandCompleted { address, .. }
            | EngineEvent::CommandProgress { address, .. }
            | EngineEvent::DataReady { address, .. }
            | EngineEvent::SequenceAnalyzed { address, .. } => Some(*address),
            EngineEvent::Error { address, .. } => *address,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traffic_event_classification() {
        let out = EngineEvent::DatagramOut {
            data: vec![0x01, 0x00],
            target: Target::Broadcast(5000),
        };
        assert!(out.is_traffic());
        assert_eq!(out.address(), None);

        let connected = EngineEvent::Connected {
            address: Address(0x0001),
        };
        assert!(!connected.is_traffic());
        assert_eq!(connected.address(), Some(Address(0x0001)));
    }

    #[test]
    fn test_error_address_extraction() {
        let event = EngineEvent::Error {
            address: Some(Address(0x0004)),
            message: "boom".into(),
        };
        assert_eq!(event.address(), Some(Address(0x0004)));
        assert_eq!(EngineEvent::Disconnected.address(), None);
    }
}
