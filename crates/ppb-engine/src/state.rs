//! Per-address state tracking

use ppb_protocol::Address;
use serde::{Deserialize, Serialize};

/// Lifecycle state of one address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PpbState {
    /// Not connected
    #[default]
    Idle,
    /// Request sent, waiting for the acknowledgement
    SendingCommand,
    /// Acknowledged, waiting for data packets
    WaitingData,
    /// Connected and idle
    Ready,
}

impl PpbState {
    /// Whether a new command may be dispatched from this state
    pub fn is_rest(&self) -> bool {
        matches!(self, Self::Idle | Self::Ready)
    }

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::SendingCommand => "Sending command",
            Self::WaitingData => "Waiting for data",
            Self::Ready => "Ready",
        }
    }
}

/// System-wide lock on multi-packet replies
///
/// Data packets carry no address, so only one address may have a data
/// dialog open at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DialogGate {
    holder: Option<Address>,
}

impl DialogGate {
    /// Address currently holding the gate
    pub fn holder(&self) -> Option<Address> {
        self.holder
    }

    /// Whether any address holds the gate
    pub fn is_held(&self) -> bool {
        self.holder.is_some()
    }

    /// Whether `address` may open a data dialog now
    pub fn allows(&self, address: Address) -> bool {
        !matches!(self.holder, Some(h) if h != address)
    }

    /// Take the gate; fails if another address holds it
    pub fn acquire(&mut self, address: Address) -> bool {
        if !self.allows(address) {
            return false;
        }
        self.holder = Some(address);
        true
    }

    /// Release the gate if `address` holds it
    pub fn release(&mut self, address: Address) -> bool {
        if self.holder == Some(address) {
            self.holder = None;
            true
        } else {
            false
        }
    }

    /// Drop the gate regardless of holder
    pub fn clear(&mut self) {
        self.holder = None;
    }
}
