//! PPB Protocol Library
//!
//! This crate provides the wire format and command catalog for the UDP
//! protocol spoken between a controller and the bridge that fronts up to 16
//! PPB units:
//!
//! - **Address**: 16-bit mask, one bit per unit, `0xFFFF` for broadcast
//! - **Frames**: fixed-size request, acknowledgement and data packet layouts
//! - **CRC-8**: table-driven checksum protecting acks and data packets
//! - **Commands**: the `TechCommand` catalog with per-command reply handling
//! - **PRBS**: the deterministic 256-packet link test sequence
//! - **Analysis**: loss/duplicate/reorder/bit-error comparison of sequences
//!
//! # Architecture
//!
//! Every exchange starts with an 8-byte request. The addressed unit (TU class)
//! or the bridge (FU class) answers with a 4-byte acknowledgement. Commands
//! that return data follow a successful acknowledgement with a run of 4-byte
//! data packets, correlated by their counter byte.
//!
//! # Example
//!
//! ```rust
//! use ppb_protocol::{Address, DataPacket, EncodeFrame, TechCommand};
//!
//! let request = TechCommand::Vers.build_request(Address(0x0001), 0, [0; 3]);
//! assert_eq!(request.encode().len(), 8);
//!
//! let packet = DataPacket::decode(&[0x10, 0x20, 0x00, 0x0C]).unwrap();
//! assert_eq!(packet.counter, 0);
//! ```

pub mod address;
pub mod analysis;
pub mod command;
pub mod crc;
pub mod error;
pub mod frame;
pub mod prbs;

pub use address::{Address, MAX_DEVICES};
pub use analysis::{CounterAnalyzer, SequenceAnalyzer, SequenceReport};
pub use command::{
    BerKind, CommandData, OkAction, PacketCount, ParsedOutcome, TechCommand, TimeoutVerdict,
};
pub use crc::{check_crc, crc8};
pub use error::{DecodeError, ProtocolError};
pub use frame::{BridgeResponse, DataPacket, PpbResponse, Request, SignalClass};

/// Function code of a raw FU transmit request
pub const FU_TRANSMIT: u8 = 0x10;
/// Function code of a raw FU receive request
pub const FU_RECEIVE: u8 = 0x11;

/// Trait for frames that can be encoded to bytes
pub trait EncodeFrame {
    /// Encode this frame to its wire format
    fn encode(&self) -> Vec<u8>;
}

/// Direction of a raw functional request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FuDirection {
    /// Controller to unit
    Transmit,
    /// Unit to controller
    Receive,
}

impl FuDirection {
    /// Function code carried in `aux0`
    pub fn function_code(&self) -> u8 {
        match self {
            FuDirection::Transmit => FU_TRANSMIT,
            FuDirection::Receive => FU_RECEIVE,
        }
    }

    /// Build the fire-and-forget request frame
    pub fn build_request(&self, address: Address, period: u8, data: [u8; 2]) -> Request {
        Request::fu(address, self.function_code(), period, data)
    }
}
