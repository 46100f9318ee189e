//! Fixed-size PPB wire frames
//!
//! # Frame Formats
//! ```text
//! Request (8):      [addr_lo] [addr_hi] [opcode] [class] [period] [aux0] [aux1] [aux2]
//! TU ack (4):       [addr_lo] [addr_hi] [status] [crc8(addr_lo, addr_hi, status)]
//! FU ack (4):       [addr_lo] [addr_hi] [function] [status]
//! Data packet (4):  [data0] [data1] [counter] [crc8(data0, data1, counter)]
//! ```
//!
//! TU requests carry the command opcode directly. FU requests always send
//! opcode 0 and put the function code in `aux0`; the bridge echoes that
//! function code in its acknowledgement.

use crate::address::Address;
use crate::crc::crc8;
use crate::error::DecodeError;
use crate::EncodeFrame;

/// Size of a request frame
pub const REQUEST_LEN: usize = 8;
/// Size of both acknowledgement shapes
pub const ACK_LEN: usize = 4;
/// Size of a data packet
pub const DATA_PACKET_LEN: usize = 4;

/// Status byte of a successful acknowledgement
pub const STATUS_OK: u8 = 0x00;

/// Signaling class of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SignalClass {
    /// Technical control: answered by the unit itself with a CRC-protected ack
    Tu = 0,
    /// Functional: answered by the bridge with an opcode-echo ack
    Fu = 1,
}

impl SignalClass {
    /// Wire value
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Request frame sent to the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// Target device mask
    pub address: Address,
    /// Command opcode (0 for FU requests)
    pub opcode: u8,
    /// Signaling class
    pub class: SignalClass,
    /// Repetition period
    pub period: u8,
    /// Auxiliary bytes
    pub aux: [u8; 3],
}

impl Request {
    /// Build a TU request for an opcode
    pub fn tu(address: Address, opcode: u8, period: u8, aux: [u8; 3]) -> Self {
        Self {
            address,
            opcode,
            class: SignalClass::Tu,
            period,
            aux,
        }
    }

    /// Build an FU request for a function code
    pub fn fu(address: Address, function: u8, period: u8, data: [u8; 2]) -> Self {
        Self {
            address,
            opcode: 0,
            class: SignalClass::Fu,
            period,
            aux: [function, data[0], data[1]],
        }
    }

    /// Function code of an FU request
    pub fn function(&self) -> Option<u8> {
        match self.class {
            SignalClass::Fu => Some(self.aux[0]),
            SignalClass::Tu => None,
        }
    }

    /// Decode a request frame (used by the simulator)
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let bytes: [u8; REQUEST_LEN] = fixed(bytes)?;
        let class = if bytes[3] == SignalClass::Fu.as_u8() {
            SignalClass::Fu
        } else {
            SignalClass::Tu
        };
        Ok(Self {
            address: Address::from_le_bytes([bytes[0], bytes[1]]),
            opcode: bytes[2],
            class,
            period: bytes[4],
            aux: [bytes[5], bytes[6], bytes[7]],
        })
    }

    /// Encode to the fixed 8-byte layout
    pub fn to_bytes(&self) -> [u8; REQUEST_LEN] {
        let addr = self.address.to_le_bytes();
        [
            addr[0],
            addr[1],
            self.opcode,
            self.class.as_u8(),
            self.period,
            self.aux[0],
            self.aux[1],
            self.aux[2],
        ]
    }
}

impl EncodeFrame for Request {
    fn encode(&self) -> Vec<u8> {
        self.to_bytes().to_vec()
    }
}

/// Acknowledgement sent by a unit for a TU request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpbResponse {
    /// Acknowledging device
    pub address: Address,
    /// Status code (0 = OK)
    pub status: u8,
}

impl PpbResponse {
    /// Decode and verify the CRC
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let bytes: [u8; ACK_LEN] = fixed(bytes)?;
        let expected = crc8(&bytes[..3]);
        if expected != bytes[3] {
            return Err(DecodeError::CrcMismatch {
                expected,
                actual: bytes[3],
            });
        }
        Ok(Self {
            address: Address::from_le_bytes([bytes[0], bytes[1]]),
            status: bytes[2],
        })
    }

    /// Whether the unit accepted the command
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

impl EncodeFrame for PpbResponse {
    fn encode(&self) -> Vec<u8> {
        let addr = self.address.to_le_bytes();
        let head = [addr[0], addr[1], self.status];
        vec![head[0], head[1], head[2], crc8(&head)]
    }
}

/// Acknowledgement sent by the bridge for an FU request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeResponse {
    /// Acknowledged address mask
    pub address: Address,
    /// Echo of the request's function code
    pub opcode: u8,
    /// Status code (0 = OK)
    pub status: u8,
}

impl BridgeResponse {
    /// Decode an FU acknowledgement
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let bytes: [u8; ACK_LEN] = fixed(bytes)?;
        Ok(Self {
            address: Address::from_le_bytes([bytes[0], bytes[1]]),
            opcode: bytes[2],
            status: bytes[3],
        })
    }

    /// Whether the bridge accepted the command
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

impl EncodeFrame for BridgeResponse {
    fn encode(&self) -> Vec<u8> {
        let addr = self.address.to_le_bytes();
        vec![addr[0], addr[1], self.opcode, self.status]
    }
}

/// One 4-byte data packet of a multi-packet reply or test stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataPacket {
    /// Two payload bytes
    pub data: [u8; 2],
    /// Sequence counter (0..=255)
    pub counter: u8,
    /// CRC-8 over `data[0], data[1], counter` as received
    pub crc: u8,
}

impl DataPacket {
    /// Build a packet with a freshly computed CRC
    pub fn new(data: [u8; 2], counter: u8) -> Self {
        let crc = crc8(&[data[0], data[1], counter]);
        Self { data, counter, crc }
    }

    /// Decode and verify the CRC
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let packet = Self::decode_unchecked(bytes)?;
        let expected = packet.expected_crc();
        if expected != packet.crc {
            return Err(DecodeError::CrcMismatch {
                expected,
                actual: packet.crc,
            });
        }
        Ok(packet)
    }

    /// Decode without verifying the CRC
    ///
    /// Test sequences keep corrupted entries so they can be counted.
    pub fn decode_unchecked(bytes: &[u8]) -> Result<Self, DecodeError> {
        let bytes: [u8; DATA_PACKET_LEN] = fixed(bytes)?;
        Ok(Self {
            data: [bytes[0], bytes[1]],
            counter: bytes[2],
            crc: bytes[3],
        })
    }

    /// CRC the packet should carry
    pub fn expected_crc(&self) -> u8 {
        crc8(&[self.data[0], self.data[1], self.counter])
    }

    /// Whether the carried CRC matches the payload
    pub fn is_valid(&self) -> bool {
        self.expected_crc() == self.crc
    }

    /// Payload as a little-endian u16
    pub fn value(&self) -> u16 {
        u16::from_le_bytes(self.data)
    }

    /// Fixed 4-byte layout
    pub fn to_bytes(&self) -> [u8; DATA_PACKET_LEN] {
        [self.data[0], self.data[1], self.counter, self.crc]
    }
}

impl EncodeFrame for DataPacket {
    fn encode(&self) -> Vec<u8> {
        self.to_bytes().to_vec()
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], DecodeError> {
    bytes.try_into().map_err(|_| DecodeError::WrongSize {
        expected: N,
        actual: bytes.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_tu_request() {
        let req = Request::tu(Address(0x0102), 0x03, 5, [0xAA, 0xBB, 0xCC]);
        assert_eq!(
            req.encode(),
            vec![0x02, 0x01, 0x03, 0x00, 0x05, 0xAA, 0xBB, 0xCC]
        );
    }

    #[test]
    fn test_encode_fu_request_uses_opcode_zero() {
        let req = Request::fu(Address(0x0002), 0x0A, 0, [0x11, 0x22]);
        let bytes = req.encode();
        assert_eq!(bytes[2], 0x00);
        assert_eq!(bytes[3], 0x01);
        assert_eq!(&bytes[5..], &[0x0A, 0x11, 0x22]);
        assert_eq!(Request::decode(&bytes).unwrap().function(), Some(0x0A));
    }

    #[test]
    fn test_decode_tu_ack() {
        let bytes = PpbResponse {
            address: Address(0x0001),
            status: 0,
        }
        .encode();
        assert_eq!(bytes, vec![0x01, 0x00, 0x00, 0x6B]);

        let ack = PpbResponse::decode(&bytes).unwrap();
        assert_eq!(ack.address, Address(0x0001));
        assert!(ack.is_ok());
    }

    #[test]
    fn test_tu_ack_crc_mismatch() {
        let err = PpbResponse::decode(&[0x01, 0x00, 0x00, 0x6C]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::CrcMismatch {
                expected: 0x6B,
                actual: 0x6C
            }
        );
    }

    #[test]
    fn test_decode_fu_ack() {
        let ack = BridgeResponse::decode(&[0x02, 0x00, 0x0A, 0x03]).unwrap();
        assert_eq!(ack.address, Address(0x0002));
        assert_eq!(ack.opcode, 0x0A);
        assert!(!ack.is_ok());
    }

    #[test]
    fn test_wrong_size_is_reported() {
        assert_eq!(
            DataPacket::decode(&[1, 2, 3]).unwrap_err(),
            DecodeError::WrongSize {
                expected: 4,
                actual: 3
            }
        );
        assert!(matches!(
            Request::decode(&[0; 9]),
            Err(DecodeError::WrongSize { expected: 8, .. })
        ));
    }

    #[test]
    fn test_data_packet_crc() {
        let packet = DataPacket::new([0x10, 0x20], 0);
        assert_eq!(packet.crc, 0x0C);
        assert!(packet.is_valid());

        let mut bytes = packet.to_bytes();
        bytes[0] ^= 0x01;
        assert!(matches!(
            DataPacket::decode(&bytes),
            Err(DecodeError::CrcMismatch { .. })
        ));
        assert!(!DataPacket::decode_unchecked(&bytes).unwrap().is_valid());
    }

    proptest! {
        #[test]
        fn data_packet_survives_the_wire(d0 in any::<u8>(), d1 in any::<u8>(), counter in any::<u8>()) {
            let packet = DataPacket::new([d0, d1], counter);
            prop_assert_eq!(DataPacket::decode(&packet.encode()).unwrap(), packet);
        }
    }
}
