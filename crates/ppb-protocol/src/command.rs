//! PPB command catalog
//!
//! One descriptor per protocol command. Each `TechCommand` knows its wire
//! opcode, signaling class, how many data packets follow a successful
//! acknowledgement and how long to wait for them, plus what to do once the
//! acknowledgement or the data arrives.
//!
//! # Catalog
//!
//! | Command  | Opcode | Class | Reply packets | Timeout |
//! |----------|--------|-------|---------------|---------|
//! | TS       | 0x01   | TU    | 7..=9         | 1000 ms |
//! | TC       | 0x02   | TU    | 0             | 500 ms  |
//! | VERS     | 0x03   | TU    | 2             | 1000 ms |
//! | VOLUME   | 0x04   | TU    | 0             | 500 ms  |
//! | CHECKSUM | 0x05   | TU    | 2             | 3000 ms |
//! | PROGRAMM | 0x06   | TU    | 0             | 5000 ms |
//! | CLEAN    | 0x07   | TU    | 0             | 3000 ms |
//! | DROP     | 0x08   | FU    | 2             | 1000 ms |
//! | PRBS_M2S | 0x09   | FU    | 0 (streams)   | 2000 ms |
//! | PRBS_S2M | 0x0A   | FU    | 256           | 5000 ms |
//! | BER_T    | 0x0B   | FU    | 2             | 1000 ms |
//! | BER_F    | 0x0C   | FU    | 2             | 1000 ms |

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::address::Address;
use crate::error::ProtocolError;
use crate::frame::{DataPacket, Request, SignalClass};
use crate::prbs::{generate_sequence, SEQUENCE_LEN};

/// Protocol commands understood by PPB units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TechCommand {
    /// Status dump
    Ts,
    /// Technical control
    Tc,
    /// Firmware version (CRC32 of the image)
    Vers,
    /// Volume setting
    Volume,
    /// Firmware checksum
    Checksum,
    /// Start programming
    Programm,
    /// Erase
    Clean,
    /// Dropped packet counter
    Drop,
    /// Stream the test sequence to the unit
    PrbsM2s,
    /// Receive the test sequence from the unit
    PrbsS2m,
    /// Bit errors on the transmit path
    BerT,
    /// Bit errors on the receive path
    BerF,
}

/// Inclusive range of data packets a command expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PacketCount {
    /// Fewest packets that still form a complete reply
    pub min: usize,
    /// Packets after which the reply is certainly complete
    pub max: usize,
}

impl PacketCount {
    /// No data follows the acknowledgement
    pub const NONE: PacketCount = PacketCount { min: 0, max: 0 };

    /// Exactly `n` packets
    pub const fn exactly(n: usize) -> Self {
        Self { min: n, max: n }
    }

    /// Whether any data is expected
    pub fn expects_data(&self) -> bool {
        self.max > 0
    }
}

impl fmt::Display for PacketCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.max)
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}

/// Which bit-error counter a BER command reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BerKind {
    /// Transmit path
    Transmit,
    /// Receive path
    Receive,
}

/// Structured result produced by command-specific reply handling
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CommandData {
    /// Raw status dump packets (decoded by the caller)
    Status { packets: Vec<DataPacket> },
    /// Firmware version as CRC32
    Version { crc32: u32 },
    /// Firmware checksum
    Checksum { value: u32 },
    /// Dropped packet count
    DroppedPackets { count: u32 },
    /// Bit-error count scaled by 1e-6
    BitErrors { kind: BerKind, value: f64 },
    /// Test sequence streamed to the unit
    PrbsSent { packets: Vec<DataPacket> },
    /// Test sequence received from the unit
    PrbsReceived {
        packets: Vec<DataPacket>,
        expected: usize,
        parse_errors: usize,
    },
}

/// What the engine should do after a successful acknowledgement
#[derive(Debug, Clone, PartialEq)]
pub enum OkAction {
    /// The operation is finished
    Complete { message: String },
    /// Wait for data packets
    AwaitData { expected: PacketCount, timeout: Duration },
    /// Send these packets to the unit, then finish
    Stream {
        packets: Vec<DataPacket>,
        result: ParsedOutcome,
    },
}

/// Command-specific interpretation of the received data
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutcome {
    /// Whether the data made sense
    pub success: bool,
    /// Human-readable summary
    pub message: String,
    /// Structured data for collaborators
    pub data: Option<CommandData>,
}

impl ParsedOutcome {
    fn ok(message: impl Into<String>, data: CommandData) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

/// How a deadline expiry in the data phase should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutVerdict {
    /// Enough packets arrived; the reply is complete
    Complete,
    /// Some packets arrived before the deadline
    PartialData { received: usize, expected: usize },
    /// Nothing arrived
    NoData,
}

impl TechCommand {
    /// Every command in catalog order
    pub const ALL: [TechCommand; 12] = [
        TechCommand::Ts,
        TechCommand::Tc,
        TechCommand::Vers,
        TechCommand::Volume,
        TechCommand::Checksum,
        TechCommand::Programm,
        TechCommand::Clean,
        TechCommand::Drop,
        TechCommand::PrbsM2s,
        TechCommand::PrbsS2m,
        TechCommand::BerT,
        TechCommand::BerF,
    ];

    /// Wire opcode (function code for FU commands)
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Ts => 0x01,
            Self::Tc => 0x02,
            Self::Vers => 0x03,
            Self::Volume => 0x04,
            Self::Checksum => 0x05,
            Self::Programm => 0x06,
            Self::Clean => 0x07,
            Self::Drop => 0x08,
            Self::PrbsM2s => 0x09,
            Self::PrbsS2m => 0x0A,
            Self::BerT => 0x0B,
            Self::BerF => 0x0C,
        }
    }

    /// Protocol name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ts => "TS",
            Self::Tc => "TC",
            Self::Vers => "VERS",
            Self::Volume => "VOLUME",
            Self::Checksum => "CHECKSUM",
            Self::Programm => "PROGRAMM",
            Self::Clean => "CLEAN",
            Self::Drop => "DROP",
            Self::PrbsM2s => "PRBS_M2S",
            Self::PrbsS2m => "PRBS_S2M",
            Self::BerT => "BER_T",
            Self::BerF => "BER_F",
        }
    }

    /// Signaling class, which also decides the acknowledgement shape
    pub fn signal_class(&self) -> SignalClass {
        match self {
            Self::Ts
            | Self::Tc
            | Self::Vers
            | Self::Volume
            | Self::Checksum
            | Self::Programm
            | Self::Clean => SignalClass::Tu,
            Self::Drop | Self::PrbsM2s | Self::PrbsS2m | Self::BerT | Self::BerF => {
                SignalClass::Fu
            }
        }
    }

    /// Data packets following a successful acknowledgement
    pub fn expected_packets(&self) -> PacketCount {
        match self {
            Self::Ts => PacketCount { min: 7, max: 9 },
            Self::Vers | Self::Checksum | Self::Drop | Self::BerT | Self::BerF => {
                PacketCount::exactly(2)
            }
            Self::PrbsS2m => PacketCount::exactly(SEQUENCE_LEN),
            Self::Tc | Self::Volume | Self::Programm | Self::Clean | Self::PrbsM2s => {
                PacketCount::NONE
            }
        }
    }

    /// Whether the command holds the dialog gate while it runs
    pub fn expects_data(&self) -> bool {
        self.expected_packets().expects_data()
    }

    /// Whether the exchange only works with one unit at a time
    ///
    /// Everything else may go to several units, or all of them, unacknowledged.
    pub fn needs_single_unit(&self) -> bool {
        self.expects_data() || *self == Self::PrbsM2s
    }

    /// Deadline for the acknowledgement and for the data phase
    pub fn timeout(&self) -> Duration {
        let ms = match self {
            Self::Ts => 1000,
            Self::Tc => 500,
            Self::Vers => 1000,
            Self::Volume => 500,
            Self::Checksum => 3000,
            Self::Programm => 5000,
            Self::Clean => 3000,
            Self::Drop => 1000,
            Self::PrbsM2s => 2000,
            Self::PrbsS2m => 5000,
            Self::BerT => 1000,
            Self::BerF => 1000,
        };
        Duration::from_millis(ms)
    }

    /// Whether CRC-failed data packets are kept for reporting
    pub fn keeps_corrupt_packets(&self) -> bool {
        matches!(self, Self::PrbsS2m)
    }

    /// Build the request frame for this command
    pub fn build_request(&self, address: Address, period: u8, aux: [u8; 3]) -> Request {
        match self.signal_class() {
            SignalClass::Tu => Request::tu(address, self.opcode(), period, aux),
            SignalClass::Fu => Request::fu(address, self.opcode(), period, [aux[0], aux[1]]),
        }
    }

    /// Decide the next step after an OK acknowledgement
    pub fn on_ok_received(&self) -> OkAction {
        match self {
            Self::PrbsM2s => {
                let packets = generate_sequence();
                let result = ParsedOutcome::ok(
                    format!("{} packets sent", packets.len()),
                    CommandData::PrbsSent {
                        packets: packets.clone(),
                    },
                );
                OkAction::Stream { packets, result }
            }
            cmd if cmd.expects_data() => OkAction::AwaitData {
                expected: cmd.expected_packets(),
                timeout: cmd.timeout(),
            },
            cmd => OkAction::Complete {
                message: format!("{} OK", cmd.name()),
            },
        }
    }

    /// Interpret the buffered data packets (possibly a partial reply)
    pub fn on_data_received(&self, packets: &[DataPacket], expected: PacketCount) -> ParsedOutcome {
        match self {
            Self::Ts => ParsedOutcome {
                success: packets.len() >= expected.min,
                message: format!("status received: {} packets", packets.len()),
                data: Some(CommandData::Status {
                    packets: packets.to_vec(),
                }),
            },
            Self::Vers => parse_u32(packets).map_or_else(
                || ParsedOutcome::failed("version reply incomplete"),
                |crc32| {
                    ParsedOutcome::ok(
                        format!("version CRC32 0x{:08X}", crc32),
                        CommandData::Version { crc32 },
                    )
                },
            ),
            Self::Checksum => parse_u32(packets).map_or_else(
                || ParsedOutcome::failed("checksum reply incomplete"),
                |value| {
                    ParsedOutcome::ok(
                        format!("checksum 0x{:08X}", value),
                        CommandData::Checksum { value },
                    )
                },
            ),
            Self::Drop => parse_u32(packets).map_or_else(
                || ParsedOutcome::failed("drop counter reply incomplete"),
                |count| {
                    ParsedOutcome::ok(
                        format!("{} packets dropped", count),
                        CommandData::DroppedPackets { count },
                    )
                },
            ),
            Self::BerT | Self::BerF => {
                let kind = if *self == Self::BerT {
                    BerKind::Transmit
                } else {
                    BerKind::Receive
                };
                parse_u32(packets).map_or_else(
                    || ParsedOutcome::failed("bit error reply incomplete"),
                    |raw| {
                        let value = raw as f64 / 1_000_000.0;
                        ParsedOutcome::ok(
                            format!("{} bit errors: {:.6}", self.name(), value),
                            CommandData::BitErrors { kind, value },
                        )
                    },
                )
            }
            Self::PrbsS2m => {
                let parse_errors = packets.iter().filter(|p| !p.is_valid()).count();
                if parse_errors > 0 {
                    tracing::warn!(
                        "{} test sequence packets failed their CRC check",
                        parse_errors
                    );
                }
                ParsedOutcome {
                    success: packets.len() == expected.max && parse_errors == 0,
                    message: format!(
                        "{} of {} packets received, {} parse errors",
                        packets.len(),
                        expected.max,
                        parse_errors
                    ),
                    data: Some(CommandData::PrbsReceived {
                        packets: packets.to_vec(),
                        expected: expected.max,
                        parse_errors,
                    }),
                }
            }
            cmd => ParsedOutcome {
                success: true,
                message: format!("{} OK", cmd.name()),
                data: None,
            },
        }
    }

    /// Classify a deadline expiry during the data phase
    pub fn on_timeout(&self, received: usize, expected: PacketCount) -> TimeoutVerdict {
        if expected.expects_data() && received >= expected.min {
            TimeoutVerdict::Complete
        } else if received > 0 {
            TimeoutVerdict::PartialData {
                received,
                expected: expected.max,
            }
        } else {
            TimeoutVerdict::NoData
        }
    }
}

/// Concatenate a 2-packet reply into a little-endian u32
///
/// Packets are ordered by counter; the lower counter holds the low half.
fn parse_u32(packets: &[DataPacket]) -> Option<u32> {
    if packets.len() < 2 {
        return None;
    }
    let mut ordered: Vec<&DataPacket> = packets.iter().take(2).collect();
    ordered.sort_by_key(|p| p.counter);
    let (low, high) = (ordered[0], ordered[1]);
    Some(u32::from_le_bytes([
        low.data[0],
        low.data[1],
        high.data[0],
        high.data[1],
    ]))
}

impl fmt::Display for TechCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TechCommand {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|cmd| cmd.name() == normalized)
            .ok_or_else(|| ProtocolError::UnknownCommand(s.to_string()))
    }
}

impl TryFrom<u8> for TechCommand {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|cmd| cmd.opcode() == value)
            .ok_or_else(|| ProtocolError::UnknownCommand(format!("opcode 0x{:02X}", value)))
    }
}
