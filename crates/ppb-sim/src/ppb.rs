//! Virtual PPB unit
//!
//! Answers catalog commands with protocol-accurate replies and can be told
//! to misbehave in the ways real units do.

use ppb_protocol::frame::STATUS_OK;
use ppb_protocol::prbs::{generate_sequence, SEQUENCE_LEN};
use ppb_protocol::{Address, DataPacket, TechCommand};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for creating a virtual unit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualPpbConfig {
    /// Unit address (one bit)
    pub address: Address,
    /// Packets in the TS status dump (7..=9)
    pub status_packets: usize,
    /// Firmware CRC32 reported by VERS
    pub version: u32,
    /// Value reported by CHECKSUM
    pub checksum: u32,
    /// Value reported by DROP
    pub dropped_packets: u32,
    /// Raw counter reported by BER_T
    pub ber_transmit: u32,
    /// Raw counter reported by BER_F
    pub ber_receive: u32,
}

impl Default for VirtualPpbConfig {
    fn default() -> Self {
        Self {
            address: Address(0x0001),
            status_packets: 9,
            version: 0x1234_5678,
            checksum: 0xCAFE_F00D,
            dropped_packets: 0,
            ber_transmit: 0,
            ber_receive: 0,
        }
    }
}

/// Ways a unit can misbehave
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Faults {
    /// Acknowledge every command with this status
    pub error_status: Option<u8>,
    /// Ignore this many requests entirely
    pub silent_requests: usize,
    /// Stop replies after this many data packets
    pub truncate_after: Option<usize>,
    /// Damage the data packet at this index
    pub corrupt_index: Option<usize>,
}

/// Acknowledgement status plus the data packets that follow it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Status byte of the acknowledgement
    pub status: u8,
    /// Data packets, in send order
    pub data: Vec<DataPacket>,
}

/// A simulated PPB unit
#[derive(Debug)]
pub struct VirtualPpb {
    config: VirtualPpbConfig,
    faults: Faults,
    /// Commands seen, including ignored ones
    history: Vec<TechCommand>,
    /// Test sequence packets streamed to this unit
    stream: Vec<DataPacket>,
}

impl VirtualPpb {
    /// Create a unit with default values at `address`
    pub fn new(address: Address) -> Self {
        Self::from_config(VirtualPpbConfig {
            address,
            ..Default::default()
        })
    }

    /// Create a unit from configuration
    pub fn from_config(config: VirtualPpbConfig) -> Self {
        Self {
            config,
            faults: Faults::default(),
            history: Vec::new(),
            stream: Vec::new(),
        }
    }

    /// Unit address
    pub fn address(&self) -> Address {
        self.config.address
    }

    /// Configuration
    pub fn config(&self) -> &VirtualPpbConfig {
        &self.config
    }

    /// Replace the active faults
    pub fn set_faults(&mut self, faults: Faults) {
        self.faults = faults;
    }

    /// Active faults
    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    /// Commands received so far
    pub fn history(&self) -> &[TechCommand] {
        &self.history
    }

    /// Test sequence packets received from the controller
    pub fn stream(&self) -> &[DataPacket] {
        &self.stream
    }

    /// Whether a full test sequence has been streamed in
    pub fn stream_complete(&self) -> bool {
        self.stream.len() >= SEQUENCE_LEN
    }

    /// Produce the reply to `command`, or `None` when the unit stays silent
    pub fn respond(&mut self, command: TechCommand) -> Option<Reply> {
        self.history.push(command);

        if self.faults.silent_requests > 0 {
            self.faults.silent_requests -= 1;
            debug!("Virtual PPB {} ignoring {}", self.address(), command);
            return None;
        }

        if let Some(status) = self.faults.error_status {
            return Some(Reply {
                status,
                data: Vec::new(),
            });
        }

        if command == TechCommand::PrbsM2s {
            self.stream.clear();
        }

        let mut data = self.data_for(command);
        if let Some(limit) = self.faults.truncate_after {
            data.truncate(limit);
        }
        if let Some(packet) = self.faults.corrupt_index.and_then(|i| data.get_mut(i)) {
            // Payload changes, CRC stays: the receiver sees a CRC mismatch
            packet.data[0] ^= 0x01;
        }

        debug!(
            "Virtual PPB {} answering {} with {} packets",
            self.address(),
            command,
            data.len()
        );
        Some(Reply {
            status: STATUS_OK,
            data,
        })
    }

    /// Accept one packet of an incoming test sequence
    pub fn accept_stream_packet(&mut self, packet: DataPacket) {
        self.stream.push(packet);
    }

    fn data_for(&self, command: TechCommand) -> Vec<DataPacket> {
        match command {
            TechCommand::Ts => {
                let unit = self.address().index().unwrap_or(0);
                (0..self.config.status_packets.clamp(7, 9))
                    .map(|i| DataPacket::new([0x50 + i as u8, unit], i as u8))
                    .collect()
            }
            TechCommand::Vers => split_u32(self.config.version),
            TechCommand::Checksum => split_u32(self.config.checksum),
            TechCommand::Drop => split_u32(self.config.dropped_packets),
            TechCommand::BerT => split_u32(self.config.ber_transmit),
            TechCommand::BerF => split_u32(self.config.ber_receive),
            TechCommand::PrbsS2m => generate_sequence(),
            TechCommand::Tc
            | TechCommand::Volume
            | TechCommand::Programm
            | TechCommand::Clean
            | TechCommand::PrbsM2s => Vec::new(),
        }
    }
}

/// Low half in packet 0, high half in packet 1
fn split_u32(value: u32) -> Vec<DataPacket> {
    let b = value.to_le_bytes();
    vec![
        DataPacket::new([b[0], b[1]], 0),
        DataPacket::new([b[2], b[3]], 1),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_configured_values() {
        let mut ppb = VirtualPpb::from_config(VirtualPpbConfig {
            status_packets: 7,
            version: 0xAABB_CCDD,
            ..Default::default()
        });

        let status = ppb.respond(TechCommand::Ts).unwrap();
        assert_eq!(status.status, STATUS_OK);
        assert_eq!(status.data.len(), 7);

        let vers = ppb.respond(TechCommand::Vers).unwrap();
        assert_eq!(vers.data[0].data, [0xDD, 0xCC]);
        assert_eq!(vers.data[1].data, [0xBB, 0xAA]);
        assert!(vers.data.iter().all(DataPacket::is_valid));

        assert!(ppb.respond(TechCommand::Clean).unwrap().data.is_empty());
        assert_eq!(
            ppb.history(),
            &[TechCommand::Ts, TechCommand::Vers, TechCommand::Clean]
        );
    }

    #[test]
    fn test_silence_then_recovery() {
        let mut ppb = VirtualPpb::new(Address(0x0002));
        ppb.set_faults(Faults {
            silent_requests: 2,
            ..Default::default()
        });

        assert!(ppb.respond(TechCommand::Ts).is_none());
        assert!(ppb.respond(TechCommand::Ts).is_none());
        assert!(ppb.respond(TechCommand::Ts).is_some());
    }

    #[test]
    fn test_error_status_has_no_data() {
        let mut ppb = VirtualPpb::new(Address(0x0001));
        ppb.set_faults(Faults {
            error_status: Some(0x03),
            ..Default::default()
        });
        assert_eq!(
            ppb.respond(TechCommand::PrbsS2m),
            Some(Reply {
                status: 0x03,
                data: Vec::new()
            })
        );
    }

    #[test]
    fn test_truncate_and_corrupt() {
        let mut ppb = VirtualPpb::new(Address(0x0001));
        ppb.set_faults(Faults {
            truncate_after: Some(200),
            corrupt_index: Some(10),
            ..Default::default()
        });

        let reply = ppb.respond(TechCommand::PrbsS2m).unwrap();
        assert_eq!(reply.data.len(), 200);
        let invalid: Vec<usize> = reply
            .data
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_valid())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(invalid, vec![10]);
    }
}
