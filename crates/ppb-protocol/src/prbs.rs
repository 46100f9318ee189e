//! Pseudo-random test sequence for link quality tests
//!
//! Both directions of the PRBS test use the same 256-entry sequence. Each
//! entry advances a 16-bit Galois LFSR one step (x^16 + x^14 + x^13 + x^11 + 1,
//! feedback mask 0xB400, seed 0xACE1) and carries the new register value
//! little-endian in the payload, the entry index as counter, and its CRC-8.

use crate::frame::DataPacket;

/// Number of packets in a test sequence
pub const SEQUENCE_LEN: usize = 256;
/// LFSR feedback mask
pub const LFSR_TAPS: u16 = 0xB400;
/// LFSR start value
pub const LFSR_SEED: u16 = 0xACE1;

/// 16-bit Galois LFSR
#[derive(Debug, Clone)]
pub struct Lfsr {
    state: u16,
}

impl Lfsr {
    /// Start from the standard seed
    pub fn new() -> Self {
        Self::with_seed(LFSR_SEED)
    }

    /// Start from a custom nonzero seed
    pub fn with_seed(seed: u16) -> Self {
        Self { state: seed }
    }

    /// Advance one step and return the new register value
    pub fn step(&mut self) -> u16 {
        let lsb = self.state & 1;
        self.state >>= 1;
        if lsb != 0 {
            self.state ^= LFSR_TAPS;
        }
        self.state
    }
}

impl Default for Lfsr {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for Lfsr {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        Some(self.step())
    }
}

/// Generate the reference test sequence
pub fn generate_sequence() -> Vec<DataPacket> {
    Lfsr::new()
        .take(SEQUENCE_LEN)
        .enumerate()
        .map(|(i, value)| DataPacket::new(value.to_le_bytes(), i as u8))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_start() {
        let seq = generate_sequence();
        assert_eq!(seq.len(), SEQUENCE_LEN);
        assert_eq!(seq[0].to_bytes(), [0x70, 0xE2, 0x00, 0x0E]);
        assert_eq!(seq[1].to_bytes(), [0x38, 0x71, 0x01, 0x00]);
        assert_eq!(seq[2].to_bytes(), [0x9C, 0x38, 0x02, 0x0C]);
        assert_eq!(seq[255].to_bytes(), [0xA1, 0xF5, 0xFF, 0x85]);
    }

    #[test]
    fn test_sequence_is_deterministic() {
        assert_eq!(generate_sequence(), generate_sequence());
        assert!(generate_sequence().iter().all(|p| p.is_valid()));
    }

    #[test]
    fn test_counters_cover_full_range() {
        let seq = generate_sequence();
        for (i, packet) in seq.iter().enumerate() {
            assert_eq!(packet.counter as usize, i);
        }
    }
}
