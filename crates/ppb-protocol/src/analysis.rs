//! Packet sequence analysis
//!
//! Compares a sent packet sequence with what actually arrived, correlating
//! entries by their counter byte. Used after PRBS exchanges to report loss,
//! duplication, reordering and payload bit errors.

use std::collections::HashMap;

use crate::frame::DataPacket;

/// Outcome of comparing a sent and a received packet sequence
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SequenceReport {
    /// Packets in the reference sequence
    pub sent: usize,
    /// Packets actually received
    pub received: usize,
    /// Received with the expected payload and a valid CRC
    pub matched: usize,
    /// Counter known but payload differs or CRC is bad
    pub corrupted: usize,
    /// Sent counters never received
    pub lost: usize,
    /// Repeated counters
    pub duplicates: usize,
    /// Counters arriving after a higher counter
    pub out_of_order: usize,
    /// Counters absent from the sent sequence
    pub unknown: usize,
    /// Payload bits differing on known counters
    pub bit_errors: u64,
    /// Counters of lost packets
    pub lost_counters: Vec<u8>,
    /// Receive indices of duplicates
    pub duplicate_indices: Vec<usize>,
    /// Receive indices of reordered packets
    pub out_of_order_indices: Vec<usize>,
    /// Receive indices of unknown packets
    pub unknown_indices: Vec<usize>,
}

impl SequenceReport {
    /// Fraction of the sent sequence that never arrived
    pub fn loss_ratio(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        self.lost as f64 / self.sent as f64
    }

    /// Bit errors per compared payload bit
    pub fn bit_error_rate(&self) -> f64 {
        let compared = (self.matched + self.corrupted) as f64 * 16.0;
        if compared == 0.0 {
            return 0.0;
        }
        self.bit_errors as f64 / compared
    }

    /// Whether the received sequence is a perfect copy
    pub fn is_clean(&self) -> bool {
        self.matched == self.sent && self.received == self.sent
    }
}

/// Analyzer consuming decoded packet arrays
pub trait SequenceAnalyzer: Send {
    /// Compare `received` against the `sent` reference
    fn analyze(&self, sent: &[DataPacket], received: &[DataPacket]) -> SequenceReport;
}

/// Default analyzer correlating packets by counter
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterAnalyzer;

impl SequenceAnalyzer for CounterAnalyzer {
    fn analyze(&self, sent: &[DataPacket], received: &[DataPacket]) -> SequenceReport {
        let reference: HashMap<u8, &DataPacket> = sent.iter().map(|p| (p.counter, p)).collect();
        let mut seen = [false; 256];
        let mut highest: Option<u8> = None;
        let mut report = SequenceReport {
            sent: sent.len(),
            received: received.len(),
            ..Default::default()
        };

        for (index, packet) in received.iter().enumerate() {
            let Some(expected) = reference.get(&packet.counter) else {
                report.unknown += 1;
                report.unknown_indices.push(index);
                continue;
            };

            let slot = &mut seen[packet.counter as usize];
            if *slot {
                report.duplicates += 1;
                report.duplicate_indices.push(index);
                continue;
            }
            *slot = true;

            if highest.is_some_and(|h| packet.counter < h) {
                report.out_of_order += 1;
                report.out_of_order_indices.push(index);
            }
            highest = highest.max(Some(packet.counter));

            let flipped = (packet.data[0] ^ expected.data[0]).count_ones()
                + (packet.data[1] ^ expected.data[1]).count_ones();
            report.bit_errors += flipped as u64;

            if flipped == 0 && packet.is_valid() {
                report.matched += 1;
            } else {
                report.corrupted += 1;
            }
        }

        report.lost_counters = sent
            .iter()
            .map(|p| p.counter)
            .filter(|c| !seen[*c as usize])
            .collect();
        report.lost = report.lost_counters.len();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prbs::generate_sequence;

    #[test]
    fn test_clean_sequence() {
        let sent = generate_sequence();
        let report = CounterAnalyzer.analyze(&sent, &sent);
        assert!(report.is_clean());
        assert_eq!(report.matched, 256);
        assert_eq!(report.loss_ratio(), 0.0);
        assert_eq!(report.bit_error_rate(), 0.0);
    }

    #[test]
    fn test_loss_and_truncation() {
        let sent = generate_sequence();
        let received = &sent[..200];
        let report = CounterAnalyzer.analyze(&sent, received);
        assert_eq!(report.matched, 200);
        assert_eq!(report.lost, 56);
        assert_eq!(report.lost_counters.first(), Some(&200));
        assert!(!report.is_clean());
    }

    #[test]
    fn test_duplicates_and_reordering() {
        let sent = generate_sequence()[..5].to_vec();
        let received = vec![sent[0], sent[2], sent[1], sent[2], sent[4]];
        let report = CounterAnalyzer.analyze(&sent, &received);
        assert_eq!(report.matched, 4);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.duplicate_indices, vec![3]);
        assert_eq!(report.out_of_order, 1);
        assert_eq!(report.out_of_order_indices, vec![2]);
        assert_eq!(report.lost_counters, vec![3]);
    }

    #[test]
    fn test_bit_errors_and_unknown_counters() {
        let sent = generate_sequence()[..4].to_vec();
        let mut flipped = sent[1];
        flipped.data[0] ^= 0b0000_0101;
        let stray = DataPacket::new([0, 0], 200);
        let received = vec![sent[0], flipped, sent[2], sent[3], stray];

        let report = CounterAnalyzer.analyze(&sent, &received);
        assert_eq!(report.corrupted, 1);
        assert_eq!(report.bit_errors, 2);
        assert_eq!(report.unknown, 1);
        assert_eq!(report.unknown_indices, vec![4]);
        assert!((report.bit_error_rate() - 2.0 / 64.0).abs() < 1e-12);
    }
}
