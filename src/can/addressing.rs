//! Normal addressing filter: maps CAN identifiers to transport address pairs
//! and back, ported from `DoCanNormalAddressingFilter`.
//!
//! Entries must be supplied sorted ascending by `can_reception_id` (an
//! invariant asserted at construction, not re-derived by sorting) so
//! reception lookups can binary-search rather than scan.

use crate::can::codec::FrameCodecConfig;
use crate::can::frame::{is_base_id, TransportAddressPair};

/// One row of the address table: the CAN id pair used on the wire and the
/// transport address pair (source/target) it represents, plus which codec
/// preset governs each direction.
#[derive(Debug, Clone, Copy)]
pub struct AddressEntry {
    pub can_reception_id: u32,
    pub can_transmission_id: u32,
    pub transport_source_id: u16,
    pub transport_target_id: u16,
    pub reception_codec: FrameCodecConfig,
    pub transmission_codec: FrameCodecConfig,
}

/// Resolves transport <-> data-link addresses and answers the bus's "is this
/// CAN id one of mine" filter question, for normal (11/29-bit, non-mixed)
/// addressing.
///
/// Base (11-bit) ids are tested with a bitfield; extended (29-bit) ids are
/// tested by binary search over the same sorted entry table, split at the
/// first extended-range entry the way the original splits `_entries` /
/// `_extendedEntries`.
pub struct AddressingFilter {
    entries: Vec<AddressEntry>,
    first_extended_idx: usize,
    base_id_bits: Box<[u64; 32]>,
}

impl AddressingFilter {
    /// `entries` must already be sorted ascending by `can_reception_id`.
    /// Panics (the host-side stand-in for the original's `estd_assert`) if
    /// the ordering invariant is violated.
    pub fn new(entries: Vec<AddressEntry>) -> Self {
        assert!(!entries.is_empty(), "addressing filter needs >=1 entry");
        for w in entries.windows(2) {
            assert!(
                w[0].can_reception_id < w[1].can_reception_id,
                "addressing filter entries must be sorted ascending by can_reception_id"
            );
        }
        let first_extended_idx = entries
            .iter()
            .position(|e| !is_base_id(e.can_reception_id))
            .unwrap_or(entries.len());

        let mut base_id_bits = Box::new([0u64; 32]);
        for e in &entries {
            if is_base_id(e.can_reception_id) {
                let id = e.can_reception_id as usize;
                base_id_bits[id / 64] |= 1u64 << (id % 64);
            }
        }

        Self {
            entries,
            first_extended_idx,
            base_id_bits,
        }
    }

    /// Does this CAN id belong to one of our configured connections?
    pub fn matches(&self, can_id: u32) -> bool {
        if is_base_id(can_id) {
            let id = can_id as usize;
            (self.base_id_bits[id / 64] >> (id % 64)) & 1 != 0
        } else {
            self.find_by_reception_id(can_id).is_some()
        }
    }

    /// Resolve an inbound CAN id to the transport address pair and codec to
    /// use for decoding it, plus the CAN id to reply on.
    pub fn reception_parameters(
        &self,
        can_reception_id: u32,
    ) -> Option<(TransportAddressPair, u32, FrameCodecConfig)> {
        let entry = self.find_by_reception_id(can_reception_id)?;
        Some((
            TransportAddressPair::new(entry.transport_source_id, entry.transport_target_id),
            entry.can_transmission_id,
            entry.reception_codec,
        ))
    }

    /// Resolve an outbound transport address pair to the CAN id pair and
    /// codec to use for sending. The table is keyed by the pair as seen on
    /// reception, so lookups swap source/target the way the original reads
    /// `target` as the local source and `source` as the local target.
    pub fn transmission_parameters(
        &self,
        pair: TransportAddressPair,
    ) -> Option<(u32, u32, FrameCodecConfig)> {
        let reversed = pair.reversed();
        self.entries
            .iter()
            .find(|e| {
                e.transport_source_id == reversed.source_id
                    && e.transport_target_id == reversed.target_id
            })
            .map(|e| (e.can_reception_id, e.can_transmission_id, e.transmission_codec))
    }

    fn find_by_reception_id(&self, can_reception_id: u32) -> Option<&AddressEntry> {
        let idx = self
            .entries
            .binary_search_by_key(&can_reception_id, |e| e.can_reception_id)
            .ok()?;
        if is_base_id(can_reception_id) || idx >= self.first_extended_idx {
            Some(&self.entries[idx])
        } else {
            None
        }
    }

    /// Render a CAN id the way diagnostic logs expect: `0x` + zero-padded
    /// hex, matching `formatDataLinkAddress`'s `%08x` format.
    pub fn format_data_link_address(address: u32) -> String {
        format!("0x{:08x}", address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(rx: u32, tx: u32, src: u16, tgt: u16) -> AddressEntry {
        AddressEntry {
            can_reception_id: rx,
            can_transmission_id: tx,
            transport_source_id: src,
            transport_target_id: tgt,
            reception_codec: FrameCodecConfig::padded_classic(),
            transmission_codec: FrameCodecConfig::padded_classic(),
        }
    }

    #[test]
    fn matches_configured_base_ids_only() {
        let filter = AddressingFilter::new(vec![entry(0x700, 0x701, 0x01, 0x02)]);
        assert!(filter.matches(0x700));
        assert!(!filter.matches(0x702));
    }

    #[test]
    fn reception_parameters_resolve_transport_pair() {
        let filter = AddressingFilter::new(vec![entry(0x700, 0x701, 0x01, 0x02)]);
        let (pair, tx_id, _codec) = filter.reception_parameters(0x700).unwrap();
        assert_eq!(pair, TransportAddressPair::new(0x01, 0x02));
        assert_eq!(tx_id, 0x701);
    }

    #[test]
    fn transmission_parameters_swap_source_and_target() {
        let filter = AddressingFilter::new(vec![entry(0x700, 0x701, 0x01, 0x02)]);
        // We want to send FROM 0x02 TO 0x01 -- the reverse of the reception pair.
        let (rx_id, tx_id, _codec) = filter
            .transmission_parameters(TransportAddressPair::new(0x02, 0x01))
            .unwrap();
        assert_eq!(rx_id, 0x700);
        assert_eq!(tx_id, 0x701);
    }

    #[test]
    fn extended_ids_use_binary_search_not_bitfield() {
        let filter = AddressingFilter::new(vec![
            entry(0x700, 0x701, 0x01, 0x02),
            entry(0x1FFF_FFFE, 0x1FFF_FFFF, 0x03, 0x04),
        ]);
        assert!(filter.matches(0x1FFF_FFFE));
        assert!(!filter.matches(0x1FFF_FFFD));
    }

    #[test]
    #[should_panic(expected = "sorted ascending")]
    fn construction_rejects_unsorted_entries() {
        AddressingFilter::new(vec![
            entry(0x701, 0x701, 0x01, 0x02),
            entry(0x700, 0x701, 0x03, 0x04),
        ]);
    }

    #[test]
    fn format_matches_zero_padded_hex() {
        assert_eq!(AddressingFilter::format_data_link_address(0x700), "0x00000700");
    }
}
