//! CAN frame and addressing primitives (spec section 3 "Data model").
//!
//! `CanFrame` deliberately mirrors the field layout of the teacher crate's
//! `socketcan::CANFrame` (id/dlc/payload/timestamp) but drops the raw
//! `#[repr(C)]` kernel-struct encoding: this layer never crosses a syscall
//! boundary directly, the [`crate::can::transceiver::CanTransceiver`] trait
//! does that translation at the edge.

use std::fmt;

/// Maximum CAN FD payload length in bytes.
pub const MAX_FD_PAYLOAD: usize = 64;

/// if set, indicates a 29-bit extended identifier (mirrors socketcan's
/// `EFF_FLAG`).
const EFF_FLAG: u32 = 0x8000_0000;
const SFF_MASK: u32 = 0x0000_07ff;
const EFF_MASK: u32 = 0x1fff_ffff;

/// A single CAN (or CAN FD) frame as delivered by / sent to a transceiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    extended: bool,
    dlc: u8,
    payload: Vec<u8>,
    timestamp_us: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("payload of {0} bytes exceeds the 64-byte CAN FD maximum")]
    TooMuchData(usize),
    #[error("id {0:#x} exceeds the 29-bit extended id range")]
    IdTooLarge(u32),
}

impl CanFrame {
    pub fn new(id: u32, payload: &[u8], timestamp_us: u32) -> Result<Self, FrameError> {
        if payload.len() > MAX_FD_PAYLOAD {
            return Err(FrameError::TooMuchData(payload.len()));
        }
        if id > EFF_MASK {
            return Err(FrameError::IdTooLarge(id));
        }
        let extended = id > SFF_MASK;
        Ok(Self {
            id,
            extended,
            dlc: payload.len() as u8,
            payload: payload.to_vec(),
            timestamp_us,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn timestamp_us(&self) -> u32 {
        self.timestamp_us
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}#", self.id)?;
        for b in &self.payload {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// A reserved CAN id value meaning "no address" for either half of a
/// [`DataLinkAddressPair`].
pub const INVALID_CAN_ID: u32 = u32::MAX;

/// The pair of CAN IDs (reception, transmission) identifying one direction
/// of a DoCAN connection on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLinkAddressPair {
    pub reception_id: u32,
    pub transmission_id: u32,
}

impl DataLinkAddressPair {
    pub const INVALID: Self = Self {
        reception_id: INVALID_CAN_ID,
        transmission_id: INVALID_CAN_ID,
    };

    pub fn new(reception_id: u32, transmission_id: u32) -> Self {
        Self {
            reception_id,
            transmission_id,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.reception_id != INVALID_CAN_ID && self.transmission_id != INVALID_CAN_ID
    }
}

/// The pair of diagnostic endpoint identifiers (source, target) a DoCAN
/// message is addressed between -- independent of which CAN IDs carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportAddressPair {
    pub source_id: u16,
    pub target_id: u16,
}

impl TransportAddressPair {
    pub fn new(source_id: u16, target_id: u16) -> Self {
        Self {
            source_id,
            target_id,
        }
    }

    /// The pair as seen from the other endpoint (source and target swapped).
    /// Used when resolving the *transmission* direction, since the stored
    /// filter entries are keyed by the original (incoming) direction.
    pub fn reversed(&self) -> Self {
        Self {
            source_id: self.target_id,
            target_id: self.source_id,
        }
    }
}

/// Returns `true` if `id` fits in an 11-bit (base/standard) CAN identifier.
pub fn is_base_id(id: u32) -> bool {
    id <= SFF_MASK
}

/// Returns `true` if `id` is a well-formed CAN identifier, base or extended.
pub fn is_valid_id(id: u32) -> bool {
    id != INVALID_CAN_ID && id <= EFF_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_rejects_oversized_payload() {
        let payload = [0u8; MAX_FD_PAYLOAD + 1];
        assert_eq!(
            CanFrame::new(0x123, &payload, 0),
            Err(FrameError::TooMuchData(MAX_FD_PAYLOAD + 1))
        );
    }

    #[test]
    fn construction_classifies_extended_ids() {
        let sf = CanFrame::new(0x7ff, &[1], 0).unwrap();
        assert!(!sf.is_extended());
        let ef = CanFrame::new(0x800, &[1], 0).unwrap();
        assert!(ef.is_extended());
    }

    #[test]
    fn reversed_swaps_source_and_target() {
        let pair = TransportAddressPair::new(0x12, 0x34);
        assert_eq!(pair.reversed(), TransportAddressPair::new(0x34, 0x12));
    }
}
