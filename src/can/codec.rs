//! ISO 15765-2 frame segmentation codec: single/first/consecutive/flow-control
//! frame kinds, the four padding/addressing presets, and the ST_min encode /
//! decode pair. Ported from `DoCanParameters` and the frame-codec family
//! under `docan/datalink`.

use std::convert::TryFrom;

/// Protocol control information nibble values (ISO 15765-2 Table 1).
const PCI_SINGLE_FRAME: u8 = 0x0;
const PCI_FIRST_FRAME: u8 = 0x1;
const PCI_CONSECUTIVE_FRAME: u8 = 0x2;
const PCI_FLOW_CONTROL: u8 = 0x3;

/// A decoded N_PDU, independent of the raw CAN payload bytes it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// Single Frame: the whole message fits one CAN frame.
    Single { data: Vec<u8> },
    /// First Frame: opens a segmented transfer, `total_length` is the full
    /// message length it announces.
    First { total_length: u32, data: Vec<u8> },
    /// Consecutive Frame, `sequence_number` is the 4-bit wrapping counter.
    Consecutive { sequence_number: u8, data: Vec<u8> },
    /// Flow Control frame sent by the receiver back to the sender.
    FlowControl {
        status: FlowStatus,
        block_size: u8,
        separation_time: EncodedSeparationTime,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    ContinueToSend,
    Wait,
    Overflow,
}

impl FlowStatus {
    fn from_nibble(n: u8) -> Option<Self> {
        match n {
            0 => Some(FlowStatus::ContinueToSend),
            1 => Some(FlowStatus::Wait),
            2 => Some(FlowStatus::Overflow),
            _ => None,
        }
    }

    fn nibble(self) -> u8 {
        match self {
            FlowStatus::ContinueToSend => 0,
            FlowStatus::Wait => 1,
            FlowStatus::Overflow => 2,
        }
    }
}

/// The raw byte placed in a flow control frame's ST_min field, kept
/// alongside its decoded microsecond value so the wire byte survives a
/// round trip unchanged even though it is a many-to-one encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedSeparationTime(pub u8);

impl EncodedSeparationTime {
    /// Decode to microseconds, per ISO 15765-2 section 9.6.5.4. Reserved
    /// byte ranges fold to the maximum valid value (127ms) rather than
    /// erroring, matching the original's saturating behaviour.
    pub fn decode_us(self) -> u32 {
        let v = self.0;
        if v <= 0x7F {
            v as u32 * 1000
        } else if (0xF1..=0xF9).contains(&v) {
            (v as u32 - 0xF0) * 100
        } else {
            0x7F * 1000
        }
    }

    /// Encode a microsecond separation time to the nearest representable
    /// wire value, saturating at 127ms.
    pub fn encode_us(min_separation_time_us: u32) -> Self {
        if min_separation_time_us > 0 && min_separation_time_us < 1000 {
            Self((min_separation_time_us / 100) as u8 + 0xF0)
        } else if min_separation_time_us < 0x7F * 1000 {
            Self((min_separation_time_us / 1000) as u8)
        } else {
            Self(0x7F)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("frame too short to contain a PCI byte")]
    Empty,
    #[error("unrecognised PCI type nibble {0:#x}")]
    UnknownPci(u8),
    #[error("first frame length field is malformed")]
    MalformedLength,
    #[error("frame control data is malformed")]
    MalformedFlowControl,
    #[error("payload of {0} bytes does not fit the configured frame kind")]
    PayloadTooLarge(usize),
}

/// Addressing + padding preset governing how a [`FrameKind`] maps onto raw
/// CAN bytes. `1 extra_addressing_byte` corresponds to the ISO "extended" and
/// "mixed" addressing formats consuming the first payload byte as a target
/// address extension; this codec treats it as an opaque prefix it preserves
/// but never interprets (addressing.rs is self-contained at the filter level
/// via the CAN id, not this byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodecConfig {
    pub max_frame_len: usize,
    pub padded: bool,
    pub padding_byte: u8,
    pub extra_addressing_byte: bool,
}

impl FrameCodecConfig {
    pub const fn padded_classic() -> Self {
        Self {
            max_frame_len: 8,
            padded: true,
            padding_byte: 0xCC,
            extra_addressing_byte: false,
        }
    }

    pub const fn padded_fd() -> Self {
        Self {
            max_frame_len: 64,
            padded: true,
            padding_byte: 0xCC,
            extra_addressing_byte: false,
        }
    }

    pub const fn optimised_classic() -> Self {
        Self {
            max_frame_len: 8,
            padded: false,
            padding_byte: 0x00,
            extra_addressing_byte: false,
        }
    }

    pub const fn optimised_fd() -> Self {
        Self {
            max_frame_len: 64,
            padded: false,
            padding_byte: 0x00,
            extra_addressing_byte: false,
        }
    }

    fn prefix_len(&self) -> usize {
        if self.extra_addressing_byte {
            1
        } else {
            0
        }
    }

    /// Maximum single-frame payload this configuration can carry. Classic
    /// CAN single frames use a 4-bit length nibble (max 7); CAN FD single
    /// frames signal an "escape" length in a second byte, allowing the
    /// full frame to be used.
    pub fn max_single_frame_payload(&self) -> usize {
        let prefix = self.prefix_len();
        if self.max_frame_len <= 8 {
            self.max_frame_len - 1 - prefix
        } else {
            self.max_frame_len - 2 - prefix
        }
    }

    pub fn max_first_frame_payload(&self) -> usize {
        let prefix = self.prefix_len();
        self.max_frame_len - 2 - prefix
    }

    pub fn max_consecutive_frame_payload(&self) -> usize {
        let prefix = self.prefix_len();
        self.max_frame_len - 1 - prefix
    }

    /// Encode a [`FrameKind`] into raw CAN payload bytes, applying padding
    /// if configured.
    pub fn encode(&self, kind: &FrameKind) -> Result<Vec<u8>, CodecError> {
        let prefix = self.prefix_len();
        let mut out = vec![0u8; prefix];
        match kind {
            FrameKind::Single { data } => {
                if data.len() > self.max_single_frame_payload() {
                    return Err(CodecError::PayloadTooLarge(data.len()));
                }
                if data.len() <= 15 && self.max_frame_len <= 8 {
                    out.push((PCI_SINGLE_FRAME << 4) | data.len() as u8);
                } else {
                    // FD escape form: 0x00 length nibble, explicit length byte.
                    out.push(PCI_SINGLE_FRAME << 4);
                    out.push(data.len() as u8);
                }
                out.extend_from_slice(data);
            }
            FrameKind::First { total_length, data } => {
                if data.len() > self.max_first_frame_payload() {
                    return Err(CodecError::PayloadTooLarge(data.len()));
                }
                if *total_length <= 0xFFF {
                    out.push((PCI_FIRST_FRAME << 4) | ((*total_length >> 8) as u8 & 0x0F));
                    out.push((*total_length & 0xFF) as u8);
                } else {
                    out.push(PCI_FIRST_FRAME << 4);
                    out.push(0x00);
                    out.extend_from_slice(&total_length.to_be_bytes());
                }
                out.extend_from_slice(data);
            }
            FrameKind::Consecutive {
                sequence_number,
                data,
            } => {
                if data.len() > self.max_consecutive_frame_payload() {
                    return Err(CodecError::PayloadTooLarge(data.len()));
                }
                out.push((PCI_CONSECUTIVE_FRAME << 4) | (sequence_number & 0x0F));
                out.extend_from_slice(data);
            }
            FrameKind::FlowControl {
                status,
                block_size,
                separation_time,
            } => {
                out.push((PCI_FLOW_CONTROL << 4) | status.nibble());
                out.push(*block_size);
                out.push(separation_time.0);
            }
        }
        if self.padded && out.len() < self.max_frame_len {
            out.resize(self.max_frame_len, self.padding_byte);
        }
        Ok(out)
    }

    /// Decode raw CAN payload bytes into a [`FrameKind`].
    pub fn decode(&self, raw: &[u8]) -> Result<FrameKind, CodecError> {
        let prefix = self.prefix_len();
        let raw = raw.get(prefix..).ok_or(CodecError::Empty)?;
        let pci = *raw.first().ok_or(CodecError::Empty)?;
        let kind_nibble = pci >> 4;
        match kind_nibble {
            n if n == PCI_SINGLE_FRAME => {
                let len_nibble = pci & 0x0F;
                if len_nibble == 0 {
                    let len = *raw.get(1).ok_or(CodecError::MalformedLength)? as usize;
                    let data = raw.get(2..2 + len).ok_or(CodecError::MalformedLength)?;
                    Ok(FrameKind::Single {
                        data: data.to_vec(),
                    })
                } else {
                    let len = len_nibble as usize;
                    let data = raw.get(1..1 + len).ok_or(CodecError::MalformedLength)?;
                    Ok(FrameKind::Single {
                        data: data.to_vec(),
                    })
                }
            }
            n if n == PCI_FIRST_FRAME => {
                let hi = pci & 0x0F;
                let lo = *raw.get(1).ok_or(CodecError::MalformedLength)?;
                if hi == 0 && lo == 0 {
                    let len_bytes: [u8; 4] = raw
                        .get(2..6)
                        .ok_or(CodecError::MalformedLength)?
                        .try_into()
                        .map_err(|_| CodecError::MalformedLength)?;
                    let total_length = u32::from_be_bytes(len_bytes);
                    Ok(FrameKind::First {
                        total_length,
                        data: raw[6..].to_vec(),
                    })
                } else {
                    let total_length = ((hi as u32) << 8) | lo as u32;
                    Ok(FrameKind::First {
                        total_length,
                        data: raw[2..].to_vec(),
                    })
                }
            }
            n if n == PCI_CONSECUTIVE_FRAME => Ok(FrameKind::Consecutive {
                sequence_number: pci & 0x0F,
                data: raw[1..].to_vec(),
            }),
            n if n == PCI_FLOW_CONTROL => {
                let status = FlowStatus::from_nibble(pci & 0x0F)
                    .ok_or(CodecError::MalformedFlowControl)?;
                let block_size = *raw.get(1).ok_or(CodecError::MalformedFlowControl)?;
                let separation_time =
                    EncodedSeparationTime(*raw.get(2).ok_or(CodecError::MalformedFlowControl)?);
                Ok(FrameKind::FlowControl {
                    status,
                    block_size,
                    separation_time,
                })
            }
            other => Err(CodecError::UnknownPci(other)),
        }
    }
}

impl TryFrom<u8> for FlowStatus {
    type Error = CodecError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        FlowStatus::from_nibble(value).ok_or(CodecError::MalformedFlowControl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separation_time_round_trips_millisecond_range() {
        for ms in 0u32..0x7F {
            let enc = EncodedSeparationTime::encode_us(ms * 1000);
            assert_eq!(enc.decode_us(), ms * 1000);
        }
    }

    #[test]
    fn separation_time_round_trips_hundred_microsecond_range() {
        for step in 1u8..=9 {
            let enc = EncodedSeparationTime(0xF0 + step);
            assert_eq!(enc.decode_us(), step as u32 * 100);
        }
    }

    #[test]
    fn separation_time_reserved_bytes_saturate_to_max() {
        let enc = EncodedSeparationTime(0xFA);
        assert_eq!(enc.decode_us(), 0x7F * 1000);
        let enc = EncodedSeparationTime(0xFF);
        assert_eq!(enc.decode_us(), 0x7F * 1000);
    }

    #[test]
    fn single_frame_round_trips_classic() {
        let cfg = FrameCodecConfig::padded_classic();
        let kind = FrameKind::Single {
            data: vec![1, 2, 3],
        };
        let raw = cfg.encode(&kind).unwrap();
        assert_eq!(raw.len(), 8);
        assert_eq!(cfg.decode(&raw).unwrap(), kind);
    }

    #[test]
    fn first_frame_12bit_length_round_trips() {
        let cfg = FrameCodecConfig::padded_classic();
        let kind = FrameKind::First {
            total_length: 20,
            data: vec![0; 6],
        };
        let raw = cfg.encode(&kind).unwrap();
        assert_eq!(cfg.decode(&raw).unwrap(), kind);
    }

    #[test]
    fn first_frame_escape_length_round_trips_on_fd() {
        let cfg = FrameCodecConfig::padded_fd();
        let kind = FrameKind::First {
            total_length: 5000,
            data: vec![0; 58],
        };
        let raw = cfg.encode(&kind).unwrap();
        assert_eq!(cfg.decode(&raw).unwrap(), kind);
    }

    #[test]
    fn consecutive_frame_sequence_number_wraps_at_16() {
        let cfg = FrameCodecConfig::optimised_classic();
        let kind = FrameKind::Consecutive {
            sequence_number: 0x0F,
            data: vec![9; 7],
        };
        let raw = cfg.encode(&kind).unwrap();
        assert_eq!(cfg.decode(&raw).unwrap(), kind);
    }

    #[test]
    fn flow_control_round_trips() {
        let cfg = FrameCodecConfig::padded_classic();
        let kind = FrameKind::FlowControl {
            status: FlowStatus::ContinueToSend,
            block_size: 8,
            separation_time: EncodedSeparationTime::encode_us(2000),
        };
        let raw = cfg.encode(&kind).unwrap();
        assert_eq!(cfg.decode(&raw).unwrap(), kind);
    }

    #[test]
    fn optimised_frames_are_not_padded() {
        let cfg = FrameCodecConfig::optimised_classic();
        let kind = FrameKind::Single { data: vec![1, 2] };
        let raw = cfg.encode(&kind).unwrap();
        assert_eq!(raw.len(), 3);
    }

    #[test]
    fn oversized_single_frame_payload_is_rejected() {
        let cfg = FrameCodecConfig::padded_classic();
        let kind = FrameKind::Single { data: vec![0; 8] };
        assert_eq!(cfg.encode(&kind), Err(CodecError::PayloadTooLarge(8)));
    }
}
