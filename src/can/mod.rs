//! Physical/data-link layer: frame types, the ISO 15765-2 segmentation
//! codec, address filtering, and the transceiver abstraction DoCAN
//! multiplexes on top of.

pub mod addressing;
pub mod async_linux;
pub mod codec;
pub mod frame;
pub mod linux;
pub mod raw;
pub mod retry;
pub mod sys;
pub mod transceiver;

pub use addressing::{AddressEntry, AddressingFilter};
pub use codec::{FrameCodecConfig, FrameKind};
pub use frame::{CanFrame, DataLinkAddressPair, TransportAddressPair};
pub use transceiver::{CanTransceiver, MockTransceiver, SendResult, TransceiverState};
