//! ISO 15765-2 (DoCAN) transport layer: per-connection reception and
//! transmission state machines, multiplexed over a [`crate::can`]
//! transceiver and addressing filter.

pub mod physical;
pub mod receiver;
pub mod transmitter;
pub mod transport;

pub use physical::DoCanPhysicalTransceiver;
pub use receiver::{MessageReceiver, ReceptionState};
pub use transmitter::{MessageTransmitter, TransmissionState};
pub use transport::{DoCanParameters, DoCanTransportLayer, TransportLayerSet};
