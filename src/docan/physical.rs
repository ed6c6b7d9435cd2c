//! Physical transceiver: the DoCAN-aware wrapper around a single
//! [`CanTransceiver`], responsible for frame classification, codec
//! selection via the addressing filter, and the outbound transmit job
//! queue. One instance per physical CAN bus.

use crate::can::addressing::AddressingFilter;
use crate::can::codec::{EncodedSeparationTime, FlowStatus, FrameKind};
use crate::can::frame::{CanFrame, TransportAddressPair};
use crate::can::transceiver::{CanTransceiver, SendResult};

/// What kind of N_PDU a just-decoded frame turned out to be, resolved
/// against the addressing filter so the caller already has the transport
/// pair and codec in hand -- the DoCAN-layer equivalent of
/// `IDoCanFrameReceiver`'s three callbacks, collapsed into one enum since
/// Rust callers match on it instead of implementing three methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedFrame {
    Single {
        pair: TransportAddressPair,
        tx_id: u32,
        data: Vec<u8>,
    },
    First {
        pair: TransportAddressPair,
        tx_id: u32,
        total_length: u32,
        data: Vec<u8>,
    },
    Consecutive {
        pair: TransportAddressPair,
        tx_id: u32,
        sequence_number: u8,
        data: Vec<u8>,
    },
    FlowControl {
        pair: TransportAddressPair,
        status: FlowStatus,
        block_size: u8,
        separation_time_us: u32,
    },
}

/// Payload-capacity limits the resolved codec puts on one connection's send
/// direction. An FF's length field costs one more header byte than a CF's
/// sequence-number nibble does, so `first` is not generally the same as
/// `consecutive` -- sizing an FF's initial chunk with the CF limit overruns
/// the codec by one byte on every classic-CAN connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadLimits {
    pub single: usize,
    pub first: usize,
    pub consecutive: usize,
}

/// One physical bus: a transceiver plus the addressing/codec knowledge
/// needed to turn its raw frames into [`ClassifiedFrame`]s and back.
pub struct DoCanPhysicalTransceiver<T: CanTransceiver> {
    transceiver: T,
    filter: AddressingFilter,
}

impl<T: CanTransceiver> DoCanPhysicalTransceiver<T> {
    pub fn new(transceiver: T, filter: AddressingFilter) -> Self {
        Self {
            transceiver,
            filter,
        }
    }

    pub fn transceiver(&self) -> &T {
        &self.transceiver
    }

    /// Whether the addressing filter has a route for `pair` at all, and if
    /// so the resolved codec's payload-capacity limits -- checked once up
    /// front so a send to an unconfigured pair fails immediately instead of
    /// queuing a transmitter that can never be serviced, and so the
    /// transmitter knows how to chunk the payload without needing its own
    /// copy of the addressing filter.
    pub fn transmission_parameters_exist(&self, pair: TransportAddressPair) -> Option<PayloadLimits> {
        self.filter
            .transmission_parameters(pair)
            .map(|(_, _, codec)| PayloadLimits {
                single: codec.max_single_frame_payload(),
                first: codec.max_first_frame_payload(),
                consecutive: codec.max_consecutive_frame_payload(),
            })
    }

    /// Drain and classify every frame the transceiver has received since
    /// the last call. Frames whose CAN id doesn't match any configured
    /// connection are silently dropped (spec 4.1: "not fatal").
    pub fn poll_classified(&self) -> Vec<ClassifiedFrame> {
        self.transceiver
            .poll_rx()
            .into_iter()
            .filter_map(|frame| self.classify(&frame))
            .collect()
    }

    fn classify(&self, frame: &CanFrame) -> Option<ClassifiedFrame> {
        let (pair, tx_id, codec) = self.filter.reception_parameters(frame.id())?;
        let kind = codec.decode(frame.payload()).ok()?;
        Some(match kind {
            FrameKind::Single { data } => ClassifiedFrame::Single { pair, tx_id, data },
            FrameKind::First { total_length, data } => ClassifiedFrame::First {
                pair,
                tx_id,
                total_length,
                data,
            },
            FrameKind::Consecutive {
                sequence_number,
                data,
            } => ClassifiedFrame::Consecutive {
                pair,
                tx_id,
                sequence_number,
                data,
            },
            FrameKind::FlowControl {
                status,
                block_size,
                separation_time,
            } => ClassifiedFrame::FlowControl {
                pair,
                status,
                block_size,
                separation_time_us: separation_time.decode_us(),
            },
        })
    }

    /// Encode and send a single N_PDU for the connection resolved from
    /// `pair`. Returns `None` if the addressing filter has no route.
    pub fn send_kind(&self, pair: TransportAddressPair, kind: &FrameKind) -> Option<SendResult> {
        let (rx_id, tx_id, codec) = self.filter.transmission_parameters(pair)?;
        let _ = rx_id;
        let raw = codec.encode(kind).ok()?;
        let frame = CanFrame::new(tx_id, &raw, 0).ok()?;
        Some(self.transceiver.send(frame))
    }

    pub fn send_flow_control(
        &self,
        pair: TransportAddressPair,
        status: FlowStatus,
        block_size: u8,
        separation_time_us: u32,
    ) -> Option<SendResult> {
        self.send_kind(
            pair,
            &FrameKind::FlowControl {
                status,
                block_size,
                separation_time: EncodedSeparationTime::encode_us(separation_time_us),
            },
        )
    }
}
