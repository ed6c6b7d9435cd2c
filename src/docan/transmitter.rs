//! Per-connection transmission state machine: `IDLE -> SEND_FIRST ->
//! WAIT_FC -> SEND_CFS -> WAIT_TX_CALLBACK -> DONE/FAIL`, paced by the
//! peer's flow control and the configured (or peer-announced) ST_min.

use crate::can::codec::{EncodedSeparationTime, FlowStatus, FrameKind};
use crate::can::frame::TransportAddressPair;
use crate::docan::physical::PayloadLimits;
use crate::docan::transport::DoCanParameters;
use crate::error::{ProcessingResult, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionState {
    Idle,
    SendFirst,
    WaitFc,
    SendCfs,
    WaitTxCallback,
    Done,
    Fail,
}

/// What the transport layer should do in response to a transmission step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransmitterAction {
    None,
    SendFrame(FrameKind),
    /// Send this frame and the transmission concludes immediately --
    /// either a Single Frame (no flow control is ever exchanged for one),
    /// or the last Consecutive Frame of a segmented transfer.
    SendFrameThenDone(FrameKind),
    Done(ProcessingResult),
}

pub struct MessageTransmitter {
    state: TransmissionState,
    pair: TransportAddressPair,
    payload: Vec<u8>,
    cf_payload_len: usize,
    offset: usize,
    sequence_number: u8,
    /// Consecutive Frames still allowed before the next Flow Control is
    /// required. `None` means the peer announced an unlimited block size
    /// (`block_size == 0` in its CTS).
    block_size_remaining: Option<u8>,
    separation_time_us: u32,
    flow_control_waits_received: u32,
    elapsed_ms: u32,
}

impl MessageTransmitter {
    pub fn idle() -> Self {
        Self {
            state: TransmissionState::Idle,
            pair: TransportAddressPair::new(0, 0),
            payload: Vec::new(),
            cf_payload_len: 7,
            offset: 0,
            sequence_number: 1,
            block_size_remaining: None,
            separation_time_us: 0,
            flow_control_waits_received: 0,
            elapsed_ms: 0,
        }
    }

    pub fn state(&self) -> TransmissionState {
        self.state
    }

    pub fn pair(&self) -> TransportAddressPair {
        self.pair
    }

    pub fn is_idle(&self) -> bool {
        self.state == TransmissionState::Idle
    }

    /// Begin sending `payload` to `pair`. A payload that fits a Single
    /// Frame goes out as one per spec 4.4 ("if payload fits in SF, request
    /// one frame batch"); anything larger opens with a First Frame sized to
    /// the codec's FF capacity (one byte less than a Consecutive Frame's,
    /// to leave room for the length field) and waits for Flow Control.
    pub fn start(
        &mut self,
        pair: TransportAddressPair,
        payload: Vec<u8>,
        limits: PayloadLimits,
        _params: &DoCanParameters,
    ) -> TransmitterAction {
        self.pair = pair;
        self.cf_payload_len = limits.consecutive.max(1);
        if payload.len() <= limits.single {
            self.payload = Vec::new();
            self.offset = 0;
            self.state = TransmissionState::Done;
            return TransmitterAction::SendFrameThenDone(FrameKind::Single { data: payload });
        }
        let total_length = payload.len();
        let first_chunk_len = limits.first.min(payload.len());
        let (first_chunk, _) = payload.split_at(first_chunk_len);
        let first_chunk = first_chunk.to_vec();
        self.payload = payload;
        self.offset = first_chunk_len;
        self.sequence_number = 1;
        self.block_size_remaining = None;
        self.separation_time_us = 0;
        self.flow_control_waits_received = 0;
        self.elapsed_ms = 0;
        self.state = TransmissionState::WaitFc;
        TransmitterAction::SendFrame(FrameKind::First {
            total_length: total_length as u32,
            data: first_chunk,
        })
    }

    /// A Flow Control frame arrived from the peer.
    pub fn on_flow_control(
        &mut self,
        status: FlowStatus,
        block_size: u8,
        separation_time_us: u32,
        params: &DoCanParameters,
    ) -> TransmitterAction {
        if self.state != TransmissionState::WaitFc {
            return TransmitterAction::None;
        }
        match status {
            FlowStatus::ContinueToSend => {
                self.block_size_remaining = if block_size == 0 { None } else { Some(block_size) };
                self.separation_time_us = separation_time_us;
                self.elapsed_ms = 0;
                self.flow_control_waits_received = 0;
                self.send_next_cf()
            }
            FlowStatus::Wait => {
                self.flow_control_waits_received += 1;
                self.elapsed_ms = 0;
                if self.flow_control_waits_received > u32::from(params.max_flow_control_wait_count) {
                    self.state = TransmissionState::Fail;
                    TransmitterAction::Done(ProcessingResult::ProcessedError(
                        TransportError::FlowControlWaitExceeded,
                    ))
                } else {
                    TransmitterAction::None
                }
            }
            FlowStatus::Overflow => {
                self.state = TransmissionState::Fail;
                TransmitterAction::Done(ProcessingResult::ProcessedError(
                    TransportError::FlowControlOverflow,
                ))
            }
        }
    }

    /// Send the next chunk of the payload as a Consecutive Frame. Called
    /// once per CTS and, while pacing a block, once per `tick()`. Only
    /// ever invoked with `offset < payload.len()` -- the FF/CF chunking in
    /// `start()` never leaves a payload fully consumed by the First Frame
    /// alone, so there is always at least one Consecutive Frame to send.
    fn send_next_cf(&mut self) -> TransmitterAction {
        let end = (self.offset + self.cf_payload_len).min(self.payload.len());
        let chunk = self.payload[self.offset..end].to_vec();
        self.offset = end;
        let seq = self.sequence_number;
        self.sequence_number = (self.sequence_number + 1) % 16;
        let frame = FrameKind::Consecutive {
            sequence_number: seq,
            data: chunk,
        };
        if self.offset >= self.payload.len() {
            self.state = TransmissionState::Done;
            return TransmitterAction::SendFrameThenDone(frame);
        }
        if let Some(remaining) = self.block_size_remaining {
            self.block_size_remaining = Some(remaining.saturating_sub(1));
        }
        self.state = if self.block_size_remaining == Some(0) {
            TransmissionState::WaitFc
        } else {
            TransmissionState::SendCfs
        };
        TransmitterAction::SendFrame(frame)
    }

    /// Advance elapsed-time counters by `delta_ms` milliseconds and, while
    /// pacing a block of Consecutive Frames, send the next one once
    /// `separation_time_us` has elapsed. Returns `TransmitterAction::None`
    /// when nothing needs to happen this tick.
    pub fn tick(&mut self, delta_ms: u32, params: &DoCanParameters) -> TransmitterAction {
        self.elapsed_ms += delta_ms;
        match self.state {
            TransmissionState::WaitFc => {
                if self.elapsed_ms >= u32::from(params.wait_flow_control_timeout_ms) {
                    self.state = TransmissionState::Fail;
                    TransmitterAction::Done(ProcessingResult::ProcessedError(
                        TransportError::FlowControlTimeout,
                    ))
                } else {
                    TransmitterAction::None
                }
            }
            TransmissionState::SendCfs => {
                let st_min_ms = self.separation_time_us / 1000;
                if self.elapsed_ms as u64 * 1000 >= self.separation_time_us as u64
                    || st_min_ms == 0
                {
                    self.elapsed_ms = 0;
                    self.send_next_cf()
                } else {
                    TransmitterAction::None
                }
            }
            _ => TransmitterAction::None,
        }
    }

    /// Whether this transmitter still needs high-frequency ticks to pace
    /// ST_min between Consecutive Frames.
    pub fn wants_fast_tick(&self) -> bool {
        self.state == TransmissionState::SendCfs
    }

    pub fn release(&mut self) {
        *self = MessageTransmitter::idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DoCanParameters {
        DoCanParameters {
            max_flow_control_wait_count: 2,
            ..DoCanParameters::default()
        }
    }

    // A padded-classic codec's limits: 7-byte Single/Consecutive Frame
    // payloads, 6-byte First Frame payload (the length field costs the
    // extra byte).
    fn classic_limits() -> PayloadLimits {
        PayloadLimits {
            single: 7,
            first: 6,
            consecutive: 7,
        }
    }

    #[test]
    fn payload_fitting_a_single_frame_is_sent_as_one_and_completes_immediately() {
        let mut tx = MessageTransmitter::idle();
        let pair = TransportAddressPair::new(1, 2);
        let payload = vec![0x12, 0x34];
        let action = tx.start(pair, payload.clone(), classic_limits(), &params());
        assert_eq!(
            action,
            TransmitterAction::SendFrameThenDone(FrameKind::Single { data: payload })
        );
        assert_eq!(tx.state(), TransmissionState::Done);
    }

    #[test]
    fn single_block_transfer_completes_after_cts() {
        let mut tx = MessageTransmitter::idle();
        let pair = TransportAddressPair::new(1, 2);
        let payload: Vec<u8> = (0..20).collect();
        let action = tx.start(pair, payload.clone(), classic_limits(), &params());
        assert_eq!(
            action,
            TransmitterAction::SendFrame(FrameKind::First {
                total_length: 20,
                data: payload[0..6].to_vec()
            })
        );
        assert_eq!(tx.state(), TransmissionState::WaitFc);

        let action = tx.on_flow_control(FlowStatus::ContinueToSend, 0, 0, &params());
        assert_eq!(
            action,
            TransmitterAction::SendFrame(FrameKind::Consecutive {
                sequence_number: 1,
                data: payload[6..13].to_vec()
            })
        );
        assert_eq!(tx.state(), TransmissionState::SendCfs);

        let action = tx.tick(1, &params());
        assert_eq!(
            action,
            TransmitterAction::SendFrameThenDone(FrameKind::Consecutive {
                sequence_number: 2,
                data: payload[13..20].to_vec()
            })
        );
        assert_eq!(tx.state(), TransmissionState::Done);
    }

    #[test]
    fn overflow_fails_transmission() {
        let mut tx = MessageTransmitter::idle();
        let pair = TransportAddressPair::new(1, 2);
        tx.start(pair, vec![0; 20], classic_limits(), &params());
        let action = tx.on_flow_control(FlowStatus::Overflow, 0, 0, &params());
        assert_eq!(
            action,
            TransmitterAction::Done(ProcessingResult::ProcessedError(
                TransportError::FlowControlOverflow
            ))
        );
        assert_eq!(tx.state(), TransmissionState::Fail);
    }

    #[test]
    fn repeated_wait_beyond_limit_fails_transmission() {
        let mut tx = MessageTransmitter::idle();
        let pair = TransportAddressPair::new(1, 2);
        tx.start(pair, vec![0; 20], classic_limits(), &params());
        assert_eq!(
            tx.on_flow_control(FlowStatus::Wait, 0, 0, &params()),
            TransmitterAction::None
        );
        assert_eq!(
            tx.on_flow_control(FlowStatus::Wait, 0, 0, &params()),
            TransmitterAction::None
        );
        let action = tx.on_flow_control(FlowStatus::Wait, 0, 0, &params());
        assert_eq!(
            action,
            TransmitterAction::Done(ProcessingResult::ProcessedError(
                TransportError::FlowControlWaitExceeded
            ))
        );
    }

    #[test]
    fn flow_control_timeout_fails_transmission() {
        let mut tx = MessageTransmitter::idle();
        let pair = TransportAddressPair::new(1, 2);
        tx.start(pair, vec![0; 20], classic_limits(), &params());
        let p = DoCanParameters {
            wait_flow_control_timeout_ms: 50,
            ..params()
        };
        assert_eq!(tx.tick(40, &p), TransmitterAction::None);
        let action = tx.tick(40, &p);
        assert_eq!(
            action,
            TransmitterAction::Done(ProcessingResult::ProcessedError(
                TransportError::FlowControlTimeout
            ))
        );
        assert_eq!(tx.state(), TransmissionState::Fail);
    }

    #[test]
    fn block_size_limits_cfs_sent_before_next_cts_is_required() {
        let mut tx = MessageTransmitter::idle();
        let pair = TransportAddressPair::new(1, 2);
        tx.start(pair, (0..30).collect(), classic_limits(), &params());
        // block size of 1: exactly one CF per CTS
        let action = tx.on_flow_control(FlowStatus::ContinueToSend, 1, 0, &params());
        assert!(matches!(action, TransmitterAction::SendFrame(FrameKind::Consecutive { .. })));
        assert_eq!(tx.state(), TransmissionState::WaitFc);
    }
}
