//! Per-connection reception state machine: `IDLE -> ALLOCATE -> WAIT_RX ->
//! PROCESSING -> DONE/FAIL`, driven by inbound SF/FF/CF frames and the
//! cyclic tick.

use crate::can::codec::FlowStatus;
use crate::can::frame::TransportAddressPair;
use crate::docan::transport::{AllocateResult, DoCanParameters, TransportMessageProvider};
use crate::error::ProcessingResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceptionState {
    Idle,
    Allocate,
    WaitRx,
    Processing,
    Done,
    Fail,
}

/// What the transport layer should do in response to a reception step --
/// returned instead of called back directly so the receiver stays
/// self-contained and testable without a live transceiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverAction {
    None,
    SendFlowControl {
        status: FlowStatus,
        block_size: u8,
        separation_time_us: u32,
    },
    Deliver {
        pair: TransportAddressPair,
        payload: Vec<u8>,
    },
    DropWithWarn(&'static str),
}

pub struct MessageReceiver {
    state: ReceptionState,
    pair: TransportAddressPair,
    buffer: Vec<u8>,
    total_length: u32,
    next_sequence: u8,
    allocate_retries: u32,
    allocate_elapsed_ms: u32,
    flow_control_waits_sent: u32,
    rx_elapsed_ms: u32,
}

impl MessageReceiver {
    pub fn idle() -> Self {
        Self {
            state: ReceptionState::Idle,
            pair: TransportAddressPair::new(0, 0),
            buffer: Vec::new(),
            total_length: 0,
            next_sequence: 1,
            allocate_retries: 0,
            allocate_elapsed_ms: 0,
            flow_control_waits_sent: 0,
            rx_elapsed_ms: 0,
        }
    }

    pub fn state(&self) -> ReceptionState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == ReceptionState::Idle
    }

    /// A Single Frame arrived: try to allocate and, on success, deliver
    /// immediately (SF never waits -- the whole message is already here).
    pub fn on_single_frame(
        &mut self,
        pair: TransportAddressPair,
        data: Vec<u8>,
        provider: &dyn TransportMessageProvider,
    ) -> ReceiverAction {
        self.pair = pair;
        match provider.allocate(pair, data.len() as u32) {
            AllocateResult::Ok => {
                self.state = ReceptionState::Done;
                ReceiverAction::Deliver { pair, payload: data }
            }
            AllocateResult::NoMsgAvailable => {
                self.state = ReceptionState::Fail;
                ReceiverAction::DropWithWarn("no message buffer available for single frame")
            }
        }
    }

    /// A First Frame arrived: record the announced total length and begin
    /// the allocation retry loop (spec 4.4 item 2).
    pub fn on_first_frame(
        &mut self,
        pair: TransportAddressPair,
        total_length: u32,
        data: Vec<u8>,
        params: &DoCanParameters,
        provider: &dyn TransportMessageProvider,
    ) -> ReceiverAction {
        self.pair = pair;
        self.total_length = total_length;
        self.buffer = data;
        self.next_sequence = 1;
        self.allocate_retries = 0;
        self.allocate_elapsed_ms = 0;
        self.flow_control_waits_sent = 0;
        self.rx_elapsed_ms = 0;
        self.state = ReceptionState::Allocate;
        self.try_allocate(params, provider)
    }

    fn try_allocate(
        &mut self,
        params: &DoCanParameters,
        provider: &dyn TransportMessageProvider,
    ) -> ReceiverAction {
        match provider.allocate(self.pair, self.total_length) {
            AllocateResult::Ok => {
                self.state = ReceptionState::WaitRx;
                ReceiverAction::SendFlowControl {
                    status: FlowStatus::ContinueToSend,
                    block_size: params.max_block_size,
                    separation_time_us: params.min_separation_time_us,
                }
            }
            AllocateResult::NoMsgAvailable => {
                self.allocate_retries += 1;
                if self.allocate_retries > u32::from(params.max_allocate_retry_count) {
                    self.state = ReceptionState::Fail;
                    return ReceiverAction::SendFlowControl {
                        status: FlowStatus::Overflow,
                        block_size: 0,
                        separation_time_us: 0,
                    };
                }
                if self.flow_control_waits_sent >= u32::from(params.max_flow_control_wait_count) {
                    return ReceiverAction::None;
                }
                self.flow_control_waits_sent += 1;
                ReceiverAction::SendFlowControl {
                    status: FlowStatus::Wait,
                    block_size: 0,
                    separation_time_us: 0,
                }
            }
        }
    }

    pub fn on_consecutive_frame(&mut self, sequence_number: u8, data: Vec<u8>) -> ReceiverAction {
        if self.state != ReceptionState::WaitRx {
            return ReceiverAction::None;
        }
        if sequence_number != self.next_sequence {
            self.state = ReceptionState::Fail;
            return ReceiverAction::DropWithWarn("consecutive frame sequence number mismatch");
        }
        self.buffer.extend_from_slice(&data);
        self.next_sequence = (self.next_sequence + 1) % 16;
        self.rx_elapsed_ms = 0;

        if self.buffer.len() as u32 >= self.total_length {
            self.buffer.truncate(self.total_length as usize);
            self.state = ReceptionState::Done;
            ReceiverAction::Deliver {
                pair: self.pair,
                payload: std::mem::take(&mut self.buffer),
            }
        } else {
            ReceiverAction::None
        }
    }

    /// Advance elapsed-time counters by `delta_ms` and react to any timeout
    /// that fires as a result, retrying allocation once per tick while in
    /// `Allocate`. Called once per `cyclicTask`.
    pub fn tick(
        &mut self,
        delta_ms: u32,
        params: &DoCanParameters,
        provider: &dyn TransportMessageProvider,
    ) -> ReceiverAction {
        match self.state {
            ReceptionState::Allocate => {
                self.allocate_elapsed_ms += delta_ms;
                if self.allocate_elapsed_ms >= u32::from(params.wait_allocate_timeout_ms) {
                    self.state = ReceptionState::Fail;
                    return ReceiverAction::SendFlowControl {
                        status: FlowStatus::Overflow,
                        block_size: 0,
                        separation_time_us: 0,
                    };
                }
                self.try_allocate(params, provider)
            }
            ReceptionState::WaitRx => {
                self.rx_elapsed_ms += delta_ms;
                if self.rx_elapsed_ms >= u32::from(params.wait_rx_timeout_ms) {
                    self.state = ReceptionState::Fail;
                    return ReceiverAction::DropWithWarn("timed out waiting for consecutive frame");
                }
                ReceiverAction::None
            }
            _ => ReceiverAction::None,
        }
    }

    pub fn release(&mut self) {
        *self = MessageReceiver::idle();
    }
}

pub type ReceiverProcessingResult = ProcessingResult;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docan::transport::AllocateResult;

    struct AlwaysOk;
    impl TransportMessageProvider for AlwaysOk {
        fn allocate(&self, _pair: TransportAddressPair, _size: u32) -> AllocateResult {
            AllocateResult::Ok
        }
    }

    struct AlwaysFull;
    impl TransportMessageProvider for AlwaysFull {
        fn allocate(&self, _pair: TransportAddressPair, _size: u32) -> AllocateResult {
            AllocateResult::NoMsgAvailable
        }
    }

    fn params() -> DoCanParameters {
        DoCanParameters {
            wait_allocate_timeout_ms: 100,
            wait_rx_timeout_ms: 150,
            wait_tx_callback_timeout_ms: 50,
            wait_flow_control_timeout_ms: 150,
            max_allocate_retry_count: 3,
            max_flow_control_wait_count: 2,
            min_separation_time_us: 0,
            max_block_size: 0,
        }
    }

    #[test]
    fn single_frame_delivers_immediately_on_successful_allocation() {
        let mut recv = MessageReceiver::idle();
        let pair = TransportAddressPair::new(0xF54, 0x83);
        let action = recv.on_single_frame(pair, vec![0x12, 0x34], &AlwaysOk);
        assert_eq!(
            action,
            ReceiverAction::Deliver {
                pair,
                payload: vec![0x12, 0x34]
            }
        );
        assert_eq!(recv.state(), ReceptionState::Done);
    }

    #[test]
    fn single_frame_drops_on_allocation_failure() {
        let mut recv = MessageReceiver::idle();
        let pair = TransportAddressPair::new(1, 2);
        let action = recv.on_single_frame(pair, vec![1], &AlwaysFull);
        assert!(matches!(action, ReceiverAction::DropWithWarn(_)));
        assert_eq!(recv.state(), ReceptionState::Fail);
    }

    #[test]
    fn first_frame_sends_cts_and_accepts_matching_sequence() {
        let mut recv = MessageReceiver::idle();
        let pair = TransportAddressPair::new(0x56, 0x64);
        let action = recv.on_first_frame(pair, 15, vec![1, 2, 3, 4, 5, 6], &params(), &AlwaysOk);
        assert_eq!(
            action,
            ReceiverAction::SendFlowControl {
                status: FlowStatus::ContinueToSend,
                block_size: 0,
                separation_time_us: 0
            }
        );
        assert_eq!(recv.state(), ReceptionState::WaitRx);

        let action = recv.on_consecutive_frame(1, vec![7, 8, 9, 10, 11, 12, 13]);
        assert_eq!(action, ReceiverAction::None);
        let action = recv.on_consecutive_frame(2, vec![14, 15]);
        assert_eq!(
            action,
            ReceiverAction::Deliver {
                pair,
                payload: (1..=15).collect()
            }
        );
    }

    #[test]
    fn sequence_mismatch_terminates_connection() {
        let mut recv = MessageReceiver::idle();
        let pair = TransportAddressPair::new(1, 2);
        recv.on_first_frame(pair, 15, vec![0; 6], &params(), &AlwaysOk);
        let action = recv.on_consecutive_frame(5, vec![0; 6]);
        assert!(matches!(action, ReceiverAction::DropWithWarn(_)));
        assert_eq!(recv.state(), ReceptionState::Fail);
    }

    #[test]
    fn rx_timeout_drops_connection() {
        let mut recv = MessageReceiver::idle();
        let pair = TransportAddressPair::new(1, 2);
        recv.on_first_frame(pair, 15, vec![0; 6], &params(), &AlwaysOk);
        let p = params();
        assert_eq!(recv.tick(100, &p, &AlwaysOk), ReceiverAction::None);
        let action = recv.tick(100, &p, &AlwaysOk);
        assert!(matches!(action, ReceiverAction::DropWithWarn(_)));
        assert_eq!(recv.state(), ReceptionState::Fail);
    }

    #[test]
    fn allocation_retry_sends_wait_then_overflow_on_exhaustion() {
        let mut recv = MessageReceiver::idle();
        let pair = TransportAddressPair::new(1, 2);
        let p = DoCanParameters {
            max_allocate_retry_count: 1,
            max_flow_control_wait_count: 2,
            ..params()
        };
        let action = recv.on_first_frame(pair, 15, vec![0; 6], &p, &AlwaysFull);
        assert_eq!(
            action,
            ReceiverAction::SendFlowControl {
                status: FlowStatus::Wait,
                block_size: 0,
                separation_time_us: 0
            }
        );
        let action = recv.tick(10, &p, &AlwaysFull);
        assert_eq!(
            action,
            ReceiverAction::SendFlowControl {
                status: FlowStatus::Overflow,
                block_size: 0,
                separation_time_us: 0
            }
        );
        assert_eq!(recv.state(), ReceptionState::Fail);
    }
}
