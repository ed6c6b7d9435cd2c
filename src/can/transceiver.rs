//! The physical/data-link boundary: a `CanTransceiver` abstracts over what
//! actually puts frames on a bus, so the DoCAN layer above it is testable
//! without a real or virtual CAN interface.
//!
//! [`LinuxSocketCanTransceiver`] is the production implementation, built on
//! the raw `AF_CAN`/`SOCK_RAW` socket plumbing this crate already carried;
//! [`MockTransceiver`] is a host-side double used by the transport-layer
//! tests and demos.

use crate::can::frame::CanFrame;

/// Outcome of attempting to hand a frame to the transceiver for sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Frame handed to the controller immediately.
    Sent,
    /// No room on the controller right now; queued for later. The caller
    /// will get a callback through `poll_tx_events` once it actually goes
    /// out.
    Queued,
    /// The transceiver's internal queue is full; caller should retry.
    QueuedFull,
    Failed,
}

/// Lifecycle state of a transceiver, mirrored from the lifecycle manager's
/// component model but scoped to just this one component's states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverState {
    Closed,
    Initialized,
    Open,
    Muted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransceiverError {
    #[error("transceiver is not open")]
    NotOpen,
    #[error("underlying bus rejected the frame")]
    BusError,
}

/// Abstraction over a single CAN bus interface: send a frame, receive
/// frames, and find out what happened to frames you already tried to send.
///
/// Every method takes `&self` (not `&mut self`): a transceiver is shared
/// across the receivers/transmitters that multiplex onto it, guarded
/// internally the way [`crate::scheduler::Guarded`] guards shared state
/// elsewhere in this stack.
pub trait CanTransceiver {
    fn state(&self) -> TransceiverState;

    fn send(&self, frame: CanFrame) -> SendResult;

    /// Drain frames received since the last call, in arrival order.
    fn poll_rx(&self) -> Vec<CanFrame>;

    /// Drain (frame id, succeeded) pairs for sends that have since
    /// completed or failed at the controller.
    fn poll_tx_events(&self) -> Vec<(u32, bool)>;
}

/// A deterministic, in-memory transceiver for tests: `inject_rx` simulates a
/// frame arriving from the bus, `send` enqueues to `sent` for assertions and
/// immediately reports a configurable tx event.
pub struct MockTransceiver {
    state: std::sync::Mutex<MockState>,
}

struct MockState {
    transceiver_state: TransceiverState,
    rx_queue: Vec<CanFrame>,
    sent: Vec<CanFrame>,
    tx_events: Vec<(u32, bool)>,
    auto_ack: bool,
}

impl MockTransceiver {
    /// `auto_ack`: if true, every `send` immediately produces a successful
    /// tx event, as if the controller confirmed it instantly. If false, the
    /// test must call [`Self::complete_tx`] itself to simulate the
    /// transmit-callback path and its timeout edge cases.
    pub fn new(auto_ack: bool) -> Self {
        Self {
            state: std::sync::Mutex::new(MockState {
                transceiver_state: TransceiverState::Open,
                rx_queue: Vec::new(),
                sent: Vec::new(),
                tx_events: Vec::new(),
                auto_ack,
            }),
        }
    }

    pub fn inject_rx(&self, frame: CanFrame) {
        self.state.lock().unwrap().rx_queue.push(frame);
    }

    pub fn sent_frames(&self) -> Vec<CanFrame> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn complete_tx(&self, id: u32, success: bool) {
        self.state.lock().unwrap().tx_events.push((id, success));
    }

    pub fn set_state(&self, s: TransceiverState) {
        self.state.lock().unwrap().transceiver_state = s;
    }
}

impl CanTransceiver for MockTransceiver {
    fn state(&self) -> TransceiverState {
        self.state.lock().unwrap().transceiver_state
    }

    fn send(&self, frame: CanFrame) -> SendResult {
        let mut state = self.state.lock().unwrap();
        if state.transceiver_state != TransceiverState::Open {
            return SendResult::Failed;
        }
        let id = frame.id();
        state.sent.push(frame);
        if state.auto_ack {
            state.tx_events.push((id, true));
        }
        SendResult::Sent
    }

    fn poll_rx(&self) -> Vec<CanFrame> {
        std::mem::take(&mut self.state.lock().unwrap().rx_queue)
    }

    fn poll_tx_events(&self) -> Vec<(u32, bool)> {
        std::mem::take(&mut self.state.lock().unwrap().tx_events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_auto_ack_reports_immediate_success() {
        let t = MockTransceiver::new(true);
        let frame = CanFrame::new(0x123, &[1, 2, 3], 0).unwrap();
        assert_eq!(t.send(frame), SendResult::Sent);
        assert_eq!(t.poll_tx_events(), vec![(0x123, true)]);
    }

    #[test]
    fn mock_manual_ack_requires_explicit_completion() {
        let t = MockTransceiver::new(false);
        let frame = CanFrame::new(0x123, &[1], 0).unwrap();
        t.send(frame);
        assert!(t.poll_tx_events().is_empty());
        t.complete_tx(0x123, true);
        assert_eq!(t.poll_tx_events(), vec![(0x123, true)]);
    }

    #[test]
    fn closed_transceiver_rejects_sends() {
        let t = MockTransceiver::new(true);
        t.set_state(TransceiverState::Closed);
        let frame = CanFrame::new(0x123, &[1], 0).unwrap();
        assert_eq!(t.send(frame), SendResult::Failed);
    }

    #[test]
    fn rx_queue_drains_in_arrival_order() {
        let t = MockTransceiver::new(true);
        t.inject_rx(CanFrame::new(1, &[1], 0).unwrap());
        t.inject_rx(CanFrame::new(2, &[2], 0).unwrap());
        let drained = t.poll_rx();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].id(), 1);
        assert_eq!(drained[1].id(), 2);
        assert!(t.poll_rx().is_empty());
    }
}
