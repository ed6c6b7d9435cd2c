//! Per-bus transport layer: multiplexes classified frames from the
//! physical layer into per-connection reception/transmission state
//! machines, drives their cyclic retry/timeout cadence, and fans a
//! shutdown request out across every bus via [`TransportLayerSet`].

use log::warn;

use crate::can::frame::TransportAddressPair;
use crate::can::transceiver::CanTransceiver;
use crate::docan::physical::{ClassifiedFrame, DoCanPhysicalTransceiver};
use crate::docan::receiver::{MessageReceiver, ReceiverAction};
use crate::docan::transmitter::{MessageTransmitter, TransmitterAction};
use crate::error::{PoolExhausted, ProcessingResult, TransportError};
use crate::pool::{Pool, SlotId};

/// Outcome of asking the owning application for a receive buffer of a given
/// size. `NoMsgAvailable` drives the allocation-retry/FC-WAIT loop in
/// [`crate::docan::receiver::MessageReceiver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocateResult {
    Ok,
    NoMsgAvailable,
}

/// The application-supplied counterpart to `IDoCanTransportMessageProvider`:
/// asked once per inbound First Frame (and again on each allocation retry)
/// whether a buffer of `size` bytes can be produced for `pair`.
pub trait TransportMessageProvider {
    fn allocate(&self, pair: TransportAddressPair, size: u32) -> AllocateResult;
}

/// Tuning knobs for one transport layer instance, ported field-for-field
/// from `DoCanParameters.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoCanParameters {
    pub wait_allocate_timeout_ms: u16,
    pub wait_rx_timeout_ms: u16,
    pub wait_tx_callback_timeout_ms: u16,
    pub wait_flow_control_timeout_ms: u16,
    pub max_allocate_retry_count: u8,
    pub max_flow_control_wait_count: u8,
    pub min_separation_time_us: u32,
    pub max_block_size: u8,
}

impl Default for DoCanParameters {
    fn default() -> Self {
        Self {
            wait_allocate_timeout_ms: 1000,
            wait_rx_timeout_ms: 1000,
            wait_tx_callback_timeout_ms: 1000,
            wait_flow_control_timeout_ms: 1000,
            max_allocate_retry_count: 3,
            max_flow_control_wait_count: 10,
            min_separation_time_us: 0,
            max_block_size: 0,
        }
    }
}

/// Callback invoked once a send or receive concludes, successfully or not.
pub type ProcessedListener = Box<dyn FnMut(ProcessingResult) + Send>;

struct PendingTransmitter {
    slot: SlotId,
    listener: ProcessedListener,
}

/// One physical bus's worth of DoCAN state: the classifying physical
/// transceiver plus a reception pool and a transmission pool, both
/// fixed-capacity (spec non-goal: no dynamic allocation beyond fixed
/// pools).
pub struct DoCanTransportLayer<T: CanTransceiver> {
    bus_id: u8,
    physical: DoCanPhysicalTransceiver<T>,
    params: DoCanParameters,
    receivers: Pool<MessageReceiver>,
    receiver_pairs: Vec<(TransportAddressPair, SlotId)>,
    transmitters: Pool<MessageTransmitter>,
    transmitter_entries: Vec<PendingTransmitter>,
    shutdown_requested: bool,
}

impl<T: CanTransceiver> DoCanTransportLayer<T> {
    pub fn new(
        bus_id: u8,
        physical: DoCanPhysicalTransceiver<T>,
        params: DoCanParameters,
        max_concurrent_receptions: usize,
        max_concurrent_transmissions: usize,
    ) -> Self {
        Self {
            bus_id,
            physical,
            params,
            receivers: Pool::with_capacity(max_concurrent_receptions),
            receiver_pairs: Vec::new(),
            transmitters: Pool::with_capacity(max_concurrent_transmissions),
            transmitter_entries: Vec::new(),
            shutdown_requested: false,
        }
    }

    pub fn bus_id(&self) -> u8 {
        self.bus_id
    }

    /// Number of sends and receptions still in flight. `TransportLayerSet`
    /// polls this to decide when a shutdown has completed.
    pub fn pending_count(&self) -> usize {
        self.receivers.in_use() + self.transmitters.in_use()
    }

    /// Queue an outbound diagnostic message. Fails immediately if the
    /// addressing filter has no route for `pair`, or if the transmitter
    /// pool is exhausted.
    pub fn send(
        &mut self,
        pair: TransportAddressPair,
        payload: Vec<u8>,
        mut listener: ProcessedListener,
    ) -> Result<(), TransportError> {
        let limits = match self.physical.transmission_parameters_exist(pair) {
            Some(limits) => limits,
            None => {
                listener(ProcessingResult::ProcessedError(TransportError::SendFail));
                return Err(TransportError::SendFail);
            }
        };
        let mut transmitter = MessageTransmitter::idle();
        let action = transmitter.start(pair, payload, limits, &self.params);
        let slot = match self.transmitters.allocate(transmitter) {
            Ok(slot) => slot,
            Err(PoolExhausted) => {
                listener(ProcessingResult::ProcessedError(TransportError::QueueFull));
                return Err(TransportError::QueueFull);
            }
        };
        self.transmitter_entries
            .push(PendingTransmitter { slot, listener });
        self.apply_transmitter_action(slot, action);
        Ok(())
    }

    /// Drain classified frames from the physical layer and route each one
    /// to its receiver/transmitter, allocating a new receiver slot on an
    /// unseen First/Single Frame.
    pub fn process_rx<P: TransportMessageProvider>(&mut self, provider: &P) {
        let frames = self.physical.poll_classified();
        for frame in frames {
            self.route_frame(frame, provider);
        }
    }

    fn route_frame<P: TransportMessageProvider>(&mut self, frame: ClassifiedFrame, provider: &P) {
        match frame {
            ClassifiedFrame::Single { pair, data, .. } => {
                let mut receiver = MessageReceiver::idle();
                let action = receiver.on_single_frame(pair, data, provider);
                match self.receivers.allocate(receiver) {
                    Ok(slot) => self.apply_receiver_action(slot, pair, action),
                    Err(PoolExhausted) => {
                        warn!("docan: reception pool exhausted on single frame from bus {}", self.bus_id);
                    }
                }
            }
            ClassifiedFrame::First {
                pair,
                total_length,
                data,
                ..
            } => {
                let mut receiver = MessageReceiver::idle();
                let action = receiver.on_first_frame(pair, total_length, data, &self.params, provider);
                match self.receivers.allocate(receiver) {
                    Ok(slot) => {
                        self.receiver_pairs.push((pair, slot));
                        self.apply_receiver_action(slot, pair, action);
                    }
                    Err(PoolExhausted) => {
                        warn!("docan: reception pool exhausted on first frame from bus {}", self.bus_id);
                    }
                }
            }
            ClassifiedFrame::Consecutive {
                pair,
                sequence_number,
                data,
                ..
            } => {
                if let Some(slot) = self.find_receiver(pair) {
                    let action = self
                        .receivers
                        .get_mut(slot)
                        .map(|r| r.on_consecutive_frame(sequence_number, data))
                        .unwrap_or(ReceiverAction::None);
                    self.apply_receiver_action(slot, pair, action);
                }
            }
            ClassifiedFrame::FlowControl {
                pair,
                status,
                block_size,
                separation_time_us,
            } => {
                if let Some(entry) = self
                    .transmitter_entries
                    .iter()
                    .position(|e| self.transmitters.get(e.slot).map(|t| t.pair()) == Some(pair))
                {
                    let slot = self.transmitter_entries[entry].slot;
                    let action = self
                        .transmitters
                        .get_mut(slot)
                        .map(|t| t.on_flow_control(status, block_size, separation_time_us, &self.params))
                        .unwrap_or(TransmitterAction::None);
                    self.apply_transmitter_action(slot, action);
                }
            }
        }
    }

    fn find_receiver(&self, pair: TransportAddressPair) -> Option<SlotId> {
        self.receiver_pairs
            .iter()
            .find(|(p, _)| *p == pair)
            .map(|(_, s)| *s)
    }

    fn apply_receiver_action(&mut self, slot: SlotId, pair: TransportAddressPair, action: ReceiverAction) {
        match action {
            ReceiverAction::None => {}
            ReceiverAction::SendFlowControl {
                status,
                block_size,
                separation_time_us,
            } => {
                self.physical
                    .send_flow_control(pair, status, block_size, separation_time_us);
            }
            ReceiverAction::Deliver { payload, .. } => {
                log::debug!("docan: delivered {} byte message for {:?}", payload.len(), pair);
                self.release_receiver(slot);
            }
            ReceiverAction::DropWithWarn(reason) => {
                warn!("docan: reception dropped: {}", reason);
                self.release_receiver(slot);
            }
        }
    }

    fn release_receiver(&mut self, slot: SlotId) {
        self.receivers.release(slot);
        self.receiver_pairs.retain(|(_, s)| *s != slot);
    }

    fn apply_transmitter_action(&mut self, slot: SlotId, action: TransmitterAction) {
        match action {
            TransmitterAction::None => {}
            TransmitterAction::SendFrame(kind) => {
                if let Some(pair) = self.transmitters.get(slot).map(|t| t.pair()) {
                    self.physical.send_kind(pair, &kind);
                }
            }
            TransmitterAction::SendFrameThenDone(kind) => {
                if let Some(pair) = self.transmitters.get(slot).map(|t| t.pair()) {
                    self.physical.send_kind(pair, &kind);
                }
                self.finish_transmitter(slot, ProcessingResult::ProcessedNoError);
            }
            TransmitterAction::Done(result) => {
                self.finish_transmitter(slot, result);
            }
        }
    }

    fn finish_transmitter(&mut self, slot: SlotId, result: ProcessingResult) {
        self.transmitters.release(slot);
        if let Some(idx) = self.transmitter_entries.iter().position(|e| e.slot == slot) {
            let mut entry = self.transmitter_entries.remove(idx);
            (entry.listener)(result);
        }
    }

    /// Coarse retry/timeout cadence: advances every in-flight receiver and
    /// transmitter by `delta_ms` milliseconds. Call once per scheduler tick.
    pub fn cyclic_task<P: TransportMessageProvider>(&mut self, delta_ms: u32, provider: &P) {
        let slots: Vec<SlotId> = self.receivers.iter_occupied().map(|(s, _)| s).collect();
        for slot in slots {
            let (pair, action) = {
                let pair = self
                    .receiver_pairs
                    .iter()
                    .find(|(_, s)| *s == slot)
                    .map(|(p, _)| *p)
                    .unwrap_or(TransportAddressPair::new(0, 0));
                let action = self
                    .receivers
                    .get_mut(slot)
                    .map(|r| r.tick(delta_ms, &self.params, provider))
                    .unwrap_or(ReceiverAction::None);
                (pair, action)
            };
            self.apply_receiver_action(slot, pair, action);
        }

        let slots: Vec<SlotId> = self.transmitters.iter_occupied().map(|(s, _)| s).collect();
        for slot in slots {
            let action = self
                .transmitters
                .get_mut(slot)
                .map(|t| t.tick(delta_ms, &self.params))
                .unwrap_or(TransmitterAction::None);
            self.apply_transmitter_action(slot, action);
        }
    }

    /// Returns `true` while at least one transmitter still wants
    /// high-frequency ST_min-paced ticks (`tick()` on the transmitter
    /// returned `true` last time it was polled).
    pub fn tick_needed(&self) -> bool {
        self.transmitters
            .iter_occupied()
            .any(|(_, t)| t.wants_fast_tick())
    }

    pub fn request_shutdown(&mut self) {
        self.shutdown_requested = true;
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_requested && self.pending_count() == 0
    }
}

/// Aggregates the per-bus transport layers of a multi-bus ECU, mirroring
/// `DoCanTransportLayerContainer`: a single shutdown request fans out to
/// every member, and completion is reported once every member's pending
/// counter has drained to zero.
pub struct TransportLayerSet<T: CanTransceiver> {
    layers: Vec<DoCanTransportLayer<T>>,
}

impl<T: CanTransceiver> TransportLayerSet<T> {
    pub fn new(layers: Vec<DoCanTransportLayer<T>>) -> Self {
        Self { layers }
    }

    pub fn layers(&self) -> &[DoCanTransportLayer<T>] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [DoCanTransportLayer<T>] {
        &mut self.layers
    }

    pub fn shutdown(&mut self) {
        for layer in &mut self.layers {
            layer.request_shutdown();
        }
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.layers.iter().all(|l| l.is_shutdown_complete())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::addressing::{AddressEntry, AddressingFilter};
    use crate::can::codec::FrameCodecConfig;
    use crate::can::transceiver::MockTransceiver;

    struct AlwaysOk;
    impl TransportMessageProvider for AlwaysOk {
        fn allocate(&self, _pair: TransportAddressPair, _size: u32) -> AllocateResult {
            AllocateResult::Ok
        }
    }

    fn layer() -> DoCanTransportLayer<MockTransceiver> {
        let entry = AddressEntry {
            can_reception_id: 0x100,
            can_transmission_id: 0x101,
            transport_source_id: 1,
            transport_target_id: 2,
            reception_codec: FrameCodecConfig::padded_classic(),
            transmission_codec: FrameCodecConfig::padded_classic(),
        };
        let filter = AddressingFilter::new(vec![entry]);
        let physical = DoCanPhysicalTransceiver::new(MockTransceiver::new(true), filter);
        DoCanTransportLayer::new(0, physical, DoCanParameters::default(), 4, 4)
    }

    #[test]
    fn send_with_no_route_reports_send_fail_immediately() {
        use std::sync::{Arc, Mutex};

        let mut layer = layer();
        let bogus = TransportAddressPair::new(9, 9);
        let result = Arc::new(Mutex::new(None));
        let result_clone = result.clone();
        let r = layer.send(
            bogus,
            vec![1, 2, 3],
            Box::new(move |res| *result_clone.lock().unwrap() = Some(res)),
        );
        assert_eq!(r, Err(TransportError::SendFail));
        assert_eq!(
            *result.lock().unwrap(),
            Some(ProcessingResult::ProcessedError(TransportError::SendFail))
        );
    }

    #[test]
    fn shutdown_completes_once_pending_count_reaches_zero() {
        let mut set = TransportLayerSet::new(vec![layer()]);
        set.shutdown();
        assert!(set.is_shutdown_complete());
    }
}
