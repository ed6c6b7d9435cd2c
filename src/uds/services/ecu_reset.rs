//! UDS 0x11 ECUReset: subfunctions 01 (hard), 02 (key-off-on), 03 (soft),
//! 04 (enable rapid power shutdown), 05 (disable). The actual reset is
//! deferred until [`DiagJob::response_sent`] fires so the positive
//! response has a chance to actually reach the tester first.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{DiagReturnCode, ProcessingResult};
use crate::uds::job::{DiagJob, PositiveResponse};
use crate::uds::session::{ResetKind, Session, UdsLifecycleConnector};

const SID: u8 = 0x11;
/// Power-down time reported in the 0x04 (enable rapid power shutdown)
/// positive response, in seconds.
const POWER_DOWN_TIME_S: u8 = 10;
const RESET_TIME_BUDGET_MS: u32 = 500;

fn reset_kind_for(subfunction: u8) -> Option<ResetKind> {
    match subfunction {
        0x01 => Some(ResetKind::Hard),
        0x02 => Some(ResetKind::KeyOffOn),
        0x03 => Some(ResetKind::Soft),
        0x04 => Some(ResetKind::EnableRapidPowerShutdown),
        0x05 => Some(ResetKind::DisableRapidPowerShutdown),
        _ => None,
    }
}

pub struct EcuReset {
    connector: Rc<RefCell<dyn UdsLifecycleConnector>>,
    pending: Option<ResetKind>,
}

impl EcuReset {
    pub fn new(connector: Rc<RefCell<dyn UdsLifecycleConnector>>) -> Self {
        Self {
            connector,
            pending: None,
        }
    }
}

impl DiagJob for EcuReset {
    fn verify(&self, request: &[u8], _session: Session) -> DiagReturnCode {
        if request.first() != Some(&SID) {
            return DiagReturnCode::NotResponsible;
        }
        if request.len() != 2 {
            return DiagReturnCode::IsoInvalidFormat;
        }
        match reset_kind_for(request[1]) {
            Some(_) => DiagReturnCode::Ok,
            None => DiagReturnCode::IsoSubfunctionNotSupported,
        }
    }

    fn process(&mut self, request: &[u8], response: &mut PositiveResponse) -> DiagReturnCode {
        let kind = reset_kind_for(request[1]).expect("subfunction already verified");
        self.pending = Some(kind);
        response.push(request[1]);
        if kind == ResetKind::EnableRapidPowerShutdown {
            response.push(POWER_DOWN_TIME_S);
        }
        DiagReturnCode::Ok
    }

    fn response_sent(&mut self, result: ProcessingResult) {
        if let (ProcessingResult::ProcessedNoError, Some(kind)) = (result, self.pending.take()) {
            self.connector
                .borrow_mut()
                .request_reset(kind, RESET_TIME_BUDGET_MS);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingConnector {
        requested: Vec<(ResetKind, u32)>,
    }
    impl UdsLifecycleConnector for RecordingConnector {
        fn request_reset(&mut self, kind: ResetKind, budget_ms: u32) {
            self.requested.push((kind, budget_ms));
        }
    }

    #[test]
    fn hard_reset_is_deferred_until_response_sent() {
        let connector = Rc::new(RefCell::new(RecordingConnector {
            requested: Vec::new(),
        }));
        let mut job = EcuReset::new(connector.clone());
        let mut response = PositiveResponse::new(SID);
        let rc = job.process(&[0x11, 0x01], &mut response);
        assert_eq!(rc, DiagReturnCode::Ok);
        assert_eq!(response.as_bytes(), &[0x51, 0x01]);
        assert!(connector.borrow().requested.is_empty());

        job.response_sent(ProcessingResult::ProcessedNoError);
        assert_eq!(connector.borrow().requested, vec![(ResetKind::Hard, RESET_TIME_BUDGET_MS)]);
    }

    #[test]
    fn rapid_power_shutdown_response_carries_time_byte() {
        let connector = Rc::new(RefCell::new(RecordingConnector {
            requested: Vec::new(),
        }));
        let mut job = EcuReset::new(connector);
        let mut response = PositiveResponse::new(SID);
        job.process(&[0x11, 0x04], &mut response);
        assert_eq!(response.as_bytes(), &[0x51, 0x04, POWER_DOWN_TIME_S]);
    }

    #[test]
    fn reset_is_not_requested_if_the_response_failed_to_send() {
        let connector = Rc::new(RefCell::new(RecordingConnector {
            requested: Vec::new(),
        }));
        let mut job = EcuReset::new(connector.clone());
        let mut response = PositiveResponse::new(SID);
        job.process(&[0x11, 0x03], &mut response);
        job.response_sent(ProcessingResult::ProcessedError(
            crate::error::TransportError::SendFail,
        ));
        assert!(connector.borrow().requested.is_empty());
    }
}
