//! UDS 0x2F InputOutputControlByIdentifier: a supplemented service not in
//! the distilled feature list but present in the original job tree --
//! `returnControlToEcu` / `freezeCurrentState` / `shortTermAdjustment`
//! against one I/O identifier.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::DiagReturnCode;
use crate::uds::job::{DiagJob, PositiveResponse, SessionMask};
use crate::uds::session::Session;

const SID: u8 = 0x2F;

const RETURN_CONTROL_TO_ECU: u8 = 0x00;
const FREEZE_CURRENT_STATE: u8 = 0x02;
const SHORT_TERM_ADJUSTMENT: u8 = 0x03;

/// The I/O behaviour one identifier is wired to.
pub trait IoControl {
    fn return_control_to_ecu(&mut self, response: &mut PositiveResponse) -> DiagReturnCode;
    fn freeze_current_state(&mut self, response: &mut PositiveResponse) -> DiagReturnCode;
    fn short_term_adjustment(
        &mut self,
        data: &[u8],
        response: &mut PositiveResponse,
    ) -> DiagReturnCode;
}

pub struct InputOutputControlByIdentifier {
    did: u16,
    session_mask: SessionMask,
    control: Rc<RefCell<dyn IoControl>>,
}

impl InputOutputControlByIdentifier {
    pub fn new(did: u16, control: Rc<RefCell<dyn IoControl>>) -> Self {
        Self { did, session_mask: SessionMask::ALL, control }
    }

    pub fn with_session_mask(mut self, mask: SessionMask) -> Self {
        self.session_mask = mask;
        self
    }
}

impl DiagJob for InputOutputControlByIdentifier {
    fn session_mask(&self) -> SessionMask {
        self.session_mask
    }

    fn verify(&self, request: &[u8], _session: Session) -> DiagReturnCode {
        if request.first() != Some(&SID) {
            return DiagReturnCode::NotResponsible;
        }
        if request.len() < 4 {
            return DiagReturnCode::IsoInvalidFormat;
        }
        let did = u16::from_be_bytes([request[1], request[2]]);
        if did != self.did {
            return DiagReturnCode::NotResponsible;
        }
        let control_param = request[3];
        if control_param == SHORT_TERM_ADJUSTMENT && request.len() < 5 {
            return DiagReturnCode::IsoInvalidFormat;
        }
        match control_param {
            RETURN_CONTROL_TO_ECU | FREEZE_CURRENT_STATE | SHORT_TERM_ADJUSTMENT => {
                DiagReturnCode::Ok
            }
            _ => DiagReturnCode::IsoRequestOutOfRange,
        }
    }

    fn process(&mut self, request: &[u8], response: &mut PositiveResponse) -> DiagReturnCode {
        let control_param = request[3];
        response.extend(&self.did.to_be_bytes());
        response.push(control_param);
        let mut control = self.control.borrow_mut();
        match control_param {
            RETURN_CONTROL_TO_ECU => control.return_control_to_ecu(response),
            FREEZE_CURRENT_STATE => control.freeze_current_state(response),
            SHORT_TERM_ADJUSTMENT => control.short_term_adjustment(&request[4..], response),
            _ => unreachable!("control parameter already verified"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingControl {
        last_adjustment: Option<Vec<u8>>,
    }
    impl IoControl for RecordingControl {
        fn return_control_to_ecu(&mut self, _response: &mut PositiveResponse) -> DiagReturnCode {
            DiagReturnCode::Ok
        }
        fn freeze_current_state(&mut self, _response: &mut PositiveResponse) -> DiagReturnCode {
            DiagReturnCode::Ok
        }
        fn short_term_adjustment(
            &mut self,
            data: &[u8],
            _response: &mut PositiveResponse,
        ) -> DiagReturnCode {
            self.last_adjustment = Some(data.to_vec());
            DiagReturnCode::Ok
        }
    }

    #[test]
    fn short_term_adjustment_forwards_the_payload() {
        let control = Rc::new(RefCell::new(RecordingControl { last_adjustment: None }));
        let mut job = InputOutputControlByIdentifier::new(0x3000, control.clone());
        let mut response = PositiveResponse::new(SID);
        let rc = job.process(&[0x2F, 0x30, 0x00, 0x03, 0x7F], &mut response);
        assert_eq!(rc, DiagReturnCode::Ok);
        assert_eq!(control.borrow().last_adjustment, Some(vec![0x7F]));
        assert_eq!(response.as_bytes(), &[0x6F, 0x30, 0x00, 0x03]);
    }

    #[test]
    fn short_term_adjustment_without_a_data_byte_is_rejected() {
        let control = Rc::new(RefCell::new(RecordingControl { last_adjustment: None }));
        let job = InputOutputControlByIdentifier::new(0x3000, control);
        let rc = job.verify(&[0x2F, 0x30, 0x00, 0x03], Session::Default);
        assert_eq!(rc, DiagReturnCode::IsoInvalidFormat);
    }

    #[test]
    fn unknown_control_parameter_is_out_of_range() {
        let control = Rc::new(RefCell::new(RecordingControl { last_adjustment: None }));
        let job = InputOutputControlByIdentifier::new(0x3000, control);
        let rc = job.verify(&[0x2F, 0x30, 0x00, 0x01], Session::Default);
        assert_eq!(rc, DiagReturnCode::IsoRequestOutOfRange);
    }
}
