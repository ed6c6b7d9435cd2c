//! UDS 0x31 RoutineControl: start (01), stop (02) and request-results (03)
//! collapsed into a single job per routine identifier, switching on the
//! subfunction byte the way [`super::diagnostic_session_control`] and
//! [`super::ecu_reset`] already switch on theirs, rather than registering
//! three sibling jobs that share one identifier match.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::DiagReturnCode;
use crate::uds::job::{DiagJob, PositiveResponse, SessionMask};
use crate::uds::session::Session;

const SID: u8 = 0x31;

const START: u8 = 0x01;
const STOP: u8 = 0x02;
const REQUEST_RESULTS: u8 = 0x03;

/// The actual routine behaviour, independent of the start/stop/results
/// plumbing above. `stop` and `request_results` default to rejecting with
/// `IsoConditionsNotCorrect` for routines that only support being started.
pub trait Routine {
    fn start(&mut self, data: &[u8], response: &mut PositiveResponse) -> DiagReturnCode;

    fn stop(&mut self, _data: &[u8], _response: &mut PositiveResponse) -> DiagReturnCode {
        DiagReturnCode::IsoConditionsNotCorrect
    }

    fn request_results(&mut self, _response: &mut PositiveResponse) -> DiagReturnCode {
        DiagReturnCode::IsoConditionsNotCorrect
    }
}

/// Registers one [`Routine`] under one routine identifier (RID).
pub struct RoutineControlJob {
    rid: u16,
    session_mask: SessionMask,
    routine: Rc<RefCell<dyn Routine>>,
    started: bool,
    sequence_check_enabled: bool,
}

impl RoutineControlJob {
    pub fn new(rid: u16, routine: Rc<RefCell<dyn Routine>>) -> Self {
        Self {
            rid,
            session_mask: SessionMask::ALL,
            routine,
            started: false,
            sequence_check_enabled: true,
        }
    }

    pub fn with_session_mask(mut self, mask: SessionMask) -> Self {
        self.session_mask = mask;
        self
    }

    /// Allow stop/requestResults to be called without a prior successful
    /// start -- some routines (e.g. a pure read-only self-test) have no
    /// meaningful "not started yet" error to report.
    pub fn disable_sequence_check(mut self) -> Self {
        self.sequence_check_enabled = false;
        self
    }
}

impl DiagJob for RoutineControlJob {
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
        let rid = u16::from_be_bytes([request[2], request[3]]);
        if rid != self.rid {
            return DiagReturnCode::NotResponsible;
        }
        match request[1] {
            START | STOP | REQUEST_RESULTS => DiagReturnCode::Ok,
            _ => DiagReturnCode::IsoSubfunctionNotSupported,
        }
    }

    fn process(&mut self, request: &[u8], response: &mut PositiveResponse) -> DiagReturnCode {
        let subfunction = request[1];
        // Echoed unconditionally: `PositiveResponse` is discarded wholesale
        // by the dispatcher whenever `process` doesn't return `Ok`.
        response.push(subfunction);
        response.extend(&request[2..4]);

        let routine_data = &request[4..];
        match subfunction {
            START => {
                let rc = self.routine.borrow_mut().start(routine_data, response);
                if rc == DiagReturnCode::Ok {
                    self.started = true;
                }
                rc
            }
            STOP => {
                if !self.started && self.sequence_check_enabled {
                    return DiagReturnCode::IsoRequestSequenceError;
                }
                let rc = self.routine.borrow_mut().stop(routine_data, response);
                if rc == DiagReturnCode::Ok {
                    self.started = false;
                }
                rc
            }
            REQUEST_RESULTS => {
                if !self.started && self.sequence_check_enabled {
                    return DiagReturnCode::IsoRequestSequenceError;
                }
                self.routine.borrow_mut().request_results(response)
            }
            _ => unreachable!("subfunction already verified"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingRoutine {
        start_calls: u32,
        stop_calls: u32,
    }

    impl Routine for CountingRoutine {
        fn start(&mut self, _data: &[u8], response: &mut PositiveResponse) -> DiagReturnCode {
            self.start_calls += 1;
            response.push(0xAA);
            DiagReturnCode::Ok
        }

        fn stop(&mut self, _data: &[u8], _response: &mut PositiveResponse) -> DiagReturnCode {
            self.stop_calls += 1;
            DiagReturnCode::Ok
        }
    }

    fn job(routine: Rc<RefCell<CountingRoutine>>) -> RoutineControlJob {
        RoutineControlJob::new(0x1234, routine)
    }

    #[test]
    fn start_echoes_subfunction_and_rid_then_routine_data() {
        let routine = Rc::new(RefCell::new(CountingRoutine { start_calls: 0, stop_calls: 0 }));
        let mut job = job(routine.clone());
        let mut response = PositiveResponse::new(SID);
        let rc = job.process(&[0x31, 0x01, 0x12, 0x34], &mut response);
        assert_eq!(rc, DiagReturnCode::Ok);
        assert_eq!(response.as_bytes(), &[0x71, 0x01, 0x12, 0x34, 0xAA]);
        assert_eq!(routine.borrow().start_calls, 1);
    }

    #[test]
    fn stop_before_start_is_a_sequence_error() {
        let routine = Rc::new(RefCell::new(CountingRoutine { start_calls: 0, stop_calls: 0 }));
        let mut job = job(routine.clone());
        let mut response = PositiveResponse::new(SID);
        let rc = job.process(&[0x31, 0x02, 0x12, 0x34], &mut response);
        assert_eq!(rc, DiagReturnCode::IsoRequestSequenceError);
        assert_eq!(routine.borrow().stop_calls, 0);
    }

    #[test]
    fn stop_before_start_is_allowed_once_sequence_check_is_disabled() {
        let routine = Rc::new(RefCell::new(CountingRoutine { start_calls: 0, stop_calls: 0 }));
        let mut job = RoutineControlJob::new(0x1234, routine.clone()).disable_sequence_check();
        let mut response = PositiveResponse::new(SID);
        let rc = job.process(&[0x31, 0x02, 0x12, 0x34], &mut response);
        assert_eq!(rc, DiagReturnCode::Ok);
        assert_eq!(routine.borrow().stop_calls, 1);
    }

    #[test]
    fn mismatched_rid_is_not_responsible() {
        let routine = Rc::new(RefCell::new(CountingRoutine { start_calls: 0, stop_calls: 0 }));
        let job = job(routine);
        assert_eq!(
            job.verify(&[0x31, 0x01, 0x00, 0x01], Session::Default),
            DiagReturnCode::NotResponsible
        );
    }

    #[test]
    fn unsupported_subfunction_is_rejected() {
        let routine = Rc::new(RefCell::new(CountingRoutine { start_calls: 0, stop_calls: 0 }));
        let job = job(routine);
        assert_eq!(
            job.verify(&[0x31, 0x07, 0x12, 0x34], Session::Default),
            DiagReturnCode::IsoSubfunctionNotSupported
        );
    }
}
