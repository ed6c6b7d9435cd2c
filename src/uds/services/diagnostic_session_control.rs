//! UDS 0x10 DiagnosticSessionControl: subfunctions 01 (default), 02
//! (programming), 03 (extended).

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::DiagReturnCode;
use crate::uds::job::{DiagJob, PositiveResponse};
use crate::uds::session::{Session, SessionManager, SessionPersistence, UdsLifecycleConnector};

const SID: u8 = 0x10;
/// P2 / P2* timing bytes of the positive response (Open Question 3):
/// fixed at P2 = 50ms, P2* = 5000ms rather than a configurable knob nothing
/// else in the crate exercises.
const TIMING_BYTES: [u8; 4] = [0x00, 0x32, 0x01, 0xF4];

pub struct DiagnosticSessionControl {
    session_manager: Rc<RefCell<SessionManager>>,
    persistence: Rc<RefCell<dyn SessionPersistence>>,
    connector: Rc<RefCell<dyn UdsLifecycleConnector>>,
    clock_us: Rc<Cell<u32>>,
}

impl DiagnosticSessionControl {
    pub fn new(
        session_manager: Rc<RefCell<SessionManager>>,
        persistence: Rc<RefCell<dyn SessionPersistence>>,
        connector: Rc<RefCell<dyn UdsLifecycleConnector>>,
        clock_us: Rc<Cell<u32>>,
    ) -> Self {
        Self {
            session_manager,
            persistence,
            connector,
            clock_us,
        }
    }
}

impl DiagJob for DiagnosticSessionControl {
    fn verify(&self, request: &[u8], _session: Session) -> DiagReturnCode {
        if request.first() != Some(&SID) {
            return DiagReturnCode::NotResponsible;
        }
        if request.len() != 2 {
            return DiagReturnCode::IsoInvalidFormat;
        }
        match Session::from_subfunction(request[1]) {
            Some(_) => DiagReturnCode::Ok,
            None => DiagReturnCode::IsoSubfunctionNotSupported,
        }
    }

    fn process(&mut self, request: &[u8], response: &mut PositiveResponse) -> DiagReturnCode {
        let target = Session::from_subfunction(request[1]).expect("subfunction already verified");
        let now = self.clock_us.get();
        let rc = self.session_manager.borrow_mut().request_session_change(
            target,
            now,
            &mut *self.persistence.borrow_mut(),
            &mut *self.connector.borrow_mut(),
        );
        if rc != DiagReturnCode::Ok {
            return rc;
        }
        response.push(request[1]);
        response.extend(&TIMING_BYTES);
        DiagReturnCode::Ok
    }
}
