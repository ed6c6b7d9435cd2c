//! UDS 0x85 ControlDTCSetting: 01 unlocks (turns DTC recording back on), 02
//! locks the error memory (suspends DTC recording) -- ports
//! `ControlDTCSetting`'s on/off switch onto the error-memory collaborator
//! rather than leaving it as an unimplemented stub.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::DiagReturnCode;
use crate::uds::job::{DiagJob, PositiveResponse};
use crate::uds::session::Session;

const SID: u8 = 0x85;
const ON: u8 = 0x01;
const OFF: u8 = 0x02;

/// The error-memory collaborator DTC recording is suspended on/resumed on.
pub trait ErrorMemoryLock {
    fn lock(&mut self);
    fn unlock(&mut self);
}

pub struct ControlDtcSetting {
    error_memory: Rc<RefCell<dyn ErrorMemoryLock>>,
}

impl ControlDtcSetting {
    pub fn new(error_memory: Rc<RefCell<dyn ErrorMemoryLock>>) -> Self {
        Self { error_memory }
    }
}

impl DiagJob for ControlDtcSetting {
    fn verify(&self, request: &[u8], _session: Session) -> DiagReturnCode {
        if request.first() != Some(&SID) {
            return DiagReturnCode::NotResponsible;
        }
        if request.len() != 2 {
            return DiagReturnCode::IsoInvalidFormat;
        }
        match request[1] {
            ON | OFF => DiagReturnCode::Ok,
            _ => DiagReturnCode::IsoSubfunctionNotSupported,
        }
    }

    fn process(&mut self, request: &[u8], response: &mut PositiveResponse) -> DiagReturnCode {
        match request[1] {
            ON => self.error_memory.borrow_mut().unlock(),
            OFF => self.error_memory.borrow_mut().lock(),
            _ => unreachable!("subfunction already verified"),
        }
        response.push(request[1]);
        DiagReturnCode::Ok
    }
}
