//! UDS 0x2E WriteDataByIdentifier: `WriteIdentifierToMemory` copies the
//! request payload straight into a fixed-size backing buffer.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::DiagReturnCode;
use crate::uds::job::{DiagJob, PositiveResponse, SessionMask};
use crate::uds::session::Session;

const SID: u8 = 0x2E;

pub struct WriteIdentifierToMemory {
    rid: u16,
    session_mask: SessionMask,
    memory: Rc<RefCell<Vec<u8>>>,
}

impl WriteIdentifierToMemory {
    pub fn new(rid: u16, memory: Rc<RefCell<Vec<u8>>>) -> Self {
        Self { rid, session_mask: SessionMask::ALL, memory }
    }

    pub fn with_session_mask(mut self, mask: SessionMask) -> Self {
        self.session_mask = mask;
        self
    }
}

impl DiagJob for WriteIdentifierToMemory {
    fn session_mask(&self) -> SessionMask {
        self.session_mask
    }

    fn verify(&self, request: &[u8], _session: Session) -> DiagReturnCode {
        if request.first() != Some(&SID) {
            return DiagReturnCode::NotResponsible;
        }
        if request.len() < 3 {
            return DiagReturnCode::IsoInvalidFormat;
        }
        let requested = u16::from_be_bytes([request[1], request[2]]);
        if requested != self.rid {
            return DiagReturnCode::NotResponsible;
        }
        if request.len() - 3 != self.memory.borrow().len() {
            return DiagReturnCode::IsoInvalidFormat;
        }
        DiagReturnCode::Ok
    }

    fn process(&mut self, request: &[u8], response: &mut PositiveResponse) -> DiagReturnCode {
        self.memory.borrow_mut().copy_from_slice(&request[3..]);
        response.extend(&self.rid.to_be_bytes());
        DiagReturnCode::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_copied_into_the_backing_buffer() {
        let memory = Rc::new(RefCell::new(vec![0u8; 3]));
        let mut job = WriteIdentifierToMemory::new(0x1111, memory.clone());
        let mut response = PositiveResponse::new(SID);
        let rc = job.process(&[0x2E, 0x11, 0x11, 0xAA, 0xBB, 0xCC], &mut response);
        assert_eq!(rc, DiagReturnCode::Ok);
        assert_eq!(*memory.borrow(), vec![0xAA, 0xBB, 0xCC]);
        assert_eq!(response.as_bytes(), &[0x6E, 0x11, 0x11]);
    }

    #[test]
    fn wrong_length_is_rejected_at_verify() {
        let memory = Rc::new(RefCell::new(vec![0u8; 3]));
        let job = WriteIdentifierToMemory::new(0x1111, memory);
        let rc = job.verify(&[0x2E, 0x11, 0x11, 0xAA], Session::Default);
        assert_eq!(rc, DiagReturnCode::IsoInvalidFormat);
    }

    #[test]
    fn mismatched_identifier_is_not_responsible() {
        let memory = Rc::new(RefCell::new(vec![0u8; 3]));
        let job = WriteIdentifierToMemory::new(0x1111, memory);
        let rc = job.verify(&[0x2E, 0x22, 0x22, 0xAA, 0xBB, 0xCC], Session::Default);
        assert_eq!(rc, DiagReturnCode::NotResponsible);
    }
}
