//! UDS 0x22 ReadDataByIdentifier: three ways to back one data identifier
//! (DID), mirroring `ReadIdentifierFromMemory` (a fixed snapshot copied in
//! at construction), `ReadIdentifierFromSliceRef` (a live reference re-read
//! on every request) and `ReadIdentifierFromNvStorage` (fixed- or
//! variable-length EEPROM blocks, the latter prefixed by a 4-byte
//! big-endian length record).

use std::cell::RefCell;
use std::rc::Rc;

use log::warn;

use crate::error::{DiagReturnCode, PersistenceError};
use crate::uds::job::{DiagJob, PositiveResponse, SessionMask};
use crate::uds::session::Session;

const SID: u8 = 0x22;

fn verify_common(request: &[u8], rid: u16) -> DiagReturnCode {
    if request.first() != Some(&SID) {
        return DiagReturnCode::NotResponsible;
    }
    if request.len() != 3 {
        return DiagReturnCode::IsoInvalidFormat;
    }
    let requested = u16::from_be_bytes([request[1], request[2]]);
    if requested != rid {
        return DiagReturnCode::NotResponsible;
    }
    DiagReturnCode::Ok
}

/// A fixed byte snapshot copied in once at construction.
pub struct ReadIdentifierFromMemory {
    rid: u16,
    session_mask: SessionMask,
    data: Vec<u8>,
}

impl ReadIdentifierFromMemory {
    pub fn new(rid: u16, data: &[u8]) -> Self {
        Self { rid, session_mask: SessionMask::ALL, data: data.to_vec() }
    }

    pub fn with_session_mask(mut self, mask: SessionMask) -> Self {
        self.session_mask = mask;
        self
    }
}

impl DiagJob for ReadIdentifierFromMemory {
    fn session_mask(&self) -> SessionMask {
        self.session_mask
    }

    fn verify(&self, request: &[u8], _session: Session) -> DiagReturnCode {
        verify_common(request, self.rid)
    }

    fn process(&mut self, _request: &[u8], response: &mut PositiveResponse) -> DiagReturnCode {
        response.extend(&self.rid.to_be_bytes());
        response.extend(&self.data);
        DiagReturnCode::Ok
    }
}

/// A live reference: the slice content may change between requests, so
/// every read sees the current value rather than a snapshot.
pub struct ReadIdentifierFromSliceRef {
    rid: u16,
    session_mask: SessionMask,
    data: Rc<RefCell<Vec<u8>>>,
}

impl ReadIdentifierFromSliceRef {
    pub fn new(rid: u16, data: Rc<RefCell<Vec<u8>>>) -> Self {
        Self { rid, session_mask: SessionMask::ALL, data }
    }

    pub fn with_session_mask(mut self, mask: SessionMask) -> Self {
        self.session_mask = mask;
        self
    }
}

impl DiagJob for ReadIdentifierFromSliceRef {
    fn session_mask(&self) -> SessionMask {
        self.session_mask
    }

    fn verify(&self, request: &[u8], _session: Session) -> DiagReturnCode {
        verify_common(request, self.rid)
    }

    fn process(&mut self, _request: &[u8], response: &mut PositiveResponse) -> DiagReturnCode {
        response.extend(&self.rid.to_be_bytes());
        response.extend(&self.data.borrow());
        DiagReturnCode::Ok
    }
}

/// EEPROM-backed block store the NV-storage forms below read from.
pub trait NvStorage {
    fn read_block(&self, block_id: u16, buf: &mut [u8]) -> Result<(), PersistenceError>;
}

enum NvShape {
    Fixed { block: u16, length: usize },
    Variable { length_block: u16, data_block: u16 },
}

/// An EEPROM-backed DID, either a fixed-length block or a variable-length
/// one whose size lives in a separate 4-byte big-endian length block read
/// first.
pub struct ReadIdentifierFromNvStorage {
    rid: u16,
    session_mask: SessionMask,
    storage: Rc<RefCell<dyn NvStorage>>,
    shape: NvShape,
}

impl ReadIdentifierFromNvStorage {
    pub fn fixed_length(
        rid: u16,
        storage: Rc<RefCell<dyn NvStorage>>,
        block: u16,
        length: usize,
    ) -> Self {
        Self {
            rid,
            session_mask: SessionMask::ALL,
            storage,
            shape: NvShape::Fixed { block, length },
        }
    }

    pub fn variable_length(
        rid: u16,
        storage: Rc<RefCell<dyn NvStorage>>,
        length_block: u16,
        data_block: u16,
    ) -> Self {
        Self {
            rid,
            session_mask: SessionMask::ALL,
            storage,
            shape: NvShape::Variable { length_block, data_block },
        }
    }

    pub fn with_session_mask(mut self, mask: SessionMask) -> Self {
        self.session_mask = mask;
        self
    }

    fn read_block(&self, block: u16, len: usize) -> Result<Vec<u8>, DiagReturnCode> {
        let mut buf = vec![0u8; len];
        match self.storage.borrow().read_block(block, &mut buf) {
            Ok(()) => Ok(buf),
            // A never-written block restored from its ROM default, or one
            // that failed its integrity check, is still readable -- the
            // crate's benign-default policy for EEPROM misses applies here
            // the same way it does to session persistence.
            Err(PersistenceError::RestoredFromRom) => Ok(buf),
            Err(PersistenceError::IntegrityFailed) => {
                warn!(
                    "uds: NV block {:#x} failed its integrity check, returning zeroed data",
                    block
                );
                Ok(vec![0u8; len])
            }
            Err(e) => {
                warn!("uds: NV block {:#x} read failed: {}", block, e);
                Err(DiagReturnCode::IsoConditionsNotCorrect)
            }
        }
    }
}

impl DiagJob for ReadIdentifierFromNvStorage {
    fn session_mask(&self) -> SessionMask {
        self.session_mask
    }

    fn verify(&self, request: &[u8], _session: Session) -> DiagReturnCode {
        verify_common(request, self.rid)
    }

    fn process(&mut self, _request: &[u8], response: &mut PositiveResponse) -> DiagReturnCode {
        let data = match &self.shape {
            NvShape::Fixed { block, length } => match self.read_block(*block, *length) {
                Ok(data) => data,
                Err(rc) => return rc,
            },
            NvShape::Variable { length_block, data_block } => {
                let length_bytes = match self.read_block(*length_block, 4) {
                    Ok(bytes) => bytes,
                    Err(rc) => return rc,
                };
                let length =
                    u32::from_be_bytes([length_bytes[0], length_bytes[1], length_bytes[2], length_bytes[3]])
                        as usize;
                match self.read_block(*data_block, length) {
                    Ok(data) => data,
                    Err(rc) => return rc,
                }
            }
        };
        response.extend(&self.rid.to_be_bytes());
        response.extend(&data);
        DiagReturnCode::Ok
    }
}
