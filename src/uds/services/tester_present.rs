//! UDS 0x3E TesterPresent: the S3_client keep-alive. Subfunction 00 is the
//! only one defined; the caller's transport layer already restarts the
//! session timeout via [`crate::uds::session::SessionManager::response_sent`]
//! once the dispatcher returns `Ok`, so this job itself does nothing beyond
//! validating and echoing the request.

use crate::error::DiagReturnCode;
use crate::uds::job::{DiagJob, PositiveResponse};
use crate::uds::session::Session;

const SID: u8 = 0x3E;
const ZERO_SUBFUNCTION: u8 = 0x00;
/// `suppressPosRspMsgIndicationBit`.
const SUPPRESS_BIT: u8 = 0x80;

pub struct TesterPresent;

impl DiagJob for TesterPresent {
    fn verify(&self, request: &[u8], _session: Session) -> DiagReturnCode {
        if request.first() != Some(&SID) {
            return DiagReturnCode::NotResponsible;
        }
        if request.len() != 2 {
            return DiagReturnCode::IsoInvalidFormat;
        }
        if request[1] & !SUPPRESS_BIT != ZERO_SUBFUNCTION {
            return DiagReturnCode::IsoSubfunctionNotSupported;
        }
        DiagReturnCode::Ok
    }

    fn process(&mut self, request: &[u8], response: &mut PositiveResponse) -> DiagReturnCode {
        response.push(request[1] & !SUPPRESS_BIT);
        DiagReturnCode::Ok
    }

    fn suppresses_response(&self, request: &[u8]) -> bool {
        request.get(1).map_or(false, |sub| sub & SUPPRESS_BIT != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_request_echoes_zero_subfunction() {
        let mut job = TesterPresent;
        let mut response = PositiveResponse::new(SID);
        let rc = job.process(&[0x3E, 0x00], &mut response);
        assert_eq!(rc, DiagReturnCode::Ok);
        assert_eq!(response.as_bytes(), &[0x7E, 0x00]);
        assert!(!job.suppresses_response(&[0x3E, 0x00]));
    }

    #[test]
    fn suppress_bit_is_honored() {
        let job = TesterPresent;
        assert!(job.suppresses_response(&[0x3E, 0x80]));
    }

    #[test]
    fn nonzero_subfunction_is_rejected() {
        let job = TesterPresent;
        assert_eq!(
            job.verify(&[0x3E, 0x01], Session::Default),
            DiagReturnCode::IsoSubfunctionNotSupported
        );
    }
}
