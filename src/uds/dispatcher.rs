//! `DiagDispatcher`: walks the registered jobs in order (the flattened
//! form of the prefix tree spec.md section 4.5 describes -- each job's own
//! `verify()` performs the prefix/subfunction match a tree node would),
//! consults the session manager's `acceptedJob` hook, and turns the result
//! into a positive or negative response.

use log::debug;

use crate::error::DiagReturnCode;
use crate::uds::job::{DiagJob, PositiveResponse};
use crate::uds::session::{Session, SessionManager};

/// What the caller should put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Positive(Vec<u8>),
    /// `0x7F [SID] [NRC]`.
    Negative { sid: u8, nrc: u8 },
    /// An `ISO_RESPONSE_PENDING` (`0x7F [SID] 0x78`) was sent; the real
    /// response follows later once the job finishes.
    Pending { sid: u8 },
    /// The job succeeded but the request carried the
    /// suppress-positive-response bit (e.g. `TesterPresent`): nothing goes
    /// on the wire.
    Suppressed,
}

pub struct DiagDispatcher {
    jobs: Vec<Box<dyn DiagJob>>,
}

impl DiagDispatcher {
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    pub fn register(&mut self, job: Box<dyn DiagJob>) {
        self.jobs.push(job);
    }

    /// Walk the job list per spec 4.5's algorithm: the first job whose
    /// `verify()` doesn't return `NotResponsible` ends the walk. Per 4.5/6.2,
    /// a job that matches the request but is masked out of the active
    /// session is not a sibling-skip -- it ends the walk with the
    /// in-active-session NRC, the same way a bad length or subfunction
    /// byte would.
    pub fn execute(&mut self, request: &[u8], session_manager: &mut SessionManager) -> DispatchOutcome {
        let Some(&sid) = request.first() else {
            return DispatchOutcome::Negative {
                sid: 0,
                nrc: DiagReturnCode::IsoInvalidFormat.nrc(),
            };
        };
        let session = session_manager.session();

        for job in &mut self.jobs {
            let rc = job.verify(request, session);
            if rc == DiagReturnCode::NotResponsible {
                continue;
            }
            if rc == DiagReturnCode::Ok && !job.session_mask().contains(session) {
                return DispatchOutcome::Negative {
                    sid,
                    nrc: DiagReturnCode::IsoSubfunctionNotSupportedInActiveSession.nrc(),
                };
            }
            if rc != DiagReturnCode::Ok {
                return DispatchOutcome::Negative { sid, nrc: rc.nrc() };
            }

            let accepted = session_manager.accepted_job(job.as_ref());
            if accepted == DiagReturnCode::IsoResponsePending {
                debug!("uds: job for SID {:#04x} forced response-pending", sid);
                return DispatchOutcome::Pending { sid };
            }
            if accepted != DiagReturnCode::Ok {
                return DispatchOutcome::Negative {
                    sid,
                    nrc: accepted.nrc(),
                };
            }

            let mut response = PositiveResponse::new(sid);
            return match job.process(request, &mut response) {
                DiagReturnCode::Ok if job.suppresses_response(request) => DispatchOutcome::Suppressed,
                DiagReturnCode::Ok => DispatchOutcome::Positive(response.as_bytes().to_vec()),
                DiagReturnCode::IsoResponsePending => DispatchOutcome::Pending { sid },
                other => DispatchOutcome::Negative { sid, nrc: other.nrc() },
            };
        }

        DispatchOutcome::Negative {
            sid,
            nrc: DiagReturnCode::IsoServiceNotSupported.nrc(),
        }
    }
}

impl Default for DiagDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
