//! The diagnostic job contract: every concrete UDS service implements
//! [`DiagJob`], and the dispatcher in [`crate::uds::dispatcher`] walks a
//! flat, registration-ordered list of jobs the way the original walks a
//! prefix tree -- each job's own `verify()` performs the SID/subfunction
//! prefix match that would otherwise live in tree nodes.

use crate::error::{DiagReturnCode, ProcessingResult};
use crate::uds::session::Session;

/// Which active sessions a job is callable in, as a bitmask so a job can be
/// reachable from more than one session at once (e.g. TesterPresent is
/// valid everywhere).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionMask(pub u8);

impl SessionMask {
    pub const DEFAULT: SessionMask = SessionMask(0b001);
    pub const EXTENDED: SessionMask = SessionMask(0b010);
    pub const PROGRAMMING: SessionMask = SessionMask(0b100);
    pub const ALL: SessionMask = SessionMask(0b111);

    pub fn contains(self, session: Session) -> bool {
        let bit = match session {
            Session::Default => Self::DEFAULT.0,
            Session::Extended => Self::EXTENDED.0,
            Session::Programming => Self::PROGRAMMING.0,
        };
        self.0 & bit != 0
    }

    pub const fn union(self, other: SessionMask) -> SessionMask {
        SessionMask(self.0 | other.0)
    }
}

/// Append-only buffer for a positive response payload: the SID (with the
/// 0x40 positive-response bit already set) followed by whatever data bytes
/// the job appends. Mirrors the original's `PositiveResponse` helper class.
#[derive(Debug, Clone, Default)]
pub struct PositiveResponse {
    buf: Vec<u8>,
}

impl PositiveResponse {
    pub fn new(sid: u8) -> Self {
        Self { buf: vec![sid | 0x40] }
    }

    pub fn push(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// One node of the job tree. Every concrete UDS service -- a whole service
/// like `TesterPresent`, or one sibling of a multi-subfunction service like
/// `RoutineControl` -- implements this trait.
pub trait DiagJob {
    /// Sessions this job is reachable from. Checked by the dispatcher once
    /// `verify()` has already matched the request -- a job masked out of
    /// the active session ends the walk with an in-active-session NRC
    /// rather than being silently skipped, so jobs don't need to check it
    /// themselves.
    fn session_mask(&self) -> SessionMask {
        SessionMask::ALL
    }

    /// Whether this job is a long-running one the session manager should
    /// force an immediate `ISO_RESPONSE_PENDING` for before `process` is
    /// even invoked (spec 4.6, `acceptedJob`).
    fn is_long_running(&self) -> bool {
        false
    }

    /// Length/prefix/subfunction check. `NotResponsible` asks the
    /// dispatcher to try the next sibling; any other code ends the walk.
    fn verify(&self, request: &[u8], session: Session) -> DiagReturnCode;

    /// Perform the work and populate `response`. A non-`Ok` return becomes
    /// the NRC of a negative response instead.
    fn process(&mut self, request: &[u8], response: &mut PositiveResponse) -> DiagReturnCode;

    /// Optional post-send cleanup hook (e.g. releasing an async helper, or
    /// -- for `EcuReset` -- actually performing the deferred reset).
    fn response_sent(&mut self, _result: ProcessingResult) {}

    /// Whether a positive response to this exact request should be
    /// suppressed entirely (UDS `suppressPosRspMsgIndicationBit`). Checked
    /// only after `process` has already succeeded.
    fn suppresses_response(&self, _request: &[u8]) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_mask_contains_checks_the_right_bit() {
        assert!(SessionMask::DEFAULT.contains(Session::Default));
        assert!(!SessionMask::DEFAULT.contains(Session::Extended));
        let mask = SessionMask::DEFAULT.union(SessionMask::EXTENDED);
        assert!(mask.contains(Session::Default));
        assert!(mask.contains(Session::Extended));
        assert!(!mask.contains(Session::Programming));
    }

    #[test]
    fn positive_response_sets_the_response_bit_on_construction() {
        let resp = PositiveResponse::new(0x22);
        assert_eq!(resp.as_bytes(), &[0x62]);
    }
}
