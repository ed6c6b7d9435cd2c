//! Tagged return codes for the three error families used across the stack.
//!
//! Per the propagation policy: a component surfaces errors from its own
//! public contract via its own family, translating collaborator errors
//! rather than re-raising them with a foreign type.

use thiserror::Error;

/// ISO 14229 (UDS) return codes. Internal-only variants (`NotResponsible`,
/// `Ok`) never leak onto the wire; the rest map directly onto negative
/// response codes (NRC) per spec section 6.2.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DiagReturnCode {
    /// Proceed: job accepted the request.
    #[error("ok")]
    Ok,
    /// Internal only: this job doesn't handle the request, try the next sibling.
    #[error("not responsible for this request")]
    NotResponsible,
    #[error("service not supported")]
    IsoServiceNotSupported,
    #[error("subfunction not supported")]
    IsoSubfunctionNotSupported,
    #[error("invalid format")]
    IsoInvalidFormat,
    #[error("busy, repeat request")]
    IsoBusyRepeatRequest,
    #[error("conditions not correct")]
    IsoConditionsNotCorrect,
    #[error("request sequence error")]
    IsoRequestSequenceError,
    #[error("request out of range")]
    IsoRequestOutOfRange,
    #[error("security access denied")]
    IsoSecurityAccessDenied,
    #[error("response pending")]
    IsoResponsePending,
    #[error("subfunction not supported in active session")]
    IsoSubfunctionNotSupportedInActiveSession,
    #[error("service not supported in active session")]
    IsoServiceNotSupportedInActiveSession,
}

impl DiagReturnCode {
    /// The NRC byte placed after the SID in a `0x7F [SID] [NRC]` negative
    /// response. Panics on the two internal-only codes, which must never
    /// reach response encoding.
    pub fn nrc(self) -> u8 {
        match self {
            DiagReturnCode::Ok | DiagReturnCode::NotResponsible => {
                unreachable!("internal-only return code must not be encoded as an NRC")
            }
            DiagReturnCode::IsoServiceNotSupported => 0x11,
            DiagReturnCode::IsoSubfunctionNotSupported => 0x12,
            DiagReturnCode::IsoInvalidFormat => 0x13,
            DiagReturnCode::IsoBusyRepeatRequest => 0x21,
            DiagReturnCode::IsoConditionsNotCorrect => 0x22,
            DiagReturnCode::IsoRequestSequenceError => 0x24,
            DiagReturnCode::IsoRequestOutOfRange => 0x31,
            DiagReturnCode::IsoSecurityAccessDenied => 0x33,
            DiagReturnCode::IsoResponsePending => 0x78,
            DiagReturnCode::IsoSubfunctionNotSupportedInActiveSession => 0x7E,
            DiagReturnCode::IsoServiceNotSupportedInActiveSession => 0x7F,
        }
    }
}

/// Transport-layer error family (ISO 15765-2 send path).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("ok")]
    Ok,
    #[error("no route for the given transport address pair")]
    SendFail,
    #[error("transport layer not initialized")]
    NotInitialized,
    #[error("no free transmitter slot")]
    QueueFull,
    #[error("flow control overflow received from peer")]
    FlowControlOverflow,
    #[error("timed out waiting for a transmit callback")]
    TxCallbackTimeout,
    #[error("timed out waiting for a flow control frame")]
    FlowControlTimeout,
    #[error("peer sent too many consecutive flow control waits")]
    FlowControlWaitExceeded,
}

/// Outcome reported to a message's processed-listener once its transmission
/// (or reception) concludes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingResult {
    ProcessedNoError,
    ProcessedError(TransportError),
}

/// Persistent-store (EEPROM) request outcomes.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("ok")]
    Ok,
    #[error("request rejected")]
    NotOk,
    #[error("request still in progress")]
    Pending,
    #[error("stored data failed an integrity check")]
    IntegrityFailed,
    #[error("no stored value found, restored from ROM default")]
    RestoredFromRom,
}

/// Fixed-capacity pool exhaustion, raised by reception/transmission slot
/// allocation and by the lifecycle component registry.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("pool exhausted: all slots are in use")]
pub struct PoolExhausted;
