//! ISO 14229 (UDS) dispatcher: the job contract, the session state machine,
//! and the concrete service jobs built on top of them.

pub mod dispatcher;
pub mod job;
pub mod services;
pub mod session;

pub use dispatcher::{DiagDispatcher, DispatchOutcome};
pub use job::{DiagJob, PositiveResponse, SessionMask};
pub use session::{ResetKind, Session, SessionManager, SessionPersistence, UdsLifecycleConnector};
