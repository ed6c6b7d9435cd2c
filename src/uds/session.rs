//! Diagnostic session state machine: `{DEFAULT, EXTENDED, PROGRAMMING}`,
//! the S3_client keep-alive timeout, the switch policy of spec.md section
//! 4.6, and the one-byte EEPROM persistence layout of section 6.4.

use log::warn;

use crate::error::{DiagReturnCode, PersistenceError};
use crate::timer::Timer;
use crate::uds::job::DiagJob;

/// S3_client: how long the tester has to send another session-keeping
/// request before the manager falls back to `DEFAULT`.
const S3_CLIENT_DEFAULT_MS: u32 = 5_000;
/// Extended S3_client window used while in (or entering) `PROGRAMMING`, to
/// give a reflash tool more slack (`TESTER_PRESENT_EXTENDED_TIMEOUT`).
const S3_CLIENT_PROGRAMMING_MS: u32 = 10_000;
/// Reset-time budget handed to the lifecycle connector when a programming
/// session is entered.
const PROGRAMMING_RESET_BUDGET_MS: u32 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    Default,
    Extended,
    Programming,
}

impl Session {
    /// Wire value for the 0x10 subfunction byte and for persistence.
    pub fn to_persisted_byte(self) -> u8 {
        match self {
            Session::Default => 0x01,
            Session::Programming => 0x02,
            Session::Extended => 0x03,
        }
    }

    pub fn from_persisted_byte(byte: u8) -> Option<Session> {
        match byte {
            0x01 => Some(Session::Default),
            0x02 => Some(Session::Programming),
            0x03 => Some(Session::Extended),
            _ => None,
        }
    }

    pub fn from_subfunction(subfunction: u8) -> Option<Session> {
        match subfunction & 0x7F {
            0x01 => Some(Session::Default),
            0x02 => Some(Session::Programming),
            0x03 => Some(Session::Extended),
            _ => None,
        }
    }
}

/// The one-byte EEPROM record backing session persistence (spec 6.4).
pub trait SessionPersistence {
    fn read(&self) -> Result<u8, PersistenceError>;
    fn write(&mut self, byte: u8) -> Result<(), PersistenceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    Hard,
    KeyOffOn,
    Soft,
    EnableRapidPowerShutdown,
    DisableRapidPowerShutdown,
}

/// The manager's one external effect besides its own state: asking the
/// lifecycle layer to actually reset the ECU.
pub trait UdsLifecycleConnector {
    fn request_reset(&mut self, kind: ResetKind, reset_time_budget_ms: u32);
}

/// `IDiagSessionManager`-equivalent: owns the active session, the S3_client
/// timer, and the listener list notified on every session change.
pub struct SessionManager {
    session: Session,
    timer: Timer,
    timeout_id: Option<crate::timer::TimeoutId>,
    dispatcher_enabled: bool,
    listeners: Vec<Box<dyn FnMut(Session) + Send>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            session: Session::Default,
            timer: Timer::new(),
            timeout_id: None,
            dispatcher_enabled: true,
            listeners: Vec::new(),
        }
    }

    pub fn session(&self) -> Session {
        self.session
    }

    pub fn dispatcher_enabled(&self) -> bool {
        self.dispatcher_enabled
    }

    pub fn add_listener(&mut self, listener: Box<dyn FnMut(Session) + Send>) {
        self.listeners.push(listener);
    }

    /// Restore the persisted session at start-up (spec 4.6 `sessionRead`).
    /// Any failure -- including the explicit "restored from ROM" signal for
    /// a never-written block -- is logged and treated as a benign DEFAULT,
    /// not an integrity error (Open Question 1).
    pub fn restore_from_persistence(
        &mut self,
        persistence: &dyn SessionPersistence,
        connector: &mut dyn UdsLifecycleConnector,
    ) {
        match persistence.read() {
            Ok(byte) => match Session::from_persisted_byte(byte) {
                Some(session) => {
                    self.session = session;
                    if session == Session::Programming {
                        connector.request_reset(ResetKind::Hard, PROGRAMMING_RESET_BUDGET_MS);
                    }
                }
                None => {
                    warn!(
                        "uds: unrecognized persisted session byte {:#x}, falling back to default",
                        byte
                    );
                    self.session = Session::Default;
                }
            },
            Err(PersistenceError::RestoredFromRom) => {
                warn!("uds: no persisted session found, restored from ROM default");
                self.session = Session::Default;
            }
            Err(e) => {
                warn!(
                    "uds: session persistence read failed ({}), falling back to default session",
                    e
                );
                self.session = Session::Default;
            }
        }
    }

    /// Apply the switch policy table of spec 4.6. The only rejected
    /// transition is `DEFAULT -> PROGRAMMING`; every other pair (including
    /// a same-session refresh) is allowed.
    pub fn request_session_change(
        &mut self,
        target: Session,
        now_us: u32,
        persistence: &mut dyn SessionPersistence,
        connector: &mut dyn UdsLifecycleConnector,
    ) -> DiagReturnCode {
        if self.session == Session::Default && target == Session::Programming {
            return DiagReturnCode::IsoSubfunctionNotSupportedInActiveSession;
        }

        self.session = target;
        self.start_session_timeout(now_us);
        for listener in &mut self.listeners {
            listener(target);
        }

        if target == Session::Programming {
            self.dispatcher_enabled = false;
            if let Err(e) = persistence.write(target.to_persisted_byte()) {
                warn!("uds: failed to persist programming session: {}", e);
            }
            connector.request_reset(ResetKind::Hard, PROGRAMMING_RESET_BUDGET_MS);
        }
        DiagReturnCode::Ok
    }

    /// `acceptedJob` hook: forces an immediate `ISO_RESPONSE_PENDING` for
    /// jobs declared long-running, before `process` is ever called.
    pub fn accepted_job(&mut self, job: &dyn DiagJob) -> DiagReturnCode {
        if job.is_long_running() {
            DiagReturnCode::IsoResponsePending
        } else {
            DiagReturnCode::Ok
        }
    }

    /// `responseSent` hook: restarts the S3_client timer unless the
    /// response itself was a pending placeholder (spec 4.6).
    pub fn response_sent(&mut self, rc: DiagReturnCode, now_us: u32) {
        if rc != DiagReturnCode::IsoResponsePending {
            self.start_session_timeout(now_us);
        }
    }

    fn start_session_timeout(&mut self, now_us: u32) {
        if let Some(id) = self.timeout_id.take() {
            self.timer.cancel(id);
        }
        let period_ms = if self.session == Session::Programming {
            S3_CLIENT_PROGRAMMING_MS
        } else {
            S3_CLIENT_DEFAULT_MS
        };
        let (id, _) = self.timer.set(period_ms * 1000, now_us);
        self.timeout_id = Some(id);
    }

    /// Drive the S3_client timeout. `EXTENDED` falls back to `DEFAULT`
    /// automatically on expiry; `DEFAULT` has nothing to fall back from;
    /// `PROGRAMMING` does not auto-fall-back -- a reflash in progress is
    /// ended by an explicit ECU reset, not a silent session drop.
    pub fn tick(&mut self, now_us: u32) -> bool {
        let mut expired = false;
        self.timer.process_next_timeout(now_us, |_| expired = true);
        if expired && self.session == Session::Extended {
            self.session = Session::Default;
            for listener in &mut self.listeners {
                listener(Session::Default);
            }
        }
        expired
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
