//! Concrete [`super::job::DiagJob`] implementations, one module per SID
//! family.

pub mod control_dtc_setting;
pub mod diagnostic_session_control;
pub mod ecu_reset;
pub mod io_control_by_identifier;
pub mod read_data_by_identifier;
pub mod routine_control;
pub mod tester_present;
pub mod write_data_by_identifier;
