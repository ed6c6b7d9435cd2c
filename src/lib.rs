//! Diagnostic transport, service dispatch, and lifecycle orchestration for
//! resource-constrained ECUs.
//!
//! Three layers, bottom to top:
//!
//! - [`can`]: raw CAN frames, the ISO 15765-2 segmentation codec, address
//!   filtering, and the transceiver abstraction (a real Linux socketcan
//!   backend and a host-side mock for tests).
//! - [`docan`]: the ISO 15765-2 transport layer built on top of `can` --
//!   per-connection reception/transmission state machines, flow control,
//!   ST_min pacing, multiplexed across buses.
//! - [`uds`]: the ISO 14229 service dispatcher and diagnostic session
//!   manager built on top of `docan`.
//! - [`lifecycle`]: the component orchestrator that drives the whole stack
//!   (and application components above it) through init/run/shutdown
//!   across runlevels.
//!
//! [`scheduler`], [`timer`] and [`pool`] are the shared primitives all four
//! layers are built from: cooperative execution contexts, a wraparound-safe
//! timeout list, and fixed-capacity object pools.

pub mod can;
pub mod docan;
pub mod error;
pub mod lifecycle;
pub mod pool;
pub mod scheduler;
pub mod timer;
pub mod uds;

pub use error::{DiagReturnCode, PersistenceError, PoolExhausted, ProcessingResult, TransportError};

use colored::Color;
use fern::colors::ColoredLevelConfig;

/// Install the crate's standard log formatting: colored level, local
/// timestamp, target module. Demos and integration tests call this once at
/// start-up; library code never calls it itself.
pub fn init_logging() {
    let colors_line = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::White)
        .debug(Color::Green)
        .trace(Color::Blue);

    let _ = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}{}[{}][{}] {}",
                format_args!(
                    "\x1B[{}m",
                    colors_line.get_color(&record.level()).to_fg_str()
                ),
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .chain(std::io::stdout())
        .apply();
}
