//! Logging utilities and structured logging support
//!
//! All subsystems log through the `log` facade. Fatal conditions are reported
//! with [`log_fatal`] so that every halt carries the subsystem name and the
//! underlying status.

pub use log::{debug, info, warn, error, trace};

/// Initialize the logging system
///
/// Honors `RUST_LOG`; defaults to `info` when unset.
pub fn init() {
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(env).init();
}

/// Emit the single structured line that precedes an engine halt.
pub fn log_fatal(subsystem: &str, status: &dyn std::fmt::Display) {
    log::error!("[{}] fatal: {}", subsystem, status);
}
