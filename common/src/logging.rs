//! Tracing initialization, following the same single-entry-point pattern as
//! the teacher's `common::logging` module.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global `tracing` subscriber reading `RUST_LOG` (defaulting to
/// `info`). Safe to call more than once; subsequent calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
