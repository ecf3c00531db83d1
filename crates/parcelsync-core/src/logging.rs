//! Console logging setup
//!
//! ```text
//! verbosity   filter
//! 0           warn
//! 1           info
//! 2           debug
//! 3+          trace
//! ```
//!
//! `RUST_LOG` takes precedence when set, e.g.
//! `RUST_LOG=parcelsync_core::remote=debug`.

use tracing_subscriber::EnvFilter;

/// Filter directive for a `-v` count.
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install a global `fmt` subscriber. Later calls are no-ops.
pub fn init(verbosity: u8) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_for(verbosity)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .try_init();
}
