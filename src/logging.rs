//! Tracing subscriber setup shared by the demo binaries.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global fmt subscriber. `RUST_LOG` overrides the level picked
/// from `verbose`. Calling it twice is harmless; the second install is ignored.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .try_init();
}
