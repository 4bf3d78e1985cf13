//! Logging setup.
//!
//! Every component logs through `tracing`. Drone movements, dispatch decisions
//! and faults are emitted under the `telemetry` target so they can be filtered
//! on their own, e.g. `RUST_LOG=telemetry=info`. Output goes to stderr, which
//! keeps stdout free for the run summary.

use std::io;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when `RUST_LOG` is unset: chatty in debug builds, quiet in release.
fn default_filter() -> &'static str {
    if cfg!(debug_assertions) { "debug" } else { "info" }
}

/// Install the global subscriber. Safe to call more than once.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter()));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_thread_names(true)
        .with_target(true);

    // A subscriber may already be installed (tests, embedding); keep it.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init();
}
