//! Development-time tracing.
//!
//! Diagnostics go to stderr and are controlled by `RUST_LOG`. Run records and exported reports
//! are product output and are written regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Compact format on stderr.
///
/// # Example
/// ```bash
/// RUST_LOG=decider=debug decider run --scenario "open a bakery"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
