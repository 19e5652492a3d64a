//! Observability infrastructure: tracing and metrics.
//!
//! Every entry point (the CLI, tests that want output) calls [`init`] once
//! before touching the rest of the crate.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod metrics;

/// Initialize the global tracing subscriber at `info` level.
///
/// `RUST_LOG` directives are honoured on top of the default level.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    init_with_level(tracing::Level::INFO)
}

/// Initialize the global tracing subscriber with an explicit default level.
///
/// Returns an error if a global subscriber has already been installed.
pub fn init_with_level(level: tracing::Level) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true))
        .try_init()?;

    metrics::register_core_metrics();

    tracing::debug!("Observability initialized (level: {})", level);
    Ok(())
}
