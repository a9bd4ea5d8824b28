//! Structured logging setup, grounded in the `tracing` + `tracing-subscriber`
//! pattern used by every long-running process in this workspace. Logging
//! sinks are out of scope (per spec), but logging itself is ambient and
//! always wired up regardless of which features a deployment turns off.

use crate::config::LoggingConfig;

/// Initialise the global tracing subscriber from the configured minimum
/// level. Falls back to `info` when no targets are configured or the
/// `RUST_LOG` env var is unset.
pub fn init(config: &LoggingConfig, worker_name: &str) {
    let level = config
        .targets
        .get(worker_name)
        .map(|t| t.level.clone())
        .or_else(|| config.targets.get("default").map(|t| t.level.clone()))
        .unwrap_or_else(|| "info".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
