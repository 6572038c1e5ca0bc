//! Tracing subscriber setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::LogConfig;
use crate::errors::CoursegenError;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over [`LogConfig::level`]. Output goes to
/// stderr, as JSON lines when [`LogConfig::json`] is set.
///
/// # Errors
///
/// Returns [`CoursegenError::Config`] for an invalid level directive or if a
/// global subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> Result<(), CoursegenError> {
    let filter = build_filter(config)?;
    let registry = Registry::default().with(filter);

    let result = if config.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr).with_target(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .try_init()
    };

    result.map_err(|e| CoursegenError::Config(format!("failed to install tracing subscriber: {e}")))
}

fn build_filter(config: &LogConfig) -> Result<EnvFilter, CoursegenError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| CoursegenError::Config(format!("invalid log level '{}': {e}", config.level)))
}
