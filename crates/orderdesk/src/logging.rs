//! Tracing subscriber setup.
//!
//! Library code logs through `tracing` (spans around each top-level
//! operation) and, in the persistence layer, through `log`. `init` installs a
//! single global subscriber and bridges `log` records into it.

use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use crate::config::LoggingConfig;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("A global tracing subscriber is already installed")]
    AlreadyInitialized,

    #[error("Failed to bridge log records into tracing: {0}")]
    LogBridge(#[from] log::SetLoggerError),
}

/// Builds the filter: `RUST_LOG` when set, otherwise the configured level.
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| LoggingError::InvalidFilter {
            filter: config.level.clone(),
            reason: e.to_string(),
        }),
    }
}

/// Installs the global subscriber. Calling it a second time returns
/// `LoggingError::AlreadyInitialized` instead of panicking.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        let layer = fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true);
        tracing::subscriber::set_global_default(registry.with(layer))
    } else {
        let layer = fmt::layer().with_target(false);
        tracing::subscriber::set_global_default(registry.with(layer))
    };
    installed.map_err(|_| LoggingError::AlreadyInitialized)?;

    tracing_log::LogTracer::init()?;
    Ok(())
}
