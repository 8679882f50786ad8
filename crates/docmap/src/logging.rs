//! Process-wide logging setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::DocmapError;

/// Builds the level filter. `RUST_LOG` wins over the configured level.
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, DocmapError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| DocmapError::Logging(e.to_string()))
}

/// Installs the global tracing subscriber and bridges `log` records into it.
///
/// Fails if a global subscriber or logger is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), DocmapError> {
    let registry = tracing_subscriber::registry().with(build_filter(config)?);

    let installed = if config.json {
        tracing::subscriber::set_global_default(registry.with(fmt::layer().json()))
    } else {
        tracing::subscriber::set_global_default(registry.with(fmt::layer()))
    };
    installed.map_err(|e| DocmapError::Logging(e.to_string()))?;

    tracing_log::LogTracer::init().map_err(|e| DocmapError::Logging(e.to_string()))?;

    tracing::info!(level = %config.level, json = config.json, "Logging initialized");
    Ok(())
}
