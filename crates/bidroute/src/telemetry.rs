//! Logging setup.
//!
//! Library code logs through both `log` (storage layer) and `tracing`
//! (watcher, router, scheduler). `init_logging` installs a single
//! `tracing-subscriber` registry and bridges `log` records into it.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::BidrouteError;

/// Builds the level filter: `RUST_LOG` wins, then the configured level.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, BidrouteError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| BidrouteError::Telemetry(format!("invalid level '{}': {}", config.level, e))),
    }
}

/// Installs the global subscriber. Call once, from the binary.
pub fn init_logging(config: &LoggingConfig) -> Result<(), BidrouteError> {
    let filter = build_filter(config)?;

    tracing_log::LogTracer::init().map_err(|e| BidrouteError::Telemetry(e.to_string()))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_current_span(true).with_target(true)),
        )
    } else {
        tracing::subscriber::set_global_default(registry.with(fmt::layer().with_target(true)))
    };

    installed.map_err(|e| BidrouteError::Telemetry(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_build_filter_uses_configured_level() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            level: "bidroute=debug,warn".to_string(),
            json: false,
        };
        let filter = build_filter(&config).unwrap();
        assert!(filter.to_string().contains("bidroute=debug"));
    }

    #[test]
    #[serial]
    fn test_build_filter_rejects_garbage() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            level: "bidroute=[[[".to_string(),
            json: false,
        };
        assert!(build_filter(&config).is_err());
    }
}
