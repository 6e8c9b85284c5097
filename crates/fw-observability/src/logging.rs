//! Logging infrastructure for Feed Warden.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Crates whose events pass the default filter.
const LOG_TARGETS: &[&str] = &["fw_core", "fw_connectors", "fw_observability", "feed_warden"];

/// Errors raised while setting up logging.
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log level '{0}'")]
    InvalidLevel(String),

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Whether to log span open/close events.
    pub include_spans: bool,
    /// Whether to include file/line info.
    pub include_location: bool,
    /// Whether to include the target (module path).
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Text,
            include_spans: false,
            include_location: false,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    /// Verbose text output for interactive debugging.
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Text,
            include_spans: true,
            include_location: true,
            include_target: true,
        }
    }

    /// JSON output for scheduled runs whose logs are collected.
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            ..Self::default()
        }
    }

    /// Builds a configuration from a level name such as `"debug"`.
    pub fn from_level(level: &str, format: LogFormat) -> Result<Self, LoggingError> {
        let level =
            Level::from_str(level).map_err(|_| LoggingError::InvalidLevel(level.to_string()))?;
        Ok(Self {
            level,
            format,
            ..Self::default()
        })
    }

    fn filter_directives(&self) -> String {
        LOG_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, self.level))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Initializes logging with the default configuration.
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_config(LoggingConfig::default())
}

/// Initializes logging. `RUST_LOG` overrides the configured level.
///
/// Logs are written to stderr so that incidents on stdout stay parseable.
pub fn init_logging_with_config(config: LoggingConfig) -> Result<(), LoggingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let span_events = if config.include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let result = match config.format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_span_events(span_events)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()
        }
        LogFormat::Text => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_span_events(span_events)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()
        }
    };

    result.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

/// Creates a span for one fetch cycle of a source.
#[macro_export]
macro_rules! cycle_span {
    ($source:expr) => {
        tracing::info_span!("fetch_cycle", source = %$source)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, LogFormat::Text);
    }

    #[test]
    fn test_production_config() {
        let config = LoggingConfig::production();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_from_level() {
        let config = LoggingConfig::from_level("debug", LogFormat::Json).unwrap();
        assert_eq!(config.level, Level::DEBUG);
        assert!(matches!(
            LoggingConfig::from_level("chatty", LogFormat::Text),
            Err(LoggingError::InvalidLevel(_))
        ));
    }

    #[test]
    fn test_filter_covers_all_crates() {
        let directives = LoggingConfig::development().filter_directives();
        assert!(directives.contains("fw_core=DEBUG"));
        assert!(directives.contains("fw_connectors=DEBUG"));
        assert!(directives.contains("feed_warden=DEBUG"));
    }

    #[test]
    fn test_log_format_serde() {
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
    }

    #[test]
    fn test_second_init_is_an_error() {
        let _ = init_logging();
        assert!(matches!(
            init_logging(),
            Err(LoggingError::AlreadyInitialized(_))
        ));
    }
}
