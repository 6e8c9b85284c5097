//! # fw-observability
//!
//! Logging and metrics infrastructure for Feed Warden.
//!
//! Logs go through the `tracing` ecosystem as text or JSON; fetch cycle
//! outcomes are recorded with the `metrics` facade so any exporter the host
//! installs picks them up.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, init_logging_with_config, LogFormat, LoggingConfig, LoggingError};
pub use metrics::FetchMetrics;
