//! Configuration validation for Feed Warden.

use crate::config::{AppConfig, SourceConfig};
use colored::Colorize;
use fw_core::FirstFetch;
use fw_observability::LoggingConfig;
use std::collections::HashSet;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Problems that make the configuration unusable.
    pub errors: Vec<String>,
    /// Problems worth fixing that don't block a fetch.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Prints the validation result to the console.
    pub fn print(&self) {
        if !self.warnings.is_empty() {
            println!();
            println!("{}", "Configuration Warnings:".yellow().bold());
            for warning in &self.warnings {
                println!("  {} {}", "⚠".yellow(), warning);
            }
        }

        if !self.errors.is_empty() {
            println!();
            println!("{}", "Configuration Errors:".red().bold());
            for error in &self.errors {
                println!("  {} {}", "✗".red(), error);
            }
        }

        if self.errors.is_empty() && self.warnings.is_empty() {
            println!("  {} Configuration OK", "✓".green());
        }
    }
}

/// Validates application configuration.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &AppConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        Self::validate_fetch_settings(config, &mut result);
        Self::validate_logging(config, &mut result);
        Self::validate_sources(config, &mut result);

        result
    }

    fn validate_fetch_settings(config: &AppConfig, result: &mut ValidationResult) {
        let fetch = &config.fetch;
        if fetch.page_size_limit == 0 {
            result.add_error("fetch.page_size_limit must be at least 1");
        }
        if fetch.max_pages == 0 {
            result.add_error("fetch.max_pages must be at least 1");
        }
        if fetch.fetch_timeout_secs == 0 {
            result.add_error("fetch.fetch_timeout_secs must be at least 1");
        }
        if fetch.page_size_limit > 1000 {
            result.add_warning(format!(
                "fetch.page_size_limit is {}; most vendor APIs cap pages well below that",
                fetch.page_size_limit
            ));
        }
    }

    fn validate_logging(config: &AppConfig, result: &mut ValidationResult) {
        if let Err(e) = LoggingConfig::from_level(&config.logging.level, config.logging.format) {
            result.add_error(e.to_string());
        }
    }

    fn validate_sources(config: &AppConfig, result: &mut ValidationResult) {
        if config.sources.is_empty() {
            result.add_warning("No sources configured. Nothing will be fetched.");
            return;
        }

        let mut seen = HashSet::new();
        for source in &config.sources {
            let name = source.name();
            if name.trim().is_empty() {
                result.add_error(format!("A {} source has an empty name", source.source_type()));
                continue;
            }
            // The name keys the stored cursor; two sources must never share one.
            // State files may live on a case-insensitive filesystem.
            if !seen.insert(name.to_lowercase()) {
                result.add_error(format!(
                    "Source name '{}' is used more than once (names are compared ignoring case)",
                    name
                ));
            }

            Self::validate_endpoint(source, result);
            Self::validate_first_fetch(source, result);

            if source.skips_tls_verification() {
                result.add_warning(format!(
                    "Source '{}': TLS verification is disabled; release builds ignore this",
                    name
                ));
            }
        }
    }

    fn validate_endpoint(source: &SourceConfig, result: &mut ValidationResult) {
        let Some(base_url) = source.base_url() else {
            return;
        };

        if base_url.is_empty() {
            // Graph has a well-known endpoint.
            if !matches!(source, SourceConfig::GraphMail(_)) {
                result.add_error(format!("Source '{}': base_url is required", source.name()));
            }
            return;
        }

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            result.add_error(format!(
                "Source '{}': base_url must start with http:// or https://",
                source.name()
            ));
        } else if base_url.starts_with("http://") {
            result.add_warning(format!(
                "Source '{}': base_url uses plain HTTP; credentials are sent unencrypted",
                source.name()
            ));
        }
    }

    fn validate_first_fetch(source: &SourceConfig, result: &mut ValidationResult) {
        let first_fetch = match source {
            SourceConfig::GraphMail(c) => c.first_fetch.as_deref(),
            SourceConfig::Ncurion(c) => c.first_fetch.as_deref(),
            SourceConfig::UnifiVideo(c) => c.first_fetch.as_deref(),
            _ => None,
        };
        if let Some(value) = first_fetch {
            if let Err(e) = FirstFetch::parse(value) {
                result.add_error(format!("Source '{}': {}", source.name(), e));
            }
        }
    }
}
