//! Connector trait definitions for Feed Warden.
//!
//! Every vendor source is a `Connector` (health and connection checks) as well
//! as an `fw_core::IncidentSource`. Configuration and error types shared by all
//! vendors live here.

use crate::secure_string::SecureString;
use async_trait::async_trait;
use fw_core::FetchError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur in connectors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

impl From<ConnectorError> for FetchError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::AuthenticationFailed(msg) | ConnectorError::AuthorizationDenied(msg) => {
                FetchError::Authentication(msg)
            }
            ConnectorError::RateLimited(retry_after_secs) => {
                FetchError::RateLimited { retry_after_secs }
            }
            ConnectorError::InvalidResponse(msg)
            | ConnectorError::NotFound(msg)
            | ConnectorError::ConfigError(msg) => FetchError::InvalidResponse(msg),
            ConnectorError::ConnectionFailed(msg)
            | ConnectorError::RequestFailed(msg)
            | ConnectorError::Timeout(msg)
            | ConnectorError::Internal(msg) => FetchError::Transient(msg),
        }
    }
}

/// Health status of a connector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorHealth {
    /// Connector is healthy and operational.
    Healthy,
    /// Connector is degraded but still functional.
    Degraded(String),
    /// Connector is unhealthy and not operational.
    Unhealthy(String),
}

impl ConnectorHealth {
    /// Maps a failed probe onto a health status.
    pub fn from_error(err: &ConnectorError) -> Self {
        match err {
            ConnectorError::RateLimited(_) | ConnectorError::Timeout(_) => {
                ConnectorHealth::Degraded(err.to_string())
            }
            _ => ConnectorHealth::Unhealthy(err.to_string()),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_verify_tls() -> bool {
    true
}

/// Configuration shared by every vendor connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Source name, also the key its fetch state is stored under.
    pub name: String,
    /// Base URL for the API. Vendors with a well-known endpoint fill in a default.
    #[serde(default)]
    pub base_url: String,
    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum retries for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Whether to verify TLS certificates.
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
    /// Additional headers to include.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl ConnectorConfig {
    /// Creates a configuration with default transport settings.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            auth: AuthConfig::None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            verify_tls: default_verify_tls(),
            headers: HashMap::new(),
        }
    }

    /// Sets the authentication method.
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }
}

/// Authentication configuration.
///
/// All credential fields use `SecureString` so they are zeroized from memory
/// when dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// No authentication, or a vendor-specific login handled by the source.
    #[default]
    None,
    /// API key sent in a header.
    ApiKey {
        key: SecureString,
        /// The header name to use for the API key.
        header_name: String,
    },
    /// API key sent as a query parameter.
    QueryParam {
        /// The parameter name (e.g. `apiKey`).
        name: String,
        value: SecureString,
    },
    /// Bearer token authentication.
    BearerToken { token: SecureString },
    /// Basic authentication.
    Basic {
        username: String,
        password: SecureString,
    },
    /// OAuth2 client credentials.
    #[serde(rename = "oauth2")]
    OAuth2 {
        client_id: String,
        client_secret: SecureString,
        token_url: String,
        #[serde(default)]
        scopes: Vec<String>,
    },
}

/// Base trait for all connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns the connector name.
    fn name(&self) -> &str;

    /// Returns the connector type (e.g., "edr", "email", "ndr").
    fn connector_type(&self) -> &str;

    /// Checks the health of the connector.
    async fn health_check(&self) -> ConnectorResult<ConnectorHealth>;

    /// Tests the connection to the external system.
    async fn test_connection(&self) -> ConnectorResult<bool>;
}
