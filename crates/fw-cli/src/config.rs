//! Configuration loading for the Feed Warden CLI.

use anyhow::{Context, Result};
use fw_connectors::{
    DeepInstinctConfig, GraphMailConfig, IronscalesConfig, NcurionConfig, UnifiVideoConfig,
};
use fw_core::PollConfig;
use fw_observability::LogFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding one state file per source.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    /// Engine limits.
    #[serde(default)]
    pub fetch: FetchSettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Configured sources.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl AppConfig {
    /// Loads configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Finds a source by name.
    pub fn source(&self, name: &str) -> Result<&SourceConfig> {
        self.sources
            .iter()
            .find(|s| s.name() == name)
            .with_context(|| format!("No source named '{}' is configured", name))
    }

    /// Returns the state directory, falling back to the platform data dir.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("io", "feed-warden", "feed-warden")
                .map(|dirs| dirs.data_dir().join("state"))
                .unwrap_or_else(|| PathBuf::from(".feed-warden/state"))
        })
    }
}

/// Engine limits as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    #[serde(default = "default_page_size_limit")]
    pub page_size_limit: usize,

    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Deadline for one poll, in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

fn default_page_size_limit() -> usize {
    fw_core::engine::DEFAULT_PAGE_SIZE_LIMIT
}

fn default_max_pages() -> usize {
    fw_core::engine::DEFAULT_MAX_PAGES
}

fn default_fetch_timeout_secs() -> u64 {
    fw_core::engine::DEFAULT_FETCH_TIMEOUT.as_secs()
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            page_size_limit: default_page_size_limit(),
            max_pages: default_max_pages(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl FetchSettings {
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            page_size_limit: self.page_size_limit,
            max_pages: self.max_pages,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// One configured source, tagged by vendor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    DeepInstinct(DeepInstinctConfig),
    GraphMail(GraphMailConfig),
    Ncurion(NcurionConfig),
    Ironscales(IronscalesConfig),
    UnifiVideo(UnifiVideoConfig),
    /// In-memory records, for trying out the pipeline without a vendor.
    Mock(MockSourceConfig),
}

impl SourceConfig {
    pub fn name(&self) -> &str {
        match self {
            SourceConfig::DeepInstinct(c) => &c.connector.name,
            SourceConfig::GraphMail(c) => &c.connector.name,
            SourceConfig::Ncurion(c) => &c.connector.name,
            SourceConfig::Ironscales(c) => &c.connector.name,
            SourceConfig::UnifiVideo(c) => &c.connector.name,
            SourceConfig::Mock(c) => &c.name,
        }
    }

    pub fn source_type(&self) -> &'static str {
        match self {
            SourceConfig::DeepInstinct(_) => "deep_instinct",
            SourceConfig::GraphMail(_) => "graph_mail",
            SourceConfig::Ncurion(_) => "ncurion",
            SourceConfig::Ironscales(_) => "ironscales",
            SourceConfig::UnifiVideo(_) => "unifi_video",
            SourceConfig::Mock(_) => "mock",
        }
    }

    /// Vendor endpoint, if the source talks to one.
    pub fn base_url(&self) -> Option<&str> {
        match self {
            SourceConfig::DeepInstinct(c) => Some(&c.connector.base_url),
            SourceConfig::GraphMail(c) => Some(&c.connector.base_url),
            SourceConfig::Ncurion(c) => Some(&c.connector.base_url),
            SourceConfig::Ironscales(c) => Some(&c.connector.base_url),
            SourceConfig::UnifiVideo(c) => Some(&c.connector.base_url),
            SourceConfig::Mock(_) => None,
        }
    }

    /// Whether TLS verification is turned off for this source.
    pub fn skips_tls_verification(&self) -> bool {
        match self {
            SourceConfig::DeepInstinct(c) => !c.connector.verify_tls,
            SourceConfig::GraphMail(c) => !c.connector.verify_tls,
            SourceConfig::Ncurion(c) => !c.connector.verify_tls,
            SourceConfig::Ironscales(c) => !c.connector.verify_tls,
            SourceConfig::UnifiVideo(c) => !c.connector.verify_tls,
            SourceConfig::Mock(_) => false,
        }
    }
}

/// Records served by a `mock` source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockSourceConfig {
    pub name: String,
    #[serde(default)]
    pub initial_cursor: u64,
    #[serde(default)]
    pub records: Vec<MockRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockRecord {
    pub key: String,
    pub order: u64,
}

/// Default configuration file location.
pub fn default_config_path() -> PathBuf {
    if let Some(dirs) = directories::ProjectDirs::from("io", "feed-warden", "feed-warden") {
        dirs.config_dir().join("config.yaml")
    } else {
        PathBuf::from("config/feed-warden.yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
state_dir: /var/lib/feed-warden
fetch:
  page_size_limit: 25
logging:
  level: debug
  format: json
sources:
  - type: deep_instinct
    name: deep-instinct
    base_url: https://di.example.com
    auth:
      type: api_key
      header_name: Authorization
      key: di-key
    first_fetch_id: 100
  - type: graph_mail
    name: phishing-mailbox
    mailbox: soc@contoso.com
    folder: Inbox/Phishing
    first_fetch: 3 days
    auth:
      type: oauth2
      client_id: app
      client_secret: secret
      token_url: https://login.microsoftonline.com/tenant/oauth2/v2.0/token
      scopes: ["https://graph.microsoft.com/.default"]
  - type: ironscales
    name: ironscales
    base_url: https://appapi.ironscales.com
    company_id: "42"
    api_key: partner-key
  - type: mock
    name: demo
    records:
      - { key: a, order: 1 }
"#;

    #[test]
    fn test_parse_yaml() {
        let config: AppConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.sources.len(), 4);
        assert_eq!(config.fetch.page_size_limit, 25);
        assert_eq!(config.fetch.max_pages, fw_core::engine::DEFAULT_MAX_PAGES);
        assert_eq!(config.logging.format, LogFormat::Json);

        let graph = config.source("phishing-mailbox").unwrap();
        assert_eq!(graph.source_type(), "graph_mail");
        match graph {
            SourceConfig::GraphMail(c) => assert_eq!(c.folder, "Inbox/Phishing"),
            other => panic!("unexpected source {:?}", other),
        }

        match config.source("deep-instinct").unwrap() {
            SourceConfig::DeepInstinct(c) => assert_eq!(c.first_fetch_id, 100),
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_unknown_source_is_an_error() {
        let config: AppConfig = serde_yaml::from_str(SAMPLE).unwrap();
        let err = config.source("nope").unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_poll_config_from_settings() {
        let settings = FetchSettings {
            page_size_limit: 10,
            max_pages: 3,
            fetch_timeout_secs: 5,
        };
        let poll = settings.poll_config();
        assert_eq!(poll.page_size_limit, 10);
        assert_eq!(poll.fetch_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_explicit_state_dir() {
        let config: AppConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.state_dir(), PathBuf::from("/var/lib/feed-warden"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load(Path::new("/nonexistent/feed-warden.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
