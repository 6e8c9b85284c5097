//! Builds runnable sources from configuration.

use crate::config::{MockSourceConfig, SourceConfig};
use anyhow::{Context, Result};
use fw_connectors::{
    Connector, ConnectorHealth, DeepInstinctSource, GraphMailSource, IronscalesSource,
    NcurionSource, UnifiVideoSource,
};
use fw_core::{CycleError, CycleReport, FetchCycle, MockItem, MockSource};

/// A configured source, ready to be polled.
pub enum ConfiguredSource {
    DeepInstinct(DeepInstinctSource),
    GraphMail(GraphMailSource),
    Ncurion(NcurionSource),
    Ironscales(IronscalesSource),
    UnifiVideo(UnifiVideoSource),
    Mock(MockSource<u64>),
}

/// Applies `$body` to whichever vendor source `$source` holds.
macro_rules! with_vendor {
    ($source:expr, $s:ident => $body:expr, mock $m:ident => $mock:expr) => {
        match $source {
            ConfiguredSource::DeepInstinct($s) => $body,
            ConfiguredSource::GraphMail($s) => $body,
            ConfiguredSource::Ncurion($s) => $body,
            ConfiguredSource::Ironscales($s) => $body,
            ConfiguredSource::UnifiVideo($s) => $body,
            ConfiguredSource::Mock($m) => $mock,
        }
    };
}

impl ConfiguredSource {
    /// Constructs the source described by `config`.
    pub async fn build(config: &SourceConfig) -> Result<Self> {
        let name = config.name().to_string();
        let source = match config {
            SourceConfig::DeepInstinct(c) => {
                ConfiguredSource::DeepInstinct(DeepInstinctSource::new(c.clone())?)
            }
            SourceConfig::GraphMail(c) => ConfiguredSource::GraphMail(GraphMailSource::new(c.clone())?),
            SourceConfig::Ncurion(c) => ConfiguredSource::Ncurion(NcurionSource::new(c.clone())?),
            SourceConfig::Ironscales(c) => {
                ConfiguredSource::Ironscales(IronscalesSource::new(c.clone())?)
            }
            SourceConfig::UnifiVideo(c) => {
                ConfiguredSource::UnifiVideo(UnifiVideoSource::new(c.clone())?)
            }
            SourceConfig::Mock(c) => ConfiguredSource::Mock(build_mock(c).await),
        };
        tracing::debug!(source = %name, kind = config.source_type(), "Source ready");
        Ok(source)
    }

    /// Runs one fetch cycle.
    pub async fn run_cycle(&self, cycle: &FetchCycle) -> Result<CycleReport, CycleError> {
        with_vendor!(self, s => cycle.run(s).await, mock m => cycle.run(m).await)
    }

    /// Checks connectivity and credentials.
    pub async fn test_connection(&self) -> Result<bool> {
        with_vendor!(
            self,
            s => s.test_connection().await.with_context(|| format!("Connection test for '{}' failed", Connector::name(s))),
            mock _m => Ok(true)
        )
    }

    /// Reports vendor health.
    pub async fn health(&self) -> Result<ConnectorHealth> {
        with_vendor!(
            self,
            s => Ok(s.health_check().await?),
            mock _m => Ok(ConnectorHealth::Healthy)
        )
    }
}

async fn build_mock(config: &MockSourceConfig) -> MockSource<u64> {
    let source = MockSource::new(&config.name, config.initial_cursor);
    source
        .add_items(
            config
                .records
                .iter()
                .map(|r| MockItem::new(r.key.clone(), r.order))
                .collect(),
        )
        .await;
    source
}
