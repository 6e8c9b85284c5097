//! Helpers for testing vendor sources.

use crate::traits::{AuthConfig, ConnectorConfig, ConnectorHealth, ConnectorResult};
use fw_core::{FetchCursorEngine, FetchState, Incident, IncidentSource, PollConfig};

/// Creates a connector config with no auth and no retries.
pub fn test_connector_config(name: &str, base_url: &str) -> ConnectorConfig {
    let mut config = ConnectorConfig::new(name, base_url);
    config.max_retries = 0;
    config.timeout_secs = 5;
    config
}

/// Creates a test connector config with a header API key.
pub fn test_connector_config_with_api_key(
    name: &str,
    base_url: &str,
    header_name: &str,
    key: &str,
) -> ConnectorConfig {
    test_connector_config(name, base_url).with_auth(AuthConfig::ApiKey {
        key: key.into(),
        header_name: header_name.to_string(),
    })
}

/// Runs one poll from `state` and returns the incidents with the next state.
pub async fn poll_once<S>(
    source: &S,
    state: FetchState<S::Cursor>,
    page_size_limit: usize,
) -> (Vec<Incident>, FetchState<S::Cursor>)
where
    S: IncidentSource,
{
    let engine = FetchCursorEngine::new(PollConfig {
        page_size_limit,
        ..Default::default()
    });
    match engine.poll(source, &state).await {
        Ok(result) => (result.incidents, result.next_state),
        Err(e) => panic!("poll failed: {}", e),
    }
}

/// Asserts that a connector health check returns healthy.
pub fn assert_healthy(result: &ConnectorResult<ConnectorHealth>) {
    match result {
        Ok(ConnectorHealth::Healthy) => {}
        other => panic!("Expected Healthy, got {:?}", other),
    }
}

/// Asserts that a connector health check returns unhealthy.
pub fn assert_unhealthy(result: &ConnectorResult<ConnectorHealth>) {
    match result {
        Ok(ConnectorHealth::Unhealthy(_)) => {}
        other => panic!("Expected Unhealthy, got {:?}", other),
    }
}
