//! Deep Instinct event source.
//!
//! Events are numbered by a monotonically increasing id. The listing call
//! returns events strictly after `after_event_id` together with the id to
//! continue from.

use super::{id_field, keep_positioned, parse_timestamp, VendorRecord};
use crate::http::{HttpClient, RateLimitConfig};
use crate::traits::{Connector, ConnectorConfig, ConnectorHealth, ConnectorResult};
use async_trait::async_trait;
use fw_core::{
    FetchError, FetchResult, Incident, IncidentSource, MappingError, Page, PageRequest,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument};

const API_PREFIX: &str = "/api/v1";

/// Deep Instinct configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepInstinctConfig {
    #[serde(flatten)]
    pub connector: ConnectorConfig,
    /// Event id the first run starts from.
    #[serde(default)]
    pub first_fetch_id: u64,
}

/// Deep Instinct source.
pub struct DeepInstinctSource {
    config: DeepInstinctConfig,
    client: HttpClient,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<Value>,
    last_id: Option<u64>,
}

/// Typed view of a Deep Instinct event.
#[derive(Debug, Deserialize)]
struct DeepInstinctEvent {
    id: u64,
    insertion_timestamp: Option<String>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    threat_severity: Option<String>,
    file_hash: Option<String>,
    device_id: Option<u64>,
}

impl DeepInstinctSource {
    pub fn new(config: DeepInstinctConfig) -> ConnectorResult<Self> {
        let rate_limit = RateLimitConfig {
            max_requests: 60,
            period: Duration::from_secs(60),
            burst_size: 10,
        };
        let client = HttpClient::with_rate_limit(config.connector.clone(), Some(rate_limit))?;

        info!(
            source = %config.connector.name,
            first_fetch_id = config.first_fetch_id,
            "Deep Instinct source initialized"
        );
        Ok(Self { config, client })
    }

    fn position(raw: Value) -> Result<VendorRecord<u64>, MappingError> {
        let id = raw
            .get("id")
            .and_then(Value::as_u64)
            .ok_or(MappingError::MissingField("id"))?;
        let key = id_field(&raw, "id").unwrap_or_else(|| id.to_string());
        Ok(VendorRecord::new(key, id, raw))
    }
}

#[async_trait]
impl Connector for DeepInstinctSource {
    fn name(&self) -> &str {
        &self.config.connector.name
    }

    fn connector_type(&self) -> &str {
        "edr"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        match self.client.get(&format!("{}/health_check", API_PREFIX)).await {
            Ok(_) => Ok(ConnectorHealth::Healthy),
            Err(e) => Ok(ConnectorHealth::from_error(&e)),
        }
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        let response = self
            .client
            .get(&format!("{}/health_check", API_PREFIX))
            .await?;
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl IncidentSource for DeepInstinctSource {
    type Item = VendorRecord<u64>;
    type Cursor = u64;

    fn name(&self) -> &str {
        &self.config.connector.name
    }

    fn initial_cursor(&self) -> u64 {
        self.config.first_fetch_id
    }

    #[instrument(skip(self), fields(source = %self.config.connector.name))]
    async fn fetch_page(&self, request: PageRequest<u64>) -> FetchResult<Page<VendorRecord<u64>>> {
        // The vendor filter is exclusive; step back one id to include `since`.
        let after = match &request.continuation {
            Some(token) => token.parse::<u64>().map_err(|_| {
                FetchError::InvalidResponse(format!("invalid continuation id '{}'", token))
            })?,
            None => request.since.saturating_sub(1),
        };

        let response: EventsResponse = self
            .client
            .get_json_with_query(
                &format!("{}/events", API_PREFIX),
                &[("after_event_id", after.to_string())],
            )
            .await?;

        let fetched = response.events.len();
        let mut records = keep_positioned(
            &self.config.connector.name,
            response.events.into_iter().map(Self::position),
        );
        records.sort_by_key(|r| r.order);

        // Only hand out a token when the vendor moved forward, so a stuck
        // `last_id` cannot loop the engine.
        let continuation = response
            .last_id
            .filter(|last| *last > after && fetched > 0)
            .map(|last| last.to_string());

        debug!(after, fetched, kept = records.len(), "Fetched events");
        Ok(Page::new(records).with_continuation(continuation))
    }

    fn item_key(&self, item: &VendorRecord<u64>) -> String {
        item.key.clone()
    }

    fn item_order(&self, item: &VendorRecord<u64>) -> u64 {
        item.order
    }

    fn to_incident(&self, item: &VendorRecord<u64>) -> Result<Incident, MappingError> {
        let event: DeepInstinctEvent = item.parse()?;
        let inserted = event
            .insertion_timestamp
            .as_deref()
            .ok_or(MappingError::MissingField("insertion_timestamp"))?;
        let occurred = parse_timestamp("insertion_timestamp", inserted)?;

        let mut incident = Incident::new(
            format!("DeepInstinct_{}", event.id),
            occurred,
            self.config.connector.name.clone(),
            item.raw.clone(),
        );
        if let Some(event_type) = event.event_type {
            incident = incident.with_label("DeepInstinct/type", event_type);
        }
        if let Some(severity) = event.threat_severity {
            incident = incident.with_label("DeepInstinct/threat_severity", severity);
        }
        if let Some(hash) = event.file_hash {
            incident = incident.with_label("File/SHA256", hash);
        }
        if let Some(device_id) = event.device_id {
            incident = incident.with_label("DeepInstinct/device_id", device_id.to_string());
        }
        Ok(incident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_connector_config;
    use serde_json::json;

    fn source() -> DeepInstinctSource {
        DeepInstinctSource::new(DeepInstinctConfig {
            connector: test_connector_config("deep_instinct", "https://di.example.com"),
            first_fetch_id: 0,
        })
        .unwrap()
    }

    #[test]
    fn test_event_maps_to_incident() {
        let source = source();
        let record = DeepInstinctSource::position(json!({
            "id": 12,
            "insertion_timestamp": "2024-02-01T10:00:00.000Z",
            "type": "STATIC_ANALYSIS",
            "threat_severity": "HIGH",
            "file_hash": "ab12"
        }))
        .unwrap();

        assert_eq!(source.item_key(&record), "12");
        assert_eq!(source.item_order(&record), 12);

        let incident = source.to_incident(&record).unwrap();
        assert_eq!(incident.name, "DeepInstinct_12");
        assert_eq!(incident.occurred.to_rfc3339(), "2024-02-01T10:00:00+00:00");
        assert_eq!(incident.raw["file_hash"], "ab12");
        assert!(incident
            .labels
            .iter()
            .any(|l| l.label_type == "DeepInstinct/threat_severity" && l.value == "HIGH"));
    }

    #[test]
    fn test_event_without_timestamp_is_malformed() {
        let source = source();
        let record = DeepInstinctSource::position(json!({ "id": 3 })).unwrap();
        assert_eq!(
            source.to_incident(&record).unwrap_err(),
            MappingError::MissingField("insertion_timestamp")
        );
    }

    #[test]
    fn test_event_without_id_cannot_be_positioned() {
        assert!(DeepInstinctSource::position(json!({ "insertion_timestamp": "x" })).is_err());
    }
}
