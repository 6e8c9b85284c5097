//! Unifi Video NVR recording source.
//!
//! Each motion or scheduled recording becomes an incident named after its
//! event type, labelled with the camera that produced it.

use super::{first_fetch, from_epoch_millis, id_field, initial_timestamp, keep_positioned, VendorRecord};
use crate::http::{HttpClient, ResponseCache};
use crate::traits::{Connector, ConnectorConfig, ConnectorError, ConnectorHealth, ConnectorResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fw_core::{FetchResult, FirstFetch, Incident, IncidentSource, MappingError, Page, PageRequest};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

const CAMERA_CACHE_KEY: &str = "cameras";

/// Unifi Video configuration. The API key goes in `auth` as a `query_param`
/// named `apiKey`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiVideoConfig {
    #[serde(flatten)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub first_fetch: Option<String>,
}

/// A recording together with the name of its camera.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub record: VendorRecord<DateTime<Utc>>,
    pub camera_name: Option<String>,
}

/// Unifi Video source.
pub struct UnifiVideoSource {
    config: UnifiVideoConfig,
    client: HttpClient,
    first_fetch: FirstFetch,
    cameras: ResponseCache<Arc<HashMap<String, String>>>,
}

#[derive(Debug, Deserialize)]
struct DataResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Camera {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordingPayload {
    #[serde(rename = "_id")]
    id: String,
    event_type: Option<String>,
    start_time: i64,
    end_time: Option<i64>,
}

impl UnifiVideoSource {
    pub fn new(config: UnifiVideoConfig) -> ConnectorResult<Self> {
        let first_fetch = first_fetch(
            config.first_fetch.as_deref(),
            FirstFetch::new(ChronoDuration::days(1)),
        )?;
        let client = HttpClient::new(config.connector.clone())?;

        info!(source = %config.connector.name, "Unifi Video source initialized");
        Ok(Self {
            config,
            client,
            first_fetch,
            // Camera names rarely change; keep them for the life of the source.
            cameras: ResponseCache::new(Duration::from_secs(24 * 3600), 1),
        })
    }

    /// Returns camera names keyed by camera id.
    pub async fn camera_names(&self) -> ConnectorResult<Arc<HashMap<String, String>>> {
        self.cameras
            .get_or_try_insert_with(CAMERA_CACHE_KEY.to_string(), || async {
                let response: DataResponse<Camera> = self.client.get_json("/api/2.0/camera").await?;
                let names = response
                    .data
                    .into_iter()
                    .map(|camera| (camera.id, camera.name))
                    .collect::<HashMap<_, _>>();
                debug!(cameras = names.len(), "Loaded camera list");
                Ok::<_, ConnectorError>(Arc::new(names))
            })
            .await
    }

    fn position(raw: Value) -> Result<VendorRecord<DateTime<Utc>>, MappingError> {
        let start = raw
            .get("startTime")
            .and_then(Value::as_i64)
            .ok_or(MappingError::MissingField("startTime"))?;
        let order = from_epoch_millis("startTime", start)?;
        let key = id_field(&raw, "_id").ok_or(MappingError::MissingField("_id"))?;
        Ok(VendorRecord::new(key, order, raw))
    }

    fn camera_for(raw: &Value, names: &HashMap<String, String>) -> Option<String> {
        raw.get("cameras")?
            .as_array()?
            .iter()
            .filter_map(Value::as_str)
            .find_map(|id| names.get(id).cloned())
    }
}

#[async_trait]
impl Connector for UnifiVideoSource {
    fn name(&self) -> &str {
        &self.config.connector.name
    }

    fn connector_type(&self) -> &str {
        "nvr"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        match self.client.get("/api/2.0/camera").await {
            Ok(_) => Ok(ConnectorHealth::Healthy),
            Err(e) => Ok(ConnectorHealth::from_error(&e)),
        }
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        self.camera_names().await?;
        Ok(true)
    }
}

#[async_trait]
impl IncidentSource for UnifiVideoSource {
    type Item = Recording;
    type Cursor = DateTime<Utc>;

    fn name(&self) -> &str {
        &self.config.connector.name
    }

    fn initial_cursor(&self) -> DateTime<Utc> {
        initial_timestamp(&self.first_fetch)
    }

    #[instrument(skip(self), fields(source = %self.config.connector.name))]
    async fn fetch_page(&self, request: PageRequest<DateTime<Utc>>) -> FetchResult<Page<Recording>> {
        let cameras = self.camera_names().await?;
        let response: DataResponse<Value> = self
            .client
            .get_json_with_query(
                "/api/2.0/recording",
                &[
                    ("startTime", request.since.timestamp_millis().to_string()),
                    ("sortBy", "startTime".to_string()),
                    ("sort", "asc".to_string()),
                    ("limit", request.limit.to_string()),
                ],
            )
            .await?;

        let mut records = keep_positioned(
            &self.config.connector.name,
            response.data.into_iter().map(Self::position),
        );
        records.sort_by(|a, b| a.order.cmp(&b.order));

        let recordings: Vec<Recording> = records
            .into_iter()
            .map(|record| Recording {
                camera_name: Self::camera_for(&record.raw, &cameras),
                record,
            })
            .collect();

        debug!(fetched = recordings.len(), "Fetched recordings");
        Ok(Page::new(recordings))
    }

    fn item_key(&self, item: &Recording) -> String {
        item.record.key.clone()
    }

    fn item_order(&self, item: &Recording) -> DateTime<Utc> {
        item.record.order
    }

    fn to_incident(&self, item: &Recording) -> Result<Incident, MappingError> {
        let recording: RecordingPayload = item.record.parse()?;
        let event = recording
            .event_type
            .ok_or(MappingError::MissingField("eventType"))?;
        let start = from_epoch_millis("startTime", recording.start_time)?;
        let stop = recording
            .end_time
            .map(|end| from_epoch_millis("endTime", end))
            .transpose()?;

        let raw = json!({
            "event": event,
            "ubnt_id": recording.id,
            "camera_name": item.camera_name,
            "start_time": start.to_rfc3339(),
            "stop_time": stop.map(|s| s.to_rfc3339()),
        });

        let mut incident = Incident::new(event.clone(), start, self.config.connector.name.clone(), raw)
            .with_label("UnifiVideo/event", event)
            .with_label("UnifiVideo/recording_id", recording.id);
        if let Some(camera) = &item.camera_name {
            incident = incident.with_label("UnifiVideo/camera", camera.clone());
        }
        Ok(incident)
    }
}
