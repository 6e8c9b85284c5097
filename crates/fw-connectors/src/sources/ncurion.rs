//! Ncurion log server alert source.
//!
//! Every fetch logs in, searches the alert index of each connected log server
//! and logs out again, whatever the outcome of the search. Hits from all
//! servers are merged and ordered by `@timestamp`.

use super::{content_key, first_fetch, id_field, initial_timestamp, keep_positioned, parse_timestamp, VendorRecord};
use crate::http::HttpClient;
use crate::secure_string::SecureString;
use crate::traits::{
    Connector, ConnectorConfig, ConnectorError, ConnectorHealth, ConnectorResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fw_core::{FetchResult, FirstFetch, Incident, IncidentSource, MappingError, Page, PageRequest};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

const SEARCH_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Ncurion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NcurionConfig {
    #[serde(flatten)]
    pub connector: ConnectorConfig,
    pub username: String,
    pub password: SecureString,
    #[serde(default)]
    pub first_fetch: Option<String>,
}

/// Ncurion source.
pub struct NcurionSource {
    config: NcurionConfig,
    client: HttpClient,
    first_fetch: FirstFetch,
}

/// Tokens issued by a login.
#[derive(Deserialize)]
struct Session {
    access_token: SecureString,
    refresh_token: SecureString,
}

/// A log server registered with the manager.
#[derive(Debug, Clone, Deserialize)]
pub struct LogServer {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_connected: bool,
}

#[derive(Debug, Deserialize)]
struct NcurionHit {
    alert: Option<NcurionAlert>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NcurionAlert {
    category: String,
    signature: String,
    severity: Option<Value>,
}

impl NcurionSource {
    pub fn new(config: NcurionConfig) -> ConnectorResult<Self> {
        if config.username.is_empty() || config.password.is_empty() {
            return Err(ConnectorError::ConfigError(
                "username and password are required".into(),
            ));
        }
        let first_fetch = first_fetch(config.first_fetch.as_deref(), FirstFetch::default())?;
        let client = HttpClient::new(config.connector.clone())?;

        info!(source = %config.connector.name, "Ncurion source initialized");
        Ok(Self {
            config,
            client,
            first_fetch,
        })
    }

    async fn login(&self) -> ConnectorResult<Session> {
        self.client
            .post_json(
                "/napi/api/v1/apikey",
                &json!({
                    "username": self.config.username,
                    "password": self.config.password.expose_secret(),
                }),
            )
            .await
    }

    async fn logout(&self, session: &Session) {
        let request = self
            .client
            .request(Method::POST, "/napi/api/v1/apikey/remove")
            .bearer_auth(session.access_token.expose_secret())
            .json(&json!({
                "access_token": session.access_token.expose_secret(),
                "refresh_token": session.refresh_token.expose_secret(),
            }));

        if let Err(e) = self.client.send(request).await {
            warn!(source = %self.config.connector.name, error = %e, "Ncurion logout failed");
        }
    }

    async fn with_session<T, F, Fut>(&self, f: F) -> ConnectorResult<T>
    where
        F: FnOnce(Session) -> Fut,
        Fut: std::future::Future<Output = (Session, ConnectorResult<T>)>,
    {
        let session = self.login().await?;
        let (session, result) = f(session).await;
        self.logout(&session).await;
        result
    }

    async fn log_servers_with(&self, session: &Session) -> ConnectorResult<Vec<LogServer>> {
        let request = self
            .client
            .request(Method::GET, "/logapi/api/v2/logmgr/0")
            .bearer_auth(session.access_token.expose_secret());
        self.client.send_json(request).await
    }

    /// Lists the log servers known to the manager.
    pub async fn log_servers(&self) -> ConnectorResult<Vec<LogServer>> {
        self.with_session(|session| async move {
            let result = self.log_servers_with(&session).await;
            (session, result)
        })
        .await
    }

    async fn search(
        &self,
        session: &Session,
        since: DateTime<Utc>,
        limit: usize,
    ) -> ConnectorResult<Vec<Value>> {
        let servers = self.log_servers_with(session).await?;
        let start = since.format(SEARCH_TIME_FORMAT).to_string();
        let end = Utc::now().format(SEARCH_TIME_FORMAT).to_string();

        let mut hits = Vec::new();
        for server in servers.iter().filter(|s| s.is_connected) {
            let request = self
                .client
                .request(
                    Method::GET,
                    &format!("/logapi/api/v1/logserver/search/alert/search/{}", server.id),
                )
                .bearer_auth(session.access_token.expose_secret())
                .query(&[
                    ("start", start.clone()),
                    ("end", end.clone()),
                    ("size", limit.to_string()),
                ]);
            let server_hits: Vec<Value> = self.client.send_json(request).await?;
            debug!(server = server.id, hits = server_hits.len(), "Searched log server");
            hits.extend(server_hits);
        }
        Ok(hits)
    }

    fn position(raw: Value) -> Result<VendorRecord<DateTime<Utc>>, MappingError> {
        let timestamp = raw
            .get("@timestamp")
            .and_then(Value::as_str)
            .ok_or(MappingError::MissingField("@timestamp"))?;
        let order = parse_timestamp("@timestamp", timestamp)?;
        let key = id_field(&raw, "_id").unwrap_or_else(|| content_key(&raw));
        Ok(VendorRecord::new(key, order, raw))
    }
}

#[async_trait]
impl Connector for NcurionSource {
    fn name(&self) -> &str {
        &self.config.connector.name
    }

    fn connector_type(&self) -> &str {
        "siem"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        match self.log_servers().await {
            Ok(servers) if servers.iter().any(|s| s.is_connected) => Ok(ConnectorHealth::Healthy),
            Ok(_) => Ok(ConnectorHealth::Degraded(
                "no connected log servers".to_string(),
            )),
            Err(e) => Ok(ConnectorHealth::from_error(&e)),
        }
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        self.with_session(|session| async move { (session, Ok(true)) })
            .await
    }
}

#[async_trait]
impl IncidentSource for NcurionSource {
    type Item = VendorRecord<DateTime<Utc>>;
    type Cursor = DateTime<Utc>;

    fn name(&self) -> &str {
        &self.config.connector.name
    }

    fn initial_cursor(&self) -> DateTime<Utc> {
        initial_timestamp(&self.first_fetch)
    }

    #[instrument(skip(self), fields(source = %self.config.connector.name))]
    async fn fetch_page(
        &self,
        request: PageRequest<DateTime<Utc>>,
    ) -> FetchResult<Page<VendorRecord<DateTime<Utc>>>> {
        let since = request.since;
        let limit = request.limit;
        let hits = self
            .with_session(|session| async move {
                let result = self.search(&session, since, limit).await;
                (session, result)
            })
            .await?;

        let mut records = keep_positioned(
            &self.config.connector.name,
            hits.into_iter().map(Self::position),
        );
        records.sort_by(|a, b| a.order.cmp(&b.order));
        records.truncate(limit);

        debug!(kept = records.len(), "Fetched alerts");
        Ok(Page::new(records))
    }

    fn item_key(&self, item: &Self::Item) -> String {
        item.key.clone()
    }

    fn item_order(&self, item: &Self::Item) -> DateTime<Utc> {
        item.order
    }

    fn to_incident(&self, item: &Self::Item) -> Result<Incident, MappingError> {
        let hit: NcurionHit = item.parse()?;
        let alert = hit.alert.ok_or(MappingError::MissingField("alert"))?;

        let mut incident = Incident::new(
            format!("{}{}", alert.category, alert.signature),
            item.order,
            self.config.connector.name.clone(),
            item.raw.clone(),
        )
        .with_label("Ncurion/category", alert.category)
        .with_label("Ncurion/signature", alert.signature);

        match alert.severity {
            Some(Value::String(s)) => incident = incident.with_label("Ncurion/severity", s),
            Some(Value::Number(n)) => incident = incident.with_label("Ncurion/severity", n.to_string()),
            _ => {}
        }
        Ok(incident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_connector_config;

    fn config() -> NcurionConfig {
        NcurionConfig {
            connector: test_connector_config("ncurion", "https://ncurion.local"),
            username: "admin".into(),
            password: "pw".into(),
            first_fetch: None,
        }
    }

    #[test]
    fn test_requires_credentials() {
        let mut cfg = config();
        cfg.password = "".into();
        assert!(matches!(
            NcurionSource::new(cfg),
            Err(ConnectorError::ConfigError(_))
        ));
    }

    #[test]
    fn test_hit_without_id_uses_content_key() {
        let raw = json!({ "@timestamp": "2024-01-01T00:00:00Z", "alert": {} });
        let record = NcurionSource::position(raw.clone()).unwrap();
        assert_eq!(record.key, content_key(&raw));

        let with_id = NcurionSource::position(json!({
            "_id": "abc",
            "@timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(with_id.key, "abc");
    }

    #[test]
    fn test_hit_maps_to_incident() {
        let source = NcurionSource::new(config()).unwrap();
        let record = NcurionSource::position(json!({
            "_id": "abc",
            "@timestamp": "2024-01-01T00:00:00.500Z",
            "alert": { "category": "Malware", "signature": " ET TROJAN", "severity": 1 }
        }))
        .unwrap();

        let incident = source.to_incident(&record).unwrap();
        assert_eq!(incident.name, "Malware ET TROJAN");
        assert_eq!(incident.occurred, record.order);
        assert!(incident
            .labels
            .iter()
            .any(|l| l.label_type == "Ncurion/severity" && l.value == "1"));
    }

    #[test]
    fn test_hit_without_alert_is_malformed() {
        let source = NcurionSource::new(config()).unwrap();
        let record = NcurionSource::position(json!({ "@timestamp": "2024-01-01T00:00:00Z" })).unwrap();
        assert_eq!(
            source.to_incident(&record).unwrap_err(),
            MappingError::MissingField("alert")
        );
    }
}
