//! Ironscales phishing incident source.
//!
//! Ironscales exposes the ids of open incidents and a details call per id.
//! Incident ids only grow, so the id serves as the cursor; the open-id list
//! is filtered and paged locally.

use super::{parse_timestamp, VendorRecord};
use crate::http::HttpClient;
use crate::secure_string::SecureString;
use crate::traits::{
    Connector, ConnectorConfig, ConnectorError, ConnectorHealth, ConnectorResult,
};
use async_trait::async_trait;
use fw_core::{
    FetchError, FetchResult, Incident, IncidentSource, MappingError, Page, PageRequest,
};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

fn default_scopes() -> Vec<String> {
    vec!["partner.all".to_string()]
}

/// Ironscales configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IronscalesConfig {
    #[serde(flatten)]
    pub connector: ConnectorConfig,
    pub company_id: String,
    /// Partner API key exchanged for a JWT.
    pub api_key: SecureString,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Incident id the first run starts from.
    #[serde(default)]
    pub first_incident_id: u64,
}

/// Ironscales source.
pub struct IronscalesSource {
    config: IronscalesConfig,
    client: HttpClient,
    token: RwLock<Option<SecureString>>,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    key: &'a str,
    scopes: &'a [String],
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    jwt: String,
}

#[derive(Debug, Deserialize)]
struct OpenIncidentsResponse {
    #[serde(default)]
    incident_ids: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct IronscalesIncident {
    first_reported_date: Option<String>,
    sender_email: Option<String>,
    email_subject: Option<String>,
    classification: Option<String>,
}

impl IronscalesSource {
    pub fn new(config: IronscalesConfig) -> ConnectorResult<Self> {
        if config.company_id.trim().is_empty() {
            return Err(ConnectorError::ConfigError("company_id is required".into()));
        }
        if config.api_key.is_empty() {
            return Err(ConnectorError::ConfigError("api_key is required".into()));
        }
        let client = HttpClient::new(config.connector.clone())?;

        info!(
            source = %config.connector.name,
            company_id = %config.company_id,
            "Ironscales source initialized"
        );
        Ok(Self {
            config,
            client,
            token: RwLock::new(None),
        })
    }

    async fn token(&self) -> ConnectorResult<SecureString> {
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }

        let response: TokenResponse = self
            .client
            .post_json(
                "/appapi/get-token/",
                &TokenRequest {
                    key: self.config.api_key.expose_secret(),
                    scopes: &self.config.scopes,
                },
            )
            .await?;

        let token = SecureString::new(response.jwt);
        *self.token.write().await = Some(token.clone());
        debug!("Obtained Ironscales token");
        Ok(token)
    }

    /// Sends an authorized GET. A rejected token is dropped and the request
    /// retried once with a fresh one.
    async fn get_authorized<T: serde::de::DeserializeOwned>(&self, path: &str) -> ConnectorResult<T> {
        match self.send_with_token(path).await {
            Err(ConnectorError::AuthenticationFailed(reason)) => {
                debug!(%reason, "Ironscales token rejected, refreshing");
                *self.token.write().await = None;
                let result = self.send_with_token(path).await;
                if matches!(result, Err(ConnectorError::AuthenticationFailed(_))) {
                    *self.token.write().await = None;
                }
                result
            }
            result => result,
        }
    }

    async fn send_with_token<T: serde::de::DeserializeOwned>(&self, path: &str) -> ConnectorResult<T> {
        let token = self.token().await?;
        let request = self
            .client
            .request(Method::GET, path)
            .bearer_auth(token.expose_secret());
        self.client.send_json(request).await
    }

    /// Lists the ids of all open incidents.
    pub async fn open_incident_ids(&self) -> ConnectorResult<Vec<u64>> {
        let response: OpenIncidentsResponse = self
            .get_authorized(&format!("/appapi/incident/{}/open/", self.config.company_id))
            .await?;
        Ok(response.incident_ids)
    }

    async fn incident_details(&self, id: u64) -> ConnectorResult<Value> {
        self.get_authorized(&format!(
            "/appapi/incident/{}/details/{}",
            self.config.company_id, id
        ))
        .await
    }
}

/// Selects the page of ids to fetch: ids at or after `since`, or strictly
/// after `after` when continuing, ascending and without duplicates.
fn select_ids(mut ids: Vec<u64>, since: u64, after: Option<u64>, limit: usize) -> (Vec<u64>, bool) {
    ids.sort_unstable();
    ids.dedup();
    let mut remaining = ids
        .into_iter()
        .filter(|id| match after {
            Some(after) => *id > after,
            None => *id >= since,
        })
        .peekable();

    let page: Vec<u64> = remaining.by_ref().take(limit).collect();
    let more = remaining.peek().is_some();
    (page, more)
}

#[async_trait]
impl Connector for IronscalesSource {
    fn name(&self) -> &str {
        &self.config.connector.name
    }

    fn connector_type(&self) -> &str {
        "email_security"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        match self.open_incident_ids().await {
            Ok(_) => Ok(ConnectorHealth::Healthy),
            Err(e) => Ok(ConnectorHealth::from_error(&e)),
        }
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        self.token().await?;
        Ok(true)
    }
}

#[async_trait]
impl IncidentSource for IronscalesSource {
    type Item = VendorRecord<u64>;
    type Cursor = u64;

    fn name(&self) -> &str {
        &self.config.connector.name
    }

    fn initial_cursor(&self) -> u64 {
        self.config.first_incident_id
    }

    #[instrument(skip(self), fields(source = %self.config.connector.name))]
    async fn fetch_page(&self, request: PageRequest<u64>) -> FetchResult<Page<VendorRecord<u64>>> {
        let after = request
            .continuation
            .as_deref()
            .map(|token| {
                token.parse::<u64>().map_err(|_| {
                    FetchError::InvalidResponse(format!("invalid continuation id '{}'", token))
                })
            })
            .transpose()?;

        let open = self.open_incident_ids().await?;
        let (ids, more) = select_ids(open, request.since, after, request.limit);

        let mut records = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.incident_details(*id).await {
                Ok(raw) => records.push(VendorRecord::new(id.to_string(), *id, raw)),
                // Closed between the two calls.
                Err(ConnectorError::NotFound(_)) => {
                    warn!(id, "Open incident disappeared before details were fetched");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let continuation = if more {
            ids.last().map(|id| id.to_string())
        } else {
            None
        };

        debug!(selected = ids.len(), fetched = records.len(), more, "Fetched incidents");
        Ok(Page::new(records).with_continuation(continuation))
    }

    fn item_key(&self, item: &VendorRecord<u64>) -> String {
        item.key.clone()
    }

    fn item_order(&self, item: &VendorRecord<u64>) -> u64 {
        item.order
    }

    fn to_incident(&self, item: &VendorRecord<u64>) -> Result<Incident, MappingError> {
        let incident: IronscalesIncident = item.parse()?;
        let reported = incident
            .first_reported_date
            .as_deref()
            .ok_or(MappingError::MissingField("first_reported_date"))?;
        let occurred = parse_timestamp("first_reported_date", reported)?;

        let mut result = Incident::new(
            format!("Ironscales incident: IS-{}", item.order),
            occurred,
            self.config.connector.name.clone(),
            item.raw.clone(),
        );
        if let Some(sender) = incident.sender_email {
            result = result.with_label("Email/from", sender);
        }
        if let Some(subject) = incident.email_subject {
            result = result.with_label("Email/subject", subject);
        }
        if let Some(classification) = incident.classification {
            result = result.with_label("Ironscales/classification", classification);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_connector_config;
    use serde_json::json;

    fn config() -> IronscalesConfig {
        IronscalesConfig {
            connector: test_connector_config("ironscales", "https://appapi.ironscales.com"),
            company_id: "42".into(),
            api_key: "secret".into(),
            scopes: default_scopes(),
            first_incident_id: 0,
        }
    }

    #[test]
    fn test_select_ids_inclusive_since() {
        let (ids, more) = select_ids(vec![5, 1, 3, 3, 7], 3, None, 10);
        assert_eq!(ids, vec![3, 5, 7]);
        assert!(!more);
    }

    #[test]
    fn test_select_ids_after_token() {
        let (ids, more) = select_ids(vec![1, 2, 3, 4, 5], 0, Some(2), 2);
        assert_eq!(ids, vec![3, 4]);
        assert!(more);
    }

    #[test]
    fn test_requires_company_and_key() {
        let mut cfg = config();
        cfg.company_id = " ".into();
        assert!(matches!(
            IronscalesSource::new(cfg),
            Err(ConnectorError::ConfigError(_))
        ));

        let mut cfg = config();
        cfg.api_key = "".into();
        assert!(IronscalesSource::new(cfg).is_err());
    }

    #[test]
    fn test_incident_mapping() {
        let source = IronscalesSource::new(config()).unwrap();
        let record = VendorRecord::new(
            "1",
            1u64,
            json!({
                "incidentID": 1,
                "first_reported_date": "2021-07-06T06:34:00.070Z",
                "sender_email": "attacker@evil.com",
                "classification": "Phishing"
            }),
        );

        let incident = source.to_incident(&record).unwrap();
        assert_eq!(incident.name, "Ironscales incident: IS-1");
        assert_eq!(
            incident.occurred.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "2021-07-06T06:34:00.070Z"
        );
        assert!(incident
            .labels
            .iter()
            .any(|l| l.label_type == "Email/from" && l.value == "attacker@evil.com"));
    }

    #[test]
    fn test_incident_without_report_date_is_malformed() {
        let source = IronscalesSource::new(config()).unwrap();
        let record = VendorRecord::new("2", 2u64, json!({ "incidentID": 2 }));
        assert_eq!(
            source.to_incident(&record).unwrap_err(),
            MappingError::MissingField("first_reported_date")
        );
    }

    #[test]
    fn test_config_defaults_scopes() {
        let cfg: IronscalesConfig = serde_json::from_value(json!({
            "name": "ironscales",
            "base_url": "https://appapi.ironscales.com",
            "company_id": "42",
            "api_key": "k"
        }))
        .unwrap();
        assert_eq!(cfg.scopes, vec!["partner.all"]);
        assert_eq!(cfg.first_incident_id, 0);
    }
}
