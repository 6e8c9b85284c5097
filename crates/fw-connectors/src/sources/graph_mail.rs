//! Microsoft Graph mailbox listener.
//!
//! Polls one mail folder for messages received at or after the cursor,
//! oldest first. The folder path (e.g. `Inbox/Phishing`) is resolved to a
//! folder id once per source and used as the state scope, so changing the
//! configured folder restarts the cursor.

use super::{first_fetch, id_field, initial_timestamp, keep_positioned, parse_timestamp, VendorRecord};
use crate::http::{HttpClient, RateLimitConfig, ResponseCache};
use crate::traits::{
    Connector, ConnectorConfig, ConnectorError, ConnectorHealth, ConnectorResult,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use fw_core::{
    FetchResult, FirstFetch, Incident, IncidentSource, MappingError, Page, PageRequest,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument};

const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Folders addressable by name without a lookup.
const WELL_KNOWN_FOLDERS: &[(&str, &str)] = &[
    ("archive", "archive"),
    ("conversation history", "conversationhistory"),
    ("deleted items", "deleteditems"),
    ("drafts", "drafts"),
    ("inbox", "inbox"),
    ("junk email", "junkemail"),
    ("outbox", "outbox"),
    ("sent items", "sentitems"),
];

fn default_folder() -> String {
    "Inbox".to_string()
}

/// Microsoft Graph mail configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphMailConfig {
    #[serde(flatten)]
    pub connector: ConnectorConfig,
    /// Mailbox (user principal name) to poll.
    pub mailbox: String,
    /// Folder path, `/` or `\` separated.
    #[serde(default = "default_folder")]
    pub folder: String,
    /// Lookback for the first run, e.g. `"3 days"`.
    #[serde(default)]
    pub first_fetch: Option<String>,
}

/// Microsoft Graph mail source.
pub struct GraphMailSource {
    config: GraphMailConfig,
    client: HttpClient,
    first_fetch: FirstFetch,
    folder_ids: ResponseCache<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    value: Vec<Value>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FoldersResponse {
    #[serde(default)]
    value: Vec<MailFolder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MailFolder {
    id: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GraphMessage {
    id: String,
    subject: Option<String>,
    body_preview: Option<String>,
    body: Option<GraphBody>,
    from: Option<Recipient>,
    sender: Option<Recipient>,
    to_recipients: Vec<Recipient>,
    cc_recipients: Vec<Recipient>,
    internet_message_id: Option<String>,
    internet_message_headers: Vec<GraphHeader>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GraphBody {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Recipient {
    email_address: Option<EmailAddress>,
}

impl Recipient {
    fn address(&self) -> Option<&str> {
        self.email_address.as_ref().map(|e| e.address.as_str())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EmailAddress {
    address: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GraphHeader {
    name: String,
    value: String,
}

impl GraphMailSource {
    pub fn new(config: GraphMailConfig) -> ConnectorResult<Self> {
        if config.mailbox.trim().is_empty() {
            return Err(ConnectorError::ConfigError("mailbox is required".into()));
        }
        let first_fetch = first_fetch(config.first_fetch.as_deref(), FirstFetch::default())?;

        // Graph throttles per mailbox; stay well under the documented limits.
        let rate_limit = RateLimitConfig {
            max_requests: 120,
            period: Duration::from_secs(60),
            burst_size: 20,
        };

        let mut connector_config = config.connector.clone();
        if connector_config.base_url.is_empty() {
            connector_config.base_url = GRAPH_BASE_URL.to_string();
        }
        let client = HttpClient::with_rate_limit(connector_config, Some(rate_limit))?;

        info!(
            source = %config.connector.name,
            mailbox = %config.mailbox,
            folder = %config.folder,
            "Graph mail source initialized"
        );

        Ok(Self {
            config,
            client,
            first_fetch,
            folder_ids: ResponseCache::new(Duration::from_secs(3600), 16),
        })
    }

    fn mailbox_path(&self) -> String {
        format!("/users/{}", self.config.mailbox)
    }

    /// Returns the folder id for the configured path, looking it up once.
    pub async fn folder_id(&self) -> ConnectorResult<String> {
        self.folder_ids
            .get_or_try_insert_with(self.config.folder.clone(), || self.lookup_folder_id())
            .await
    }

    async fn lookup_folder_id(&self) -> ConnectorResult<String> {
        let names: Vec<&str> = self
            .config
            .folder
            .split(['/', '\\'])
            .filter(|s| !s.is_empty())
            .collect();

        let Some((first, rest)) = names.split_first() else {
            return Err(ConnectorError::ConfigError("folder path is empty".into()));
        };

        let (mut parent, remaining) = match well_known_folder(first) {
            Some(id) => (id.to_string(), rest),
            None => ("msgfolderroot".to_string(), names.as_slice()),
        };

        for name in remaining {
            let children: FoldersResponse = self
                .client
                .get_json_with_query(
                    &format!(
                        "{}/mailFolders/{}/childFolders",
                        self.mailbox_path(),
                        urlencoding::encode(&parent)
                    ),
                    &[("$top", "250".to_string())],
                )
                .await?;

            let found = children
                .value
                .into_iter()
                .find(|f| f.display_name.eq_ignore_ascii_case(name) || f.id == *name)
                .ok_or_else(|| {
                    ConnectorError::NotFound(format!("No such folder: {}", self.config.folder))
                })?;
            parent = found.id;
        }

        debug!(folder = %self.config.folder, id = %parent, "Resolved mail folder");
        Ok(parent)
    }

    fn position(raw: Value) -> Result<VendorRecord<DateTime<Utc>>, MappingError> {
        let received = raw
            .get("receivedDateTime")
            .and_then(Value::as_str)
            .ok_or(MappingError::MissingField("receivedDateTime"))?;
        let order = parse_timestamp("receivedDateTime", received)?;
        let key = id_field(&raw, "id").ok_or(MappingError::MissingField("id"))?;
        Ok(VendorRecord::new(key, order, raw))
    }
}

fn well_known_folder(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    WELL_KNOWN_FOLDERS
        .iter()
        .find(|(display, _)| *display == lower)
        .map(|(_, id)| *id)
}

#[async_trait]
impl Connector for GraphMailSource {
    fn name(&self) -> &str {
        &self.config.connector.name
    }

    fn connector_type(&self) -> &str {
        "email"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        match self.client.get(&self.mailbox_path()).await {
            Ok(_) => Ok(ConnectorHealth::Healthy),
            Err(e) => Ok(ConnectorHealth::from_error(&e)),
        }
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        self.folder_id().await?;
        Ok(true)
    }
}

#[async_trait]
impl IncidentSource for GraphMailSource {
    type Item = VendorRecord<DateTime<Utc>>;
    type Cursor = DateTime<Utc>;

    fn name(&self) -> &str {
        &self.config.connector.name
    }

    fn initial_cursor(&self) -> DateTime<Utc> {
        initial_timestamp(&self.first_fetch)
    }

    fn state_scope(&self) -> Option<String> {
        Some(self.config.folder.clone())
    }

    #[instrument(skip(self), fields(source = %self.config.connector.name))]
    async fn fetch_page(
        &self,
        request: PageRequest<DateTime<Utc>>,
    ) -> FetchResult<Page<VendorRecord<DateTime<Utc>>>> {
        let response: MessagesResponse = match &request.continuation {
            Some(next_link) => self.client.get_json(next_link).await?,
            None => {
                let folder_id = self.folder_id().await?;
                let since = request.since.to_rfc3339_opts(SecondsFormat::Secs, true);
                self.client
                    .get_json_with_query(
                        &format!(
                            "{}/mailFolders/{}/messages",
                            self.mailbox_path(),
                            urlencoding::encode(&folder_id)
                        ),
                        &[
                            ("$filter", format!("receivedDateTime ge {}", since)),
                            ("$orderby", "receivedDateTime asc".to_string()),
                            ("$top", request.limit.to_string()),
                        ],
                    )
                    .await?
            }
        };

        let fetched = response.value.len();
        let records = keep_positioned(
            &self.config.connector.name,
            response.value.into_iter().map(Self::position),
        );

        debug!(fetched, kept = records.len(), has_next = response.next_link.is_some(), "Fetched messages");
        Ok(Page::new(records).with_continuation(response.next_link))
    }

    fn item_key(&self, item: &Self::Item) -> String {
        item.key.clone()
    }

    fn item_order(&self, item: &Self::Item) -> DateTime<Utc> {
        item.order
    }

    fn to_incident(&self, item: &Self::Item) -> Result<Incident, MappingError> {
        let message: GraphMessage = item.parse()?;

        let subject = message.subject.clone().unwrap_or_default();
        let details = message
            .body_preview
            .clone()
            .filter(|p| !p.is_empty())
            .or_else(|| message.body.as_ref().and_then(|b| b.content.clone()))
            .unwrap_or_default();

        let mut incident = Incident::new(
            subject.clone(),
            item.order,
            self.config.connector.name.clone(),
            item.raw.clone(),
        )
        .with_details(details)
        .with_label("Email/ID", message.id.clone())
        .with_label("Email/Subject", subject)
        .with_label("Email/Mailbox", self.config.mailbox.clone());

        if let Some(from) = message.from.as_ref().and_then(Recipient::address) {
            incident = incident.with_label("Email/From", from);
        }
        if let Some(sender) = message.sender.as_ref().and_then(Recipient::address) {
            incident = incident.with_label("Email/Sender", sender);
        }
        for to in message.to_recipients.iter().filter_map(Recipient::address) {
            incident = incident.with_label("Email/To", to);
        }
        for cc in message.cc_recipients.iter().filter_map(Recipient::address) {
            incident = incident.with_label("Email/Cc", cc);
        }
        if let Some(message_id) = &message.internet_message_id {
            incident = incident.with_label("Email/MessageID", message_id.clone());
        }
        for header in &message.internet_message_headers {
            incident = incident.with_label(format!("Email/Header/{}", header.name), header.value.clone());
        }

        Ok(incident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_connector_config;
    use serde_json::json;

    fn config() -> GraphMailConfig {
        GraphMailConfig {
            connector: test_connector_config("graph", ""),
            mailbox: "soc@contoso.com".into(),
            folder: "Inbox/Phishing".into(),
            first_fetch: Some("1 day".into()),
        }
    }

    #[test]
    fn test_defaults_to_graph_endpoint() {
        let source = GraphMailSource::new(config()).unwrap();
        assert_eq!(source.client.base_url(), GRAPH_BASE_URL);
        assert_eq!(source.state_scope().as_deref(), Some("Inbox/Phishing"));
    }

    #[test]
    fn test_rejects_bad_first_fetch() {
        let mut cfg = config();
        cfg.first_fetch = Some("whenever".into());
        assert!(matches!(
            GraphMailSource::new(cfg),
            Err(ConnectorError::ConfigError(_))
        ));
    }

    #[test]
    fn test_well_known_folder() {
        assert_eq!(well_known_folder("Inbox"), Some("inbox"));
        assert_eq!(well_known_folder("Junk Email"), Some("junkemail"));
        assert_eq!(well_known_folder("Phishing"), None);
    }

    #[test]
    fn test_message_maps_to_incident() {
        let source = GraphMailSource::new(config()).unwrap();
        let record = GraphMailSource::position(json!({
            "id": "AAMk1",
            "subject": "Invoice overdue",
            "bodyPreview": "Please pay",
            "receivedDateTime": "2024-01-01T00:05:00Z",
            "from": { "emailAddress": { "address": "attacker@evil.com", "name": "A" } },
            "toRecipients": [
                { "emailAddress": { "address": "alice@contoso.com" } },
                { "emailAddress": { "address": "bob@contoso.com" } }
            ],
            "internetMessageHeaders": [ { "name": "X-Spam", "value": "yes" } ]
        }))
        .unwrap();

        let incident = source.to_incident(&record).unwrap();
        assert_eq!(incident.name, "Invoice overdue");
        assert_eq!(incident.details.as_deref(), Some("Please pay"));
        assert_eq!(incident.occurred.to_rfc3339(), "2024-01-01T00:05:00+00:00");

        let has = |t: &str, v: &str| incident.labels.iter().any(|l| l.label_type == t && l.value == v);
        assert!(has("Email/From", "attacker@evil.com"));
        assert!(has("Email/To", "bob@contoso.com"));
        assert!(has("Email/Header/X-Spam", "yes"));
        assert!(has("Email/Mailbox", "soc@contoso.com"));
    }

    #[test]
    fn test_message_with_wrong_field_type_is_malformed() {
        let source = GraphMailSource::new(config()).unwrap();
        let record = GraphMailSource::position(json!({
            "id": "AAMk2",
            "subject": 42,
            "receivedDateTime": "2024-01-01T00:05:00Z"
        }))
        .unwrap();
        assert!(matches!(
            source.to_incident(&record),
            Err(MappingError::Invalid(_))
        ));
    }

    #[test]
    fn test_message_without_received_time_cannot_be_positioned() {
        assert_eq!(
            GraphMailSource::position(json!({ "id": "x" })).unwrap_err(),
            MappingError::MissingField("receivedDateTime")
        );
    }
}
