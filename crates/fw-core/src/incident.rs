//! Normalized incident model emitted by the fetch engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A label attached to an incident (e.g. `Email/from`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentLabel {
    /// Label type.
    #[serde(rename = "type")]
    pub label_type: String,
    /// Label value.
    pub value: String,
}

impl IncidentLabel {
    /// Creates a new label.
    pub fn new(label_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label_type: label_type.into(),
            value: value.into(),
        }
    }
}

/// An incident derived 1:1 from a vendor record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Incident name shown in the platform.
    pub name: String,
    /// When the underlying event occurred.
    pub occurred: DateTime<Utc>,
    /// Free-text details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Labels for classification and mapping.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<IncidentLabel>,
    /// Name of the source that produced the incident.
    pub source: String,
    /// The raw vendor record.
    #[serde(rename = "rawJSON")]
    pub raw: serde_json::Value,
}

impl Incident {
    /// Creates an incident with no details or labels.
    pub fn new(
        name: impl Into<String>,
        occurred: DateTime<Utc>,
        source: impl Into<String>,
        raw: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            occurred,
            details: None,
            labels: Vec::new(),
            source: source.into(),
            raw,
        }
    }

    /// Sets the incident details.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Adds a label.
    pub fn with_label(mut self, label_type: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push(IncidentLabel::new(label_type, value));
        self
    }
}
