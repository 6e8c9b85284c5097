//! Vendor incident sources.
//!
//! Each source pages through one vendor listing API and converts the records
//! into incidents. Records travel through the engine as [`VendorRecord`]s:
//! the raw vendor JSON plus the key and order extracted at fetch time. Typed
//! parsing happens in `to_incident`, so a record with a bad field is skipped
//! without stalling the cursor.

pub mod deep_instinct;
pub mod graph_mail;
pub mod ironscales;
pub mod ncurion;
pub mod unifi_video;

pub use deep_instinct::{DeepInstinctConfig, DeepInstinctSource};
pub use graph_mail::{GraphMailConfig, GraphMailSource};
pub use ironscales::{IronscalesConfig, IronscalesSource};
pub use ncurion::{NcurionConfig, NcurionSource};
pub use unifi_video::{UnifiVideoConfig, UnifiVideoSource};

use crate::traits::{ConnectorError, ConnectorResult};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use fw_core::{FirstFetch, MappingError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

/// A raw vendor record with its position in the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorRecord<C> {
    /// Vendor identifier, or a content hash when the vendor has none.
    pub key: String,
    pub order: C,
    pub raw: Value,
}

impl<C> VendorRecord<C> {
    pub fn new(key: impl Into<String>, order: C, raw: Value) -> Self {
        Self {
            key: key.into(),
            order,
            raw,
        }
    }

    /// Parses the raw record into a typed vendor payload.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, MappingError> {
        serde_json::from_value(self.raw.clone()).map_err(|e| MappingError::Invalid(e.to_string()))
    }
}

/// SHA-256 of the record's JSON encoding, used as a key for records without an id.
pub fn content_key(raw: &Value) -> String {
    let bytes = serde_json::to_vec(raw).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// Reads a string or numeric id field.
pub(crate) fn id_field(raw: &Value, field: &str) -> Option<String> {
    match raw.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses vendor timestamps: RFC 3339, or `YYYY-MM-DD HH:MM:SS[.f]` taken as UTC.
pub fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>, MappingError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(MappingError::InvalidTimestamp {
        field,
        value: value.to_string(),
    })
}

/// Converts epoch milliseconds to a timestamp.
pub fn from_epoch_millis(field: &'static str, millis: i64) -> Result<DateTime<Utc>, MappingError> {
    DateTime::from_timestamp_millis(millis).ok_or(MappingError::InvalidTimestamp {
        field,
        value: millis.to_string(),
    })
}

/// Drops records that cannot be positioned in the stream.
pub(crate) fn keep_positioned<C>(
    source: &str,
    records: impl IntoIterator<Item = Result<VendorRecord<C>, MappingError>>,
) -> Vec<VendorRecord<C>> {
    records
        .into_iter()
        .filter_map(|record| match record {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(source, error = %e, "Dropping record without a usable order field");
                None
            }
        })
        .collect()
}

/// Parses an optional first-fetch expression, defaulting to `default`.
pub(crate) fn first_fetch(value: Option<&str>, default: FirstFetch) -> ConnectorResult<FirstFetch> {
    match value {
        Some(v) => FirstFetch::parse(v).map_err(|e| ConnectorError::ConfigError(e.to_string())),
        None => Ok(default),
    }
}

/// Timestamp cursor for the first run, truncated to whole seconds.
pub(crate) fn initial_timestamp(first_fetch: &FirstFetch) -> DateTime<Utc> {
    let start = first_fetch.start_from(Utc::now());
    DateTime::from_timestamp(start.timestamp(), 0).unwrap_or(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2021, 7, 6, 6, 34, 0).unwrap();
        assert_eq!(
            parse_timestamp("t", "2021-07-06T06:34:00Z").unwrap(),
            expected
        );
        assert_eq!(
            parse_timestamp("t", "2021-07-06T08:34:00+02:00").unwrap(),
            expected
        );
        assert_eq!(
            parse_timestamp("t", "2021-07-06 06:34:00").unwrap(),
            expected
        );
        assert!(parse_timestamp("t", "yesterday").is_err());
    }

    #[test]
    fn test_content_key_is_stable() {
        let a = serde_json::json!({ "alert": { "signature": "x" } });
        let b = serde_json::json!({ "alert": { "signature": "x" } });
        assert_eq!(content_key(&a), content_key(&b));
        assert_eq!(content_key(&a).len(), 64);
        assert_ne!(content_key(&a), content_key(&serde_json::json!({})));
    }

    #[test]
    fn test_id_field() {
        let raw = serde_json::json!({ "id": 12, "_id": "abc", "empty": "" });
        assert_eq!(id_field(&raw, "id").as_deref(), Some("12"));
        assert_eq!(id_field(&raw, "_id").as_deref(), Some("abc"));
        assert_eq!(id_field(&raw, "empty"), None);
        assert_eq!(id_field(&raw, "missing"), None);
    }

    #[test]
    fn test_first_fetch_config() {
        let parsed = first_fetch(Some("2 hours"), FirstFetch::default()).unwrap();
        assert_eq!(parsed.lookback(), Duration::hours(2));
        assert!(first_fetch(Some("soon"), FirstFetch::default()).is_err());
        assert_eq!(first_fetch(None, FirstFetch::default()).unwrap(), FirstFetch::default());
    }

    #[test]
    fn test_vendor_record_parse_error_is_mapping_error() {
        #[derive(serde::Deserialize)]
        #[allow(dead_code)]
        struct Typed {
            id: u64,
        }
        let record = VendorRecord::new("k", 1u64, serde_json::json!({ "id": "nope" }));
        assert!(matches!(
            record.parse::<Typed>(),
            Err(MappingError::Invalid(_))
        ));
    }
}
