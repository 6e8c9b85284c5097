//! Cursor values and the persisted fetch state.
//!
//! A cursor marks a position in a vendor event stream. It is read once at the
//! start of a fetch cycle and written back once at the end of a successful one.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// A totally ordered, persistable position in an event stream.
///
/// Implemented for every type that satisfies the bounds, so timestamps
/// (`DateTime<Utc>`), numeric event ids (`u64`) and plain strings all work.
pub trait CursorValue:
    Ord + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> CursorValue for T where
    T: Ord + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// The state carried between fetch cycles for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchState<C> {
    /// Order value of the last item processed.
    pub cursor: C,
    /// Keys already emitted whose order equals `cursor`.
    #[serde(default)]
    pub exclude_ids: BTreeSet<String>,
    /// Source configuration the cursor belongs to (e.g. a mail folder path).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl<C: CursorValue> FetchState<C> {
    /// Creates the state used on the very first run of a source.
    pub fn initial(cursor: C) -> Self {
        Self {
            cursor,
            exclude_ids: BTreeSet::new(),
            scope: None,
        }
    }

    /// Sets the scope this state belongs to.
    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    /// Returns true if `key` was already emitted at exactly `order`.
    pub fn is_excluded(&self, key: &str, order: &C) -> bool {
        *order == self.cursor && self.exclude_ids.contains(key)
    }
}

/// Errors produced when parsing a first-fetch lookback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FirstFetchError {
    #[error("Invalid first fetch '{0}': expected '<number> <unit>', e.g. '3 days'")]
    Format(String),

    #[error("Unknown time unit '{0}'")]
    UnknownUnit(String),
}

/// How far back the first run of a timestamp-ordered source reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirstFetch {
    lookback: Duration,
}

impl FirstFetch {
    /// Creates a lookback from a duration.
    pub fn new(lookback: Duration) -> Self {
        Self { lookback }
    }

    /// Parses expressions like `"3 days"`, `"15 minutes"` or `"1 hour"`.
    pub fn parse(value: &str) -> Result<Self, FirstFetchError> {
        let mut parts = value.split_whitespace();
        let (Some(amount), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(FirstFetchError::Format(value.to_string()));
        };

        let amount: i64 = amount
            .parse()
            .map_err(|_| FirstFetchError::Format(value.to_string()))?;
        if amount < 0 {
            return Err(FirstFetchError::Format(value.to_string()));
        }

        let lookback = match unit.to_lowercase().trim_end_matches('s') {
            "second" | "sec" => Duration::seconds(amount),
            "minute" | "min" => Duration::minutes(amount),
            "hour" => Duration::hours(amount),
            "day" => Duration::days(amount),
            "week" => Duration::weeks(amount),
            "month" => Duration::days(amount * 30),
            "year" => Duration::days(amount * 365),
            other => return Err(FirstFetchError::UnknownUnit(other.to_string())),
        };

        Ok(Self { lookback })
    }

    /// Returns the configured lookback.
    pub fn lookback(&self) -> Duration {
        self.lookback
    }

    /// Returns the timestamp the first run starts from.
    pub fn start_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.lookback
    }
}

impl Default for FirstFetch {
    fn default() -> Self {
        Self::new(Duration::days(3))
    }
}

impl std::str::FromStr for FirstFetch {
    type Err = FirstFetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
