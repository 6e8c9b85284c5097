//! The incident source abstraction polled by the fetch engine.
//!
//! A source wraps one vendor listing API. It fetches pages of vendor records
//! at or after a cursor and knows how to identify, order and convert each
//! record. Everything else (authentication, retries, rate limits) stays
//! inside the implementation.

mod mock;

pub use mock::{MockBehavior, MockItem, MockSource, PageRequestRecord};

use crate::cursor::CursorValue;
use crate::incident::Incident;
use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by a page fetch. Every variant aborts the poll.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl FetchError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Transient(_) => "transient",
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::Authentication(_) => "authentication",
            FetchError::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// Result type for page fetches.
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors returned when a vendor record cannot be turned into an incident.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid timestamp in '{field}': {value}")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("Invalid record: {0}")]
    Invalid(String),
}

/// A request for one page of records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest<C> {
    /// Return records ordered at or after this value.
    pub since: C,
    /// Opaque token from the previous page, if the vendor paginates that way.
    pub continuation: Option<String>,
    /// Maximum number of records to return.
    pub limit: usize,
}

/// One page of records, in ascending order.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// Records on this page.
    pub items: Vec<T>,
    /// Token for the next page, if the vendor returned one.
    pub continuation: Option<String>,
}

impl<T> Page<T> {
    /// Creates a page without a continuation token.
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            continuation: None,
        }
    }

    /// Creates an empty page.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Sets the continuation token.
    pub fn with_continuation(mut self, continuation: Option<String>) -> Self {
        self.continuation = continuation;
        self
    }
}

/// A vendor listing API polled for new incidents.
#[async_trait]
pub trait IncidentSource: Send + Sync {
    /// Vendor record type.
    type Item: Send;
    /// Ordering field, persisted as the cursor.
    type Cursor: CursorValue;

    /// Returns the source name, used as the state key.
    fn name(&self) -> &str;

    /// Cursor used when no state has been persisted yet.
    fn initial_cursor(&self) -> Self::Cursor;

    /// Configuration the persisted cursor is tied to.
    ///
    /// When the stored scope differs from this value the stored state is
    /// discarded and the source starts over from `initial_cursor`.
    fn state_scope(&self) -> Option<String> {
        None
    }

    /// Fetches one page of records ordered at or after `request.since`.
    async fn fetch_page(
        &self,
        request: PageRequest<Self::Cursor>,
    ) -> FetchResult<Page<Self::Item>>;

    /// Returns the vendor identifier of a record.
    fn item_key(&self, item: &Self::Item) -> String;

    /// Returns the ordering value of a record.
    fn item_order(&self, item: &Self::Item) -> Self::Cursor;

    /// Converts a record into an incident.
    fn to_incident(&self, item: &Self::Item) -> Result<Incident, MappingError>;
}
