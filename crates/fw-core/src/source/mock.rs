//! Mock incident source for testing.
//!
//! Serves records from memory with configurable pagination and supports
//! failure injection, mirroring how vendor listing APIs behave.

use super::{FetchError, FetchResult, IncidentSource, MappingError, Page, PageRequest};
use crate::cursor::CursorValue;
use crate::incident::Incident;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Behavior configuration for failure injection.
#[derive(Debug, Clone, Default)]
pub enum MockBehavior {
    /// Normal operation.
    #[default]
    Normal,
    /// Fail every call after the first N.
    FailAfter { calls: u64, error: FetchError },
    /// Sleep before answering each call.
    Slow(std::time::Duration),
    /// Always fail.
    AlwaysFail(FetchError),
}

/// A record served by the mock source.
#[derive(Debug, Clone, PartialEq)]
pub struct MockItem<C> {
    /// Vendor identifier.
    pub key: String,
    /// Ordering value.
    pub order: C,
    /// When the event occurred.
    pub occurred: DateTime<Utc>,
    /// Records flagged malformed fail `to_incident`.
    pub malformed: bool,
}

impl<C> MockItem<C> {
    /// Creates a well-formed record.
    pub fn new(key: impl Into<String>, order: C) -> Self {
        Self {
            key: key.into(),
            order,
            occurred: DateTime::<Utc>::default(),
            malformed: false,
        }
    }

    /// Creates a record whose conversion fails.
    pub fn malformed(key: impl Into<String>, order: C) -> Self {
        Self {
            malformed: true,
            ..Self::new(key, order)
        }
    }

    /// Sets the occurrence time.
    pub fn occurred_at(mut self, occurred: DateTime<Utc>) -> Self {
        self.occurred = occurred;
        self
    }
}

/// Record of a page request for test verification.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequestRecord<C> {
    pub since: C,
    pub continuation: Option<String>,
    pub limit: usize,
}

/// Mock incident source.
pub struct MockSource<C> {
    name: String,
    initial: C,
    scope: Option<String>,
    use_continuation: bool,
    items: Arc<RwLock<Vec<MockItem<C>>>>,
    behavior: Arc<RwLock<MockBehavior>>,
    call_count: AtomicU64,
    request_history: Arc<RwLock<Vec<PageRequestRecord<C>>>>,
}

impl<C: CursorValue> MockSource<C> {
    /// Creates an empty source starting at `initial`.
    ///
    /// Pages are continued by re-querying from the last order value, the way
    /// "events after timestamp" APIs work.
    pub fn new(name: &str, initial: C) -> Self {
        Self {
            name: name.to_string(),
            initial,
            scope: None,
            use_continuation: false,
            items: Arc::new(RwLock::new(Vec::new())),
            behavior: Arc::new(RwLock::new(MockBehavior::Normal)),
            call_count: AtomicU64::new(0),
            request_history: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Returns opaque continuation tokens instead of relying on re-queries.
    pub fn with_continuation_tokens(mut self) -> Self {
        self.use_continuation = true;
        self
    }

    /// Sets the state scope reported by the source.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Adds a record.
    pub async fn add_item(&self, item: MockItem<C>) {
        self.add_items(vec![item]).await;
    }

    /// Adds records, keeping the store sorted by order.
    pub async fn add_items(&self, new_items: Vec<MockItem<C>>) {
        let mut items = self.items.write().await;
        items.extend(new_items);
        items.sort_by(|a, b| a.order.cmp(&b.order));
    }

    /// Sets the behavior for failure injection.
    pub async fn set_behavior(&self, behavior: MockBehavior) {
        let mut b = self.behavior.write().await;
        *b = behavior;
    }

    /// Gets the request history for test verification.
    pub async fn get_request_history(&self) -> Vec<PageRequestRecord<C>> {
        self.request_history.read().await.clone()
    }

    /// Number of page fetches made so far.
    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }

    async fn check_behavior(&self) -> FetchResult<()> {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        let behavior = self.behavior.read().await.clone();

        match behavior {
            MockBehavior::Normal => Ok(()),
            MockBehavior::FailAfter { calls, error } => {
                if count > calls {
                    Err(error)
                } else {
                    Ok(())
                }
            }
            MockBehavior::Slow(duration) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
            MockBehavior::AlwaysFail(error) => Err(error),
        }
    }
}

#[async_trait]
impl<C: CursorValue> IncidentSource for MockSource<C> {
    type Item = MockItem<C>;
    type Cursor = C;

    fn name(&self) -> &str {
        &self.name
    }

    fn initial_cursor(&self) -> C {
        self.initial.clone()
    }

    fn state_scope(&self) -> Option<String> {
        self.scope.clone()
    }

    async fn fetch_page(&self, request: PageRequest<C>) -> FetchResult<Page<MockItem<C>>> {
        self.request_history.write().await.push(PageRequestRecord {
            since: request.since.clone(),
            continuation: request.continuation.clone(),
            limit: request.limit,
        });

        self.check_behavior().await?;

        let items = self.items.read().await;
        let start = match &request.continuation {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| FetchError::InvalidResponse(format!("bad token '{}'", token)))?,
            None => items
                .iter()
                .position(|i| i.order >= request.since)
                .unwrap_or(items.len()),
        };

        let end = (start + request.limit).min(items.len());
        let page_items = items.get(start..end).map(|s| s.to_vec()).unwrap_or_default();

        let continuation = if self.use_continuation && end < items.len() {
            Some(end.to_string())
        } else {
            None
        };

        Ok(Page::new(page_items).with_continuation(continuation))
    }

    fn item_key(&self, item: &MockItem<C>) -> String {
        item.key.clone()
    }

    fn item_order(&self, item: &MockItem<C>) -> C {
        item.order.clone()
    }

    fn to_incident(&self, item: &MockItem<C>) -> Result<Incident, MappingError> {
        if item.malformed {
            return Err(MappingError::Invalid(format!("record {} is malformed", item.key)));
        }

        Ok(Incident::new(
            format!("Mock incident {}", item.key),
            item.occurred,
            self.name.clone(),
            serde_json::json!({ "key": item.key }),
        ))
    }
}
