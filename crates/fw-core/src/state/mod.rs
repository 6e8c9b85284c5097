//! Persistence of per-source fetch state between cycles.
//!
//! Stores hold opaque JSON documents keyed by source name. The typed helpers
//! [`load_state`] and [`save_state`] convert to and from [`FetchState`].

mod error;
mod file;
mod memory;

pub use error::{StateError, StateResult};
pub use file::FileStateStore;
pub use memory::MemoryStateStore;

use crate::cursor::{CursorValue, FetchState};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Key-value storage for fetch state, one entry per source.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns the stored document for `source`, if any.
    async fn get(&self, source: &str) -> StateResult<Option<Value>>;

    /// Replaces the stored document for `source`.
    async fn set(&self, source: &str, state: &Value) -> StateResult<()>;

    /// Removes the stored document for `source`.
    ///
    /// Returns `Ok(true)` if state existed.
    async fn clear(&self, source: &str) -> StateResult<bool>;
}

/// Loads and decodes the state for `source`.
///
/// Returns `Ok(None)` when nothing has been persisted yet.
pub async fn load_state<C: CursorValue>(
    store: &dyn StateStore,
    source: &str,
) -> StateResult<Option<FetchState<C>>> {
    match store.get(source).await? {
        Some(value) => {
            let state = serde_json::from_value(value)?;
            debug!(source, "Loaded fetch state");
            Ok(Some(state))
        }
        None => Ok(None),
    }
}

/// Encodes and persists the state for `source`.
pub async fn save_state<C: CursorValue>(
    store: &dyn StateStore,
    source: &str,
    state: &FetchState<C>,
) -> StateResult<()> {
    let value = serde_json::to_value(state)?;
    store.set(source, &value).await?;
    debug!(source, "Saved fetch state");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_typed_round_trip_through_store() {
        let store = MemoryStateStore::new();
        let mut state = FetchState::initial(42u64);
        state.exclude_ids.insert("42".into());

        save_state(&store, "deep_instinct", &state).await.unwrap();
        let loaded: Option<FetchState<u64>> = load_state(&store, "deep_instinct").await.unwrap();
        assert_eq!(loaded, Some(state));
    }

    #[tokio::test]
    async fn test_load_missing_state() {
        let store = MemoryStateStore::new();
        let loaded: Option<FetchState<u64>> = load_state(&store, "nothing").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_load_state_with_wrong_cursor_type() {
        let store = MemoryStateStore::new();
        store
            .set("graph", &serde_json::json!({ "cursor": "2024-01-01T00:00:00Z" }))
            .await
            .unwrap();

        let result: StateResult<Option<FetchState<u64>>> = load_state(&store, "graph").await;
        assert!(matches!(result, Err(StateError::Serialization(_))));
    }
}
