//! In-memory state store for tests and dry runs.

use super::{StateError, StateResult, StateStore};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

/// A state store backed by a `HashMap`.
///
/// Writes can be made to fail, which lets tests exercise the
/// "incidents delivered but state not saved" path.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    data: RwLock<HashMap<String, Value>>,
    fail_writes: AtomicBool,
    writes: AtomicU64,
}

impl MemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `set` calls fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns a copy of every stored document.
    pub async fn snapshot(&self) -> HashMap<String, Value> {
        self.data.read().await.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, source: &str) -> StateResult<Option<Value>> {
        Ok(self.data.read().await.get(source).cloned())
    }

    async fn set(&self, source: &str, state: &Value) -> StateResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StateError::Unavailable("writes disabled".to_string()));
        }
        self.data
            .write()
            .await
            .insert(source.to_string(), state.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self, source: &str) -> StateResult<bool> {
        Ok(self.data.write().await.remove(source).is_some())
    }
}
