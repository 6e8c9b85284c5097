//! File-backed state store.
//!
//! Each source gets one pretty-printed JSON file in the state directory.
//! Writes go to a temporary sibling first and are renamed into place, so a
//! crash mid-write leaves the previous state intact.

use super::{StateError, StateResult, StateStore};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Stores fetch state as `<dir>/<source>.json`.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Creates a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the state directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file holding the state for `source`.
    pub fn path_for(&self, source: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(source)))
    }
}

/// Maps a source name onto a file stem.
///
/// Percent-encoding keeps the mapping one-to-one, so distinct source names
/// never share a state file, and path separators can't escape the directory.
fn sanitize(source: &str) -> String {
    if source.is_empty() {
        // A lone '%' is never produced by encoding a non-empty name.
        return "%".to_string();
    }
    urlencoding::encode(source).into_owned()
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, source: &str) -> StateResult<Option<Value>> {
        let path = self.path_for(source);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::Io(format!("{}: {}", path.display(), e))),
        }
    }

    #[instrument(skip(self, state), fields(dir = %self.dir.display()))]
    async fn set(&self, source: &str, state: &Value) -> StateResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(source);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(state)?;

        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(path = %path.display(), "Wrote state file");
        Ok(())
    }

    async fn clear(&self, source: &str) -> StateResult<bool> {
        match tokio::fs::remove_file(self.path_for(source)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("graph-mail"), "graph-mail");
        assert_eq!(sanitize("../etc/passwd"), "..%2Fetc%2Fpasswd");
        assert_eq!(sanitize("a b"), "a%20b");
        assert_eq!(sanitize(""), "%");
    }

    #[tokio::test]
    async fn test_similar_names_do_not_share_state() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());

        let names = ["soc mail", "soc.mail", "soc_mail", "soc/mail"];
        let paths: std::collections::HashSet<_> =
            names.iter().map(|n| store.path_for(n)).collect();
        assert_eq!(paths.len(), names.len());
        for path in &paths {
            assert_eq!(path.parent(), Some(dir.path()));
        }

        store.set("soc mail", &json!({ "cursor": 500 })).await.unwrap();
        assert_eq!(store.get("soc_mail").await.unwrap(), None);
        assert_eq!(
            store.get("soc mail").await.unwrap(),
            Some(json!({ "cursor": 500 }))
        );
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("state");

        let store = FileStateStore::new(&state_dir);
        store
            .set("ironscales", &json!({ "cursor": 7, "exclude_ids": ["7"] }))
            .await
            .unwrap();
        assert!(store.path_for("ironscales").exists());
        assert!(!state_dir.join("ironscales.json.tmp").exists());

        let reopened = FileStateStore::new(&state_dir);
        assert_eq!(
            reopened.get("ironscales").await.unwrap(),
            Some(json!({ "cursor": 7, "exclude_ids": ["7"] }))
        );
    }

    #[tokio::test]
    async fn test_file_store_missing_and_clear() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());

        assert_eq!(store.get("none").await.unwrap(), None);
        assert!(!store.clear("none").await.unwrap());

        store.set("x", &json!({ "cursor": 1 })).await.unwrap();
        assert!(store.clear("x").await.unwrap());
        assert_eq!(store.get("x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        std::fs::write(store.path_for("bad"), b"{not json").unwrap();

        assert!(matches!(
            store.get("bad").await,
            Err(StateError::Serialization(_))
        ));
    }
}
