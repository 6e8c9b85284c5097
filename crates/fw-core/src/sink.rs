//! Destinations for emitted incidents.

use crate::incident::Incident;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Errors raised while handing incidents off.
#[derive(Error, Debug, Clone)]
pub enum SinkError {
    #[error("Sink I/O error: {0}")]
    Io(String),

    #[error("Failed to encode incident: {0}")]
    Encoding(String),

    #[error("Sink rejected incidents: {0}")]
    Rejected(String),
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err.to_string())
    }
}

/// Receives the incidents of each successful poll.
///
/// Delivery is at-least-once: if persisting state fails after a delivery, the
/// same incidents are delivered again on the next cycle.
#[async_trait]
pub trait IncidentSink: Send + Sync {
    /// Hands off `incidents` produced by `source`, in order.
    async fn deliver(&self, source: &str, incidents: &[Incident]) -> Result<(), SinkError>;
}

/// Collects incidents in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    delivered: RwLock<Vec<Incident>>,
    fail: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent deliveries fail.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every incident delivered so far.
    pub async fn delivered(&self) -> Vec<Incident> {
        self.delivered.read().await.clone()
    }

    /// Names of every incident delivered so far.
    pub async fn names(&self) -> Vec<String> {
        self.delivered
            .read()
            .await
            .iter()
            .map(|i| i.name.clone())
            .collect()
    }
}

#[async_trait]
impl IncidentSink for MemorySink {
    async fn deliver(&self, _source: &str, incidents: &[Incident]) -> Result<(), SinkError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected("sink disabled".to_string()));
        }
        self.delivered.write().await.extend_from_slice(incidents);
        Ok(())
    }
}

#[derive(Debug)]
enum Target {
    Stdout,
    File(PathBuf),
}

/// Writes one JSON object per incident, newline separated.
#[derive(Debug)]
pub struct JsonLinesSink {
    target: Target,
    lock: Mutex<()>,
}

impl JsonLinesSink {
    /// Writes to standard output.
    pub fn stdout() -> Self {
        Self {
            target: Target::Stdout,
            lock: Mutex::new(()),
        }
    }

    /// Appends to `path`, creating it if needed.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            target: Target::File(path.into()),
            lock: Mutex::new(()),
        }
    }

    fn encode(incidents: &[Incident]) -> Result<Vec<u8>, SinkError> {
        let mut buf = Vec::new();
        for incident in incidents {
            serde_json::to_writer(&mut buf, incident)
                .map_err(|e| SinkError::Encoding(e.to_string()))?;
            buf.push(b'\n');
        }
        Ok(buf)
    }
}

#[async_trait]
impl IncidentSink for JsonLinesSink {
    async fn deliver(&self, source: &str, incidents: &[Incident]) -> Result<(), SinkError> {
        if incidents.is_empty() {
            return Ok(());
        }

        let buf = Self::encode(incidents)?;
        let _guard = self.lock.lock().await;

        match &self.target {
            Target::Stdout => {
                let mut out = tokio::io::stdout();
                out.write_all(&buf).await?;
                out.flush().await?;
            }
            Target::File(path) => {
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?;
                file.write_all(&buf).await?;
                file.flush().await?;
            }
        }

        debug!(source, count = incidents.len(), "Delivered incidents");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn incident(name: &str) -> Incident {
        Incident::new(name, Utc::now(), "test", serde_json::json!({ "name": name }))
    }

    #[tokio::test]
    async fn test_memory_sink_collects() {
        let sink = MemorySink::new();
        sink.deliver("test", &[incident("a"), incident("b")])
            .await
            .unwrap();
        assert_eq!(sink.names().await, vec!["a", "b"]);

        sink.set_fail(true);
        assert!(sink.deliver("test", &[incident("c")]).await.is_err());
        assert_eq!(sink.delivered().await.len(), 2);
    }

    #[tokio::test]
    async fn test_json_lines_sink_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("incidents.jsonl");
        let sink = JsonLinesSink::file(&path);

        sink.deliver("test", &[incident("a")]).await.unwrap();
        sink.deliver("test", &[incident("b"), incident("c")])
            .await
            .unwrap();
        sink.deliver("test", &[]).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let names: Vec<String> = content
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["name"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
