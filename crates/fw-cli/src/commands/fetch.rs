//! Fetch command - runs one fetch cycle for a source.

use anyhow::{Context, Result};
use colored::Colorize;
use fw_core::{FetchCursorEngine, FetchCycle, FileStateStore, IncidentSink, JsonLinesSink};
use fw_observability::FetchMetrics;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use crate::config::AppConfig;
use crate::sources::ConfiguredSource;
use crate::OutputFormat;

/// Fetch options from CLI arguments.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub source: String,
    /// Append incidents to this file instead of stdout.
    pub output: Option<PathBuf>,
    pub format: OutputFormat,
}

/// Runs one cycle. Incidents go to the sink; the summary goes to stderr so
/// stdout stays a clean JSON-lines stream.
pub async fn cmd_fetch(config: &AppConfig, options: FetchOptions) -> Result<()> {
    let source_config = config.source(&options.source)?;
    let source = ConfiguredSource::build(source_config)
        .await
        .with_context(|| format!("Failed to set up source '{}'", options.source))?;

    let state_dir = config.state_dir();
    tokio::fs::create_dir_all(&state_dir)
        .await
        .with_context(|| format!("Failed to create state directory: {}", state_dir.display()))?;

    let sink: Arc<dyn IncidentSink> = match &options.output {
        Some(path) => Arc::new(JsonLinesSink::file(path.clone())),
        None => Arc::new(JsonLinesSink::stdout()),
    };
    let cycle = FetchCycle::new(
        FetchCursorEngine::new(config.fetch.poll_config()),
        Arc::new(FileStateStore::new(state_dir)),
        sink,
    );

    let metrics = FetchMetrics::new();
    let started = Instant::now();

    let outcome = source
        .run_cycle(&cycle)
        .instrument(fw_observability::cycle_span!(options.source))
        .await;

    match outcome {
        Ok(report) => {
            metrics.record_cycle(&report, chrono::Utc::now().timestamp() as f64);

            if options.format == OutputFormat::Json {
                eprintln!("{}", serde_json::to_string(&report)?);
            } else {
                let truncated = if report.stats.truncated {
                    " (more pending)".yellow().to_string()
                } else {
                    String::new()
                };
                eprintln!(
                    "{} {}: {} incident(s), {} page(s), {} skipped in {:?}{}",
                    "✓".green(),
                    report.source.bold(),
                    report.incidents_emitted,
                    report.stats.pages_fetched,
                    report.stats.malformed_skipped,
                    report.duration,
                    truncated
                );
            }
            Ok(())
        }
        Err(e) => {
            metrics.record_failure(&options.source, &e, started.elapsed().as_secs_f64());
            Err(anyhow::Error::new(e).context(format!("Fetch cycle for '{}' failed", options.source)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MockRecord, MockSourceConfig, SourceConfig};

    fn config(state_dir: PathBuf) -> AppConfig {
        AppConfig {
            state_dir: Some(state_dir),
            sources: vec![SourceConfig::Mock(MockSourceConfig {
                name: "demo".into(),
                initial_cursor: 0,
                records: (1..=3)
                    .map(|i| MockRecord {
                        key: format!("k{}", i),
                        order: i,
                    })
                    .collect(),
            })],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_writes_incidents_and_state() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("incidents.jsonl");
        let config = config(dir.path().join("state"));

        let options = FetchOptions {
            source: "demo".into(),
            output: Some(output.clone()),
            format: OutputFormat::Json,
        };
        cmd_fetch(&config, options.clone()).await.unwrap();

        let written = std::fs::read_to_string(&output).unwrap();
        assert_eq!(written.lines().count(), 3);
        assert!(dir.path().join("state").join("demo.json").exists());

        // A second run finds nothing new.
        cmd_fetch(&config, options).await.unwrap();
        let written = std::fs::read_to_string(&output).unwrap();
        assert_eq!(written.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_fetch_unknown_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd_fetch(
            &config(dir.path().to_path_buf()),
            FetchOptions {
                source: "missing".into(),
                output: None,
                format: OutputFormat::Text,
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
