//! State commands - inspect or reset a source's stored cursor.

use anyhow::{Context, Result};
use colored::Colorize;
use fw_core::{FileStateStore, StateStore};

use crate::config::AppConfig;
use crate::OutputFormat;

fn store(config: &AppConfig) -> FileStateStore {
    FileStateStore::new(config.state_dir())
}

/// Prints the stored state of a source.
pub async fn cmd_state_show(config: &AppConfig, source: &str, format: OutputFormat) -> Result<()> {
    config.source(source)?;
    let store = store(config);
    let state = store
        .get(source)
        .await
        .with_context(|| format!("Failed to read state for '{}'", source))?;

    let Some(state) = state else {
        if format == OutputFormat::Json {
            println!("null");
        } else {
            println!(
                "No state stored for '{}'; the next fetch starts from the first-fetch point.",
                source
            );
        }
        return Ok(());
    };

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    println!("{}", format!("State for '{}'", source).bold());
    println!("─────────────────────");
    println!("File:    {}", store.path_for(source).display());
    println!("Cursor:  {}", state.get("cursor").map(|c| c.to_string()).unwrap_or_default());
    if let Some(scope) = state.get("scope").and_then(|s| s.as_str()) {
        println!("Scope:   {}", scope);
    }
    let excluded = state
        .get("exclude_ids")
        .and_then(|ids| ids.as_array())
        .map(|ids| ids.len())
        .unwrap_or(0);
    println!("Emitted at cursor: {}", excluded);
    Ok(())
}

/// Deletes the stored state so the next fetch starts over.
pub async fn cmd_state_reset(config: &AppConfig, source: &str) -> Result<()> {
    config.source(source)?;
    let removed = store(config)
        .clear(source)
        .await
        .with_context(|| format!("Failed to reset state for '{}'", source))?;

    if removed {
        println!("{} State for '{}' removed", "✓".green(), source);
    } else {
        println!("No state stored for '{}'", source);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MockSourceConfig, SourceConfig};
    use serde_json::json;

    fn config(dir: &std::path::Path) -> AppConfig {
        AppConfig {
            state_dir: Some(dir.to_path_buf()),
            sources: vec![SourceConfig::Mock(MockSourceConfig {
                name: "demo".into(),
                initial_cursor: 0,
                records: Vec::new(),
            })],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_reset_removes_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        store(&config)
            .set("demo", &json!({ "cursor": 5, "exclude_ids": ["5"] }))
            .await
            .unwrap();

        cmd_state_show(&config, "demo", OutputFormat::Text).await.unwrap();
        cmd_state_reset(&config, "demo").await.unwrap();
        assert!(store(&config).get("demo").await.unwrap().is_none());

        // Resetting again is not an error.
        cmd_state_reset(&config, "demo").await.unwrap();
    }

    #[tokio::test]
    async fn test_state_commands_require_a_configured_source() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        assert!(cmd_state_show(&config, "other", OutputFormat::Json).await.is_err());
        assert!(cmd_state_reset(&config, "other").await.is_err());
    }
}
