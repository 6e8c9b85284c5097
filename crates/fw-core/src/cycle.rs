//! One scheduled fetch cycle: load state, poll, deliver, persist.

use crate::cursor::FetchState;
use crate::engine::{FetchCursorEngine, PollError, PollStats};
use crate::sink::{IncidentSink, SinkError};
use crate::source::IncidentSource;
use crate::state::{load_state, save_state, StateError, StateStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

/// Errors that end a cycle.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Poll(#[from] PollError),

    #[error("Failed to deliver incidents: {0}")]
    Sink(#[from] SinkError),

    #[error("Fetch state error: {0}")]
    State(#[from] StateError),
}

impl CycleError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Poll(e) => e.kind(),
            CycleError::Sink(_) => "sink",
            CycleError::State(_) => "state",
        }
    }
}

/// Summary of a completed cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub source: String,
    pub incidents_emitted: usize,
    pub stats: PollStats,
    /// Whether the persisted state changed.
    pub cursor_advanced: bool,
    /// Whether the cycle ignored stored state (none stored, or scope changed).
    pub started_from_initial: bool,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// Runs fetch cycles against a state store and a sink.
pub struct FetchCycle {
    engine: FetchCursorEngine,
    store: Arc<dyn StateStore>,
    sink: Arc<dyn IncidentSink>,
}

impl FetchCycle {
    pub fn new(
        engine: FetchCursorEngine,
        store: Arc<dyn StateStore>,
        sink: Arc<dyn IncidentSink>,
    ) -> Self {
        Self {
            engine,
            store,
            sink,
        }
    }

    pub fn engine(&self) -> &FetchCursorEngine {
        &self.engine
    }

    /// Loads the state the next cycle for `source` would start from.
    ///
    /// Returns the state and whether it is a fresh initial state.
    pub async fn current_state<S>(
        &self,
        source: &S,
    ) -> Result<(FetchState<S::Cursor>, bool), CycleError>
    where
        S: IncidentSource + ?Sized,
    {
        let scope = source.state_scope();
        let stored = load_state::<S::Cursor>(self.store.as_ref(), source.name()).await?;

        match stored {
            Some(state) if state.scope == scope => Ok((state, false)),
            Some(state) => {
                info!(
                    source = source.name(),
                    old_scope = ?state.scope,
                    new_scope = ?scope,
                    "Source scope changed, starting from the initial cursor"
                );
                Ok((FetchState::initial(source.initial_cursor()).with_scope(scope), true))
            }
            None => Ok((FetchState::initial(source.initial_cursor()).with_scope(scope), true)),
        }
    }

    /// Runs one cycle for `source`.
    #[instrument(skip_all, fields(source = %source.name()))]
    pub async fn run<S>(&self, source: &S) -> Result<CycleReport, CycleError>
    where
        S: IncidentSource + ?Sized,
    {
        let started = Instant::now();
        let (state, started_from_initial) = self.current_state(source).await?;

        let result = match self.engine.poll(source, &state).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Poll failed, state left unchanged");
                return Err(e.into());
            }
        };

        if !result.incidents.is_empty() {
            self.sink
                .deliver(source.name(), &result.incidents)
                .await
                .map_err(|e| {
                    warn!(error = %e, "Delivery failed, state left unchanged");
                    e
                })?;
        }

        let cursor_advanced = result.next_state != state;
        if cursor_advanced || started_from_initial {
            if let Err(e) = save_state(self.store.as_ref(), source.name(), &result.next_state).await
            {
                error!(
                    error = %e,
                    delivered = result.incidents.len(),
                    "Failed to persist fetch state; delivered incidents will be fetched again"
                );
                return Err(e.into());
            }
        }

        let report = CycleReport {
            source: source.name().to_string(),
            incidents_emitted: result.incidents.len(),
            stats: result.stats,
            cursor_advanced,
            started_from_initial,
            duration: started.elapsed(),
        };

        info!(
            emitted = report.incidents_emitted,
            advanced = report.cursor_advanced,
            "Fetch cycle complete"
        );
        Ok(report)
    }
}
