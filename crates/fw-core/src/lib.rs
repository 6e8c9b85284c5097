//! # fw-core
//!
//! Incremental fetch engine and state model for Feed Warden.
//!
//! This crate turns paginated vendor listing APIs into an exactly-once stream
//! of incidents. It provides the cursor and state types, the `IncidentSource`
//! abstraction implemented by connectors, the polling engine, and the cycle
//! runner that ties a source to a state store and an incident sink.

pub mod cursor;
pub mod cycle;
pub mod engine;
pub mod incident;
pub mod sink;
pub mod source;
pub mod state;

pub use cursor::{CursorValue, FetchState, FirstFetch, FirstFetchError};
pub use cycle::{CycleError, CycleReport, FetchCycle};
pub use engine::{FetchCursorEngine, PollConfig, PollError, PollResult, PollStats};
pub use incident::{Incident, IncidentLabel};
pub use sink::{IncidentSink, JsonLinesSink, MemorySink, SinkError};
pub use source::{
    FetchError, FetchResult, IncidentSource, MappingError, MockBehavior, MockItem, MockSource,
    Page, PageRequest,
};
pub use state::{
    load_state, save_state, FileStateStore, MemoryStateStore, StateError, StateResult, StateStore,
};
