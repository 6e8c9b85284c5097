//! Subcommand implementations.

pub mod fetch;
pub mod state;

pub use fetch::{cmd_fetch, FetchOptions};
pub use state::{cmd_state_reset, cmd_state_show};
