//! CLI command implementations.
//!
//! Each submodule implements a specific CLI command:
//! - [`ingest`] - Batch alert ingestion
//! - [`groups`] - Group listing, inspection, resolution and merges
//! - [`stats`] - Aggregate statistics
//! - [`config`] - Default configuration output

pub mod config;
pub mod groups;
pub mod ingest;
pub mod stats;

pub use config::InitConfigCommand;
pub use groups::GroupCommand;
pub use ingest::IngestCommand;
pub use stats::StatsCommand;

use std::path::Path;

use tracing::debug;
use triage_store::MemoryGroupStore;

use crate::error::CliError;

/// Loads the store persisted in `dir`, or an empty one.
pub(crate) fn load_store(dir: &Path) -> Result<MemoryGroupStore, CliError> {
    let store = MemoryGroupStore::load_snapshot(dir)
        .map_err(|e| CliError::State(format!("{}: {e}", dir.display())))?;
    debug!(dir = %dir.display(), alerts = store.alert_count(), "state loaded");
    Ok(store)
}

/// Persists `store` into `dir`.
pub(crate) fn save_store(store: &MemoryGroupStore, dir: &Path) -> Result<(), CliError> {
    store
        .save_snapshot(dir)
        .map_err(|e| CliError::State(format!("{}: {e}", dir.display())))
}
