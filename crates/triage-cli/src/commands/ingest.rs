//! Ingest command implementation.
//!
//! Reads a JSON array of alerts, groups them with the built-in offline
//! capabilities and waits for RCA generation to settle.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing::info;
use triage_core::{Alert, Group, GroupId};
use triage_engine::{TriageConfig, TriageService};
use triage_store::{GroupStore, MemoryGroupStore};

use super::{load_store, save_store};
use crate::cli::IngestArgs;
use crate::error::CliError;
use crate::output::{IngestSummary, OutputFormat};

/// Handler for the ingest command.
pub struct IngestCommand<'a> {
    args: &'a IngestArgs,
}

impl<'a> IngestCommand<'a> {
    /// Creates a new ingest command handler.
    #[must_use]
    pub const fn new(args: &'a IngestArgs) -> Self {
        Self { args }
    }

    /// Executes the ingest.
    ///
    /// # Errors
    ///
    /// Returns error if the input, configuration or state can't be used.
    pub async fn execute<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
    ) -> Result<(), CliError> {
        let config = match &self.args.config {
            Some(path) => TriageConfig::from_file(path)?,
            None => TriageConfig::default(),
        };
        let alerts = read_alerts(&self.args.file)?;
        let received = alerts.len();
        let store = match &self.args.state {
            Some(dir) => load_store(dir)?,
            None => MemoryGroupStore::new(),
        };

        let ids: Vec<_> = alerts.iter().map(|a| a.id.clone()).collect();
        let service = TriageService::offline(config, Arc::new(store.clone())).await?;
        let report = service.ingest_batch(alerts).await;
        service.wait_idle().await;
        service.shutdown().await;

        if let Some(dir) = &self.args.state {
            save_store(&store, dir)?;
        }

        let mut touched: Vec<GroupId> = Vec::new();
        for id in &ids {
            if let Some(group_id) = store.group_of(id) {
                if !touched.contains(&group_id) {
                    touched.push(group_id);
                }
            }
        }
        let groups: Vec<Group> = touched
            .iter()
            .filter_map(|id| store.get(id).ok().map(|v| v.value))
            .collect();

        info!(
            file = %self.args.file.display(),
            received,
            groups = groups.len(),
            "ingest finished"
        );
        format.write(out, &IngestSummary::new(received, report, &groups))
    }
}

fn read_alerts(path: &Path) -> Result<Vec<Alert>, CliError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CliError::Input(format!("failed to read '{}': {e}", path.display())))?;
    serde_json::from_str(&content).map_err(|e| {
        CliError::Input(format!(
            "'{}' is not a JSON array of alerts: {e}",
            path.display()
        ))
    })
}
