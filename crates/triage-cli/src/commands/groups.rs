//! Group command implementations.
//!
//! Handles group listing, inspection, resolution and merges against the
//! persisted state directory.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use triage_core::GroupId;
use triage_engine::{TriageConfig, TriageService};
use triage_store::{GroupFilter, GroupStore};

use super::{load_store, save_store};
use crate::cli::GroupsArgs;
use crate::error::CliError;
use crate::output::{GroupDetail, GroupList, GroupRow, GroupUpdated, OutputFormat};

/// Handler for group subcommands.
pub struct GroupCommand<'a> {
    state: &'a Path,
}

impl<'a> GroupCommand<'a> {
    /// Creates a handler over the state directory.
    #[must_use]
    pub const fn new(state: &'a Path) -> Self {
        Self { state }
    }

    /// Lists groups matching the arguments.
    ///
    /// # Errors
    ///
    /// Returns error if the state can't be loaded or output fails.
    pub fn list<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        args: &GroupsArgs,
    ) -> Result<(), CliError> {
        let store = load_store(self.state)?;
        let mut filter = GroupFilter::all()
            .with_offset(args.offset)
            .with_limit(args.limit);
        if let Some(status) = args.status {
            filter = filter.with_status(status.into());
        }
        if let Some(service) = &args.service {
            filter = filter.with_service(service.clone());
        }
        let page = store.list(&filter);
        format.write(out, &GroupList::from(&page))
    }

    /// Shows one group with its alerts.
    ///
    /// # Errors
    ///
    /// Returns `CliError::GroupNotFound` if the group doesn't exist.
    pub fn show<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        id: &str,
    ) -> Result<(), CliError> {
        let store = load_store(self.state)?;
        let id = GroupId::new(id);
        let group = store.get(&id)?.value;
        let alerts = store.alerts_of(&id)?;
        format.write(out, &GroupDetail { group, alerts })
    }

    /// Resolves a group and saves the state.
    ///
    /// # Errors
    ///
    /// Returns `CliError::GroupNotFound` if the group doesn't exist.
    pub async fn resolve<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        id: &str,
        notes: Option<String>,
    ) -> Result<(), CliError> {
        let store = load_store(self.state)?;
        let service =
            TriageService::offline(TriageConfig::default(), Arc::new(store.clone())).await?;
        let group = service.resolve_group(&GroupId::new(id), notes)?;
        service.shutdown().await;
        save_store(&store, self.state)?;

        let update = GroupUpdated {
            message: format!("Group {id} resolved"),
            group: GroupRow::from(&group),
        };
        format.write(out, &update)
    }

    /// Merges `sources` into `target`, regenerates its RCA and saves the state.
    ///
    /// # Errors
    ///
    /// Returns error if any group doesn't exist or the target is resolved.
    pub async fn merge<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        target: &str,
        sources: &[String],
    ) -> Result<(), CliError> {
        let store = load_store(self.state)?;
        let service =
            TriageService::offline(TriageConfig::default(), Arc::new(store.clone())).await?;
        let target_id = GroupId::new(target);
        let source_ids: Vec<GroupId> = sources.iter().map(GroupId::new).collect();
        let merged = service.merge_groups(&target_id, &source_ids).await?;
        service.wait_idle().await;
        service.shutdown().await;
        save_store(&store, self.state)?;

        let group = store.get(&target_id).map_or(merged, |v| v.value);
        let update = GroupUpdated {
            message: format!("Merged {} group(s) into {target}", source_ids.len()),
            group: GroupRow::from(&group),
        };
        format.write(out, &update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Format, StateArgs};
    use tempfile::{tempdir, TempDir};
    use triage_core::{Alert, Group, GroupStatus, Severity};
    use triage_engine::HashingEmbedder;
    use triage_store::MemoryGroupStore;

    fn seeded() -> TempDir {
        let dir = tempdir().expect("tempdir");
        let store = MemoryGroupStore::new();
        let embedder = HashingEmbedder::new(TriageConfig::default().embedding.dimension);
        for (alert_id, group_id, service) in [("a1", "g1", "web-api"), ("b1", "g2", "billing")] {
            let alert = store
                .put_alert(
                    Alert::new(alert_id, "Latency spike", Severity::High, "Grafana")
                        .with_service(service),
                )
                .expect("put");
            store
                .create_new(Group::seed(
                    GroupId::new(group_id),
                    &alert,
                    &embedder.embed_sync(&alert.embedding_text()),
                ))
                .expect("create");
        }
        store.save_snapshot(dir.path()).expect("save");
        dir
    }

    fn list_args(dir: &Path) -> GroupsArgs {
        GroupsArgs {
            state: StateArgs {
                state: dir.to_path_buf(),
            },
            status: None,
            service: None,
            limit: 20,
            offset: 0,
        }
    }

    #[test]
    fn list_filters_by_service() {
        let dir = seeded();
        let mut args = list_args(dir.path());
        args.service = Some("billing".into());

        let mut out = Vec::new();
        GroupCommand::new(dir.path())
            .list(&mut out, &OutputFormat::new(Format::Json), &args)
            .expect("list");
        let value: serde_json::Value = serde_json::from_slice(&out).expect("json");
        assert_eq!(value["total"], 1);
        assert_eq!(value["groups"][0]["id"], "g2");
    }

    #[test]
    fn show_unknown_group() {
        let dir = seeded();
        let mut out = Vec::new();
        let err = GroupCommand::new(dir.path())
            .show(&mut out, &OutputFormat::default(), "missing")
            .unwrap_err();
        assert!(matches!(err, CliError::GroupNotFound(id) if id == "missing"));
    }

    #[test]
    fn show_lists_members() {
        let dir = seeded();
        let mut out = Vec::new();
        GroupCommand::new(dir.path())
            .show(&mut out, &OutputFormat::default(), "g1")
            .expect("show");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("Group: g1"));
        assert!(text.contains("a1"));
    }

    #[tokio::test]
    async fn resolve_persists() {
        let dir = seeded();
        let mut out = Vec::new();
        GroupCommand::new(dir.path())
            .resolve(&mut out, &OutputFormat::default(), "g1", Some("rolled back".into()))
            .await
            .expect("resolve");

        let store = load_store(dir.path()).expect("reload");
        let group = store.get(&GroupId::new("g1")).expect("group").value;
        assert_eq!(group.status, GroupStatus::Resolved);
        assert_eq!(group.resolution_notes.as_deref(), Some("rolled back"));
    }

    #[tokio::test]
    async fn merge_persists_membership() {
        let dir = seeded();
        let mut out = Vec::new();
        GroupCommand::new(dir.path())
            .merge(&mut out, &OutputFormat::default(), "g1", &["g2".to_string()])
            .await
            .expect("merge");
        assert!(String::from_utf8(out).expect("utf8").contains("Merged 1 group(s) into g1"));

        let store = load_store(dir.path()).expect("reload");
        assert_eq!(store.group_of(&"b1".into()), Some(GroupId::new("g1")));
        let target = store.get(&GroupId::new("g1")).expect("group").value;
        assert_eq!(target.member_count(), 2);
        assert!(target.rca.report.is_some());
    }
}
