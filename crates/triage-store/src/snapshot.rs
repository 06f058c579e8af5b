//! JSON snapshots of a [`MemoryGroupStore`].
//!
//! A snapshot is a single `<name>.json` file in a state directory. Writes go
//! to a temporary sibling first and are renamed into place. In-flight RCA
//! leases are never written, so a reloaded store has none.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use triage_core::{Alert, Group, Result, TriageError};

use crate::memory::MemoryGroupStore;
use crate::traits::Version;

/// File stem used by [`MemoryGroupStore::save_snapshot`].
pub const GROUPS_SNAPSHOT: &str = "groups";

/// Serialized store contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Groups with the version they were saved at.
    pub groups: Vec<VersionedGroup>,
    /// Every registered alert.
    pub alerts: Vec<Alert>,
}

/// One group entry in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedGroup {
    /// Stored version.
    pub version: Version,
    /// The group.
    pub group: Group,
}

/// A JSON file holding one snapshot.
#[derive(Debug, Clone)]
pub struct JsonSnapshot {
    path: PathBuf,
}

impl JsonSnapshot {
    /// Snapshot file `<dir>/<name>.json`.
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(format!("{name}.json")),
        }
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Reads the snapshot. A missing file yields an empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::Persistence` if the file can't be read and
    /// `TriageError::Serialization` if it isn't a valid snapshot.
    pub fn load(&self) -> Result<StoreSnapshot> {
        if !self.exists() {
            debug!(path = %self.path.display(), "no snapshot on disk");
            return Ok(StoreSnapshot::default());
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| {
            TriageError::Persistence(format!("failed to read {}: {e}", self.path.display()))
        })?;
        let snapshot: StoreSnapshot = serde_json::from_str(&raw)?;
        debug!(
            path = %self.path.display(),
            groups = snapshot.groups.len(),
            alerts = snapshot.alerts.len(),
            "snapshot loaded"
        );
        Ok(snapshot)
    }

    /// Writes the snapshot, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::Persistence` on I/O failure.
    pub fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                TriageError::Persistence(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let json = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| {
            TriageError::Persistence(format!("failed to write {}: {e}", tmp.display()))
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            TriageError::Persistence(format!("failed to replace {}: {e}", self.path.display()))
        })?;
        Ok(())
    }
}

impl MemoryGroupStore {
    /// Captures the current contents.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        let (groups, alerts) = self.export();
        StoreSnapshot {
            groups: groups
                .into_iter()
                .map(|(group, version)| VersionedGroup { version, group })
                .collect(),
            alerts,
        }
    }

    /// Rebuilds a store from a snapshot. Leases are cleared.
    #[must_use]
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let groups = snapshot
            .groups
            .into_iter()
            .map(|VersionedGroup { version, mut group }| {
                group.rca.lease = None;
                (group, version)
            })
            .collect();
        Self::from_parts(groups, snapshot.alerts)
    }

    /// Writes `<dir>/groups.json`.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::Persistence` on I/O failure.
    pub fn save_snapshot(&self, dir: &Path) -> Result<()> {
        let snapshot = self.snapshot();
        JsonSnapshot::new(dir, GROUPS_SNAPSHOT).save(&snapshot)?;
        info!(
            dir = %dir.display(),
            groups = snapshot.groups.len(),
            alerts = snapshot.alerts.len(),
            "store saved"
        );
        Ok(())
    }

    /// Loads `<dir>/groups.json`, or an empty store if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but can't be read or parsed.
    pub fn load_snapshot(dir: &Path) -> Result<Self> {
        let snapshot = JsonSnapshot::new(dir, GROUPS_SNAPSHOT).load()?;
        Ok(Self::from_snapshot(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{GroupStore, GroupStoreExt, Mutation};
    use tempfile::tempdir;
    use triage_core::{AlertId, Embedding, GenerationLease, GroupId, RcaState, Severity};

    fn populated() -> (MemoryGroupStore, GroupId) {
        let store = MemoryGroupStore::new();
        let a = store
            .put_alert(Alert::new("a1", "disk full", Severity::Critical, "Nagios"))
            .expect("put a1");
        store
            .put_alert(Alert::new("loose", "unassigned", Severity::Low, "Nagios"))
            .expect("put loose");
        let id = store
            .create_new(Group::seed(
                GroupId::new("g1"),
                &a,
                &Embedding::new(vec![0.5, 0.5]),
            ))
            .expect("create");
        (store, id)
    }

    #[test]
    fn missing_file_loads_empty_store() {
        let dir = tempdir().expect("tempdir");
        let store = MemoryGroupStore::load_snapshot(dir.path()).expect("load");
        assert_eq!(store.group_count(), 0);
        assert_eq!(store.alert_count(), 0);
    }

    #[test]
    fn save_and_reload_preserves_state() {
        let dir = tempdir().expect("tempdir");
        let (store, id) = populated();
        store
            .modify(&id, |g| {
                g.rca.transition(RcaState::Pending)?;
                Ok(Mutation::Commit(()))
            })
            .expect("modify");
        store.save_snapshot(dir.path()).expect("save");
        assert!(dir.path().join("groups.json").exists());

        let reloaded = MemoryGroupStore::load_snapshot(dir.path()).expect("load");
        let group = reloaded.get(&id).expect("group");
        assert_eq!(group.version, Version::new(2));
        assert_eq!(group.value.rca.state, RcaState::Pending);
        assert_eq!(reloaded.group_of(&AlertId::new("a1")), Some(id));
        assert_eq!(reloaded.group_of(&AlertId::new("loose")), None);
        assert_eq!(reloaded.alert_count(), 2);
    }

    #[test]
    fn leases_are_not_persisted() {
        let dir = tempdir().expect("tempdir");
        let (store, id) = populated();
        store
            .modify(&id, |g| {
                g.rca.lease = Some(GenerationLease::new(g.membership_epoch));
                Ok(Mutation::Commit(()))
            })
            .expect("modify");
        store.save_snapshot(dir.path()).expect("save");

        let reloaded = MemoryGroupStore::load_snapshot(dir.path()).expect("load");
        assert!(!reloaded.get(&id).expect("group").value.rca.in_flight());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("groups.json"), "{ not json").expect("write");
        let err = MemoryGroupStore::load_snapshot(dir.path()).unwrap_err();
        assert!(matches!(err, TriageError::Serialization(_)));
    }

    #[test]
    fn save_creates_missing_directory() {
        let dir = tempdir().expect("tempdir");
        let nested = dir.path().join("state").join("triage");
        let (store, _) = populated();
        store.save_snapshot(&nested).expect("save");
        assert!(JsonSnapshot::new(&nested, GROUPS_SNAPSHOT).exists());
    }
}
