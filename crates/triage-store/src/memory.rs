//! In-memory group store.
//!
//! Each group lives in its own slot behind a mutex, so writers only contend
//! when they touch the same group. The outer map lock is held just long
//! enough to find or insert a slot.
//!
//! Lock order is always: group map, then slots (ascending ID when several are
//! needed), then the alert registry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use triage_core::{Alert, AlertId, AlertStatus, Group, GroupId, Result, TriageError};

use crate::filter::{GroupFilter, GroupPage};
use crate::traits::{GroupStore, UpdateOutcome, Version, Versioned};

#[derive(Debug)]
struct Slot {
    group: Group,
    version: Version,
}

#[derive(Debug, Clone)]
pub(crate) struct AlertRecord {
    pub(crate) alert: Alert,
    pub(crate) group: Option<GroupId>,
}

/// A [`GroupStore`] kept entirely in memory.
///
/// Cloning yields another handle onto the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryGroupStore {
    groups: Arc<RwLock<HashMap<GroupId, Arc<Mutex<Slot>>>>>,
    alerts: Arc<RwLock<HashMap<AlertId, AlertRecord>>>,
}

impl MemoryGroupStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered alerts.
    #[must_use]
    pub fn alert_count(&self) -> usize {
        self.alerts.read().len()
    }

    /// Rebuilds a store from persisted groups and alerts.
    ///
    /// The alert-to-group mapping is derived from group membership.
    pub(crate) fn from_parts(groups: Vec<(Group, Version)>, alerts: Vec<Alert>) -> Self {
        let mut records: HashMap<AlertId, AlertRecord> = alerts
            .into_iter()
            .map(|alert| {
                (
                    alert.id.clone(),
                    AlertRecord {
                        alert,
                        group: None,
                    },
                )
            })
            .collect();

        let mut slots = HashMap::with_capacity(groups.len());
        for (group, version) in groups {
            for member in &group.members {
                if let Some(record) = records.get_mut(member) {
                    record.group = Some(group.id.clone());
                }
            }
            slots.insert(group.id.clone(), Arc::new(Mutex::new(Slot { group, version })));
        }

        Self {
            groups: Arc::new(RwLock::new(slots)),
            alerts: Arc::new(RwLock::new(records)),
        }
    }

    /// Copies every group with its version and every alert.
    pub(crate) fn export(&self) -> (Vec<(Group, Version)>, Vec<Alert>) {
        let slots: Vec<Arc<Mutex<Slot>>> = self.groups.read().values().cloned().collect();
        let mut groups: Vec<(Group, Version)> = slots
            .iter()
            .map(|slot| {
                let slot = slot.lock();
                (slot.group.clone(), slot.version)
            })
            .collect();
        groups.sort_by(|a, b| a.0.id.cmp(&b.0.id));

        let mut alerts: Vec<Alert> = self
            .alerts
            .read()
            .values()
            .map(|r| r.alert.clone())
            .collect();
        alerts.sort_by(|a, b| a.id.cmp(&b.id));
        (groups, alerts)
    }

    fn slot(&self, id: &GroupId) -> Result<Arc<Mutex<Slot>>> {
        self.groups
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| TriageError::GroupNotFound { id: id.to_string() })
    }

    /// Conditional write of one group. `incoming` is registered only if it
    /// is among the added members and the write is applied.
    fn update_slot(
        &self,
        id: &GroupId,
        expected: Version,
        group: Group,
        incoming: Option<&Alert>,
    ) -> Result<UpdateOutcome> {
        let slot = self.slot(id)?;
        let mut slot = slot.lock();

        if slot.version != expected {
            return Ok(UpdateOutcome::Conflict {
                current: slot.version,
            });
        }

        if let Some(dropped) = slot.group.members.iter().find(|m| !group.members.contains(m)) {
            return Err(TriageError::InvalidAlert {
                reason: format!("alert {dropped} cannot leave group {id} outside a merge"),
            });
        }

        let added: Vec<&AlertId> = group
            .members
            .iter()
            .filter(|m| !slot.group.members.contains(m))
            .collect();

        if !added.is_empty() {
            let mut alerts = self.alerts.write();
            for alert_id in &added {
                match alerts.get(*alert_id) {
                    None if incoming.is_some_and(|a| a.id == **alert_id) => {}
                    None => {
                        return Err(TriageError::AlertNotFound {
                            id: alert_id.to_string(),
                        });
                    }
                    Some(record) => {
                        if let Some(owner) = record.group.as_ref().filter(|owner| *owner != id) {
                            return Ok(UpdateOutcome::AlertClaimed {
                                alert_id: (*alert_id).clone(),
                                group_id: owner.clone(),
                            });
                        }
                    }
                }
            }
            register(&mut alerts, incoming, &added);
            for alert_id in &added {
                if let Some(record) = alerts.get_mut(*alert_id) {
                    record.group = Some(id.clone());
                }
            }
        }

        let added = added.len();
        slot.version = slot.version.next();
        slot.group = group;
        debug!(group_id = %id, version = %slot.version, added, "group updated");
        Ok(UpdateOutcome::Applied(slot.version))
    }

    fn insert_group(&self, group: Group, incoming: Option<&Alert>) -> Result<GroupId> {
        let mut groups = self.groups.write();
        if groups.contains_key(&group.id) {
            return Err(TriageError::InvalidAlert {
                reason: format!("group {} already exists", group.id),
            });
        }

        let mut alerts = self.alerts.write();
        for member in &group.members {
            match alerts.get(member) {
                None if incoming.is_some_and(|a| a.id == *member) => {}
                None => {
                    return Err(TriageError::AlertNotFound {
                        id: member.to_string(),
                    });
                }
                Some(AlertRecord {
                    group: Some(owner), ..
                }) => {
                    return Err(TriageError::AlertAlreadyAssigned {
                        alert_id: member.to_string(),
                        group_id: owner.to_string(),
                    });
                }
                Some(_) => {}
            }
        }
        let members: Vec<&AlertId> = group.members.iter().collect();
        register(&mut alerts, incoming, &members);
        for member in &group.members {
            if let Some(record) = alerts.get_mut(member) {
                record.group = Some(group.id.clone());
            }
        }

        let id = group.id.clone();
        info!(group_id = %id, members = group.members.len(), "group created");
        groups.insert(
            id.clone(),
            Arc::new(Mutex::new(Slot {
                group,
                version: Version::INITIAL,
            })),
        );
        Ok(id)
    }
}

/// Stores `incoming` if it is one of `members` and not yet registered.
fn register(
    alerts: &mut HashMap<AlertId, AlertRecord>,
    incoming: Option<&Alert>,
    members: &[&AlertId],
) {
    if let Some(alert) = incoming.filter(|a| members.contains(&&a.id)) {
        alerts
            .entry(alert.id.clone())
            .or_insert_with(|| AlertRecord {
                alert: alert.clone(),
                group: None,
            });
    }
}

impl GroupStore for MemoryGroupStore {
    fn get(&self, id: &GroupId) -> Result<Versioned<Group>> {
        let slot = self.slot(id)?;
        let slot = slot.lock();
        Ok(Versioned {
            value: slot.group.clone(),
            version: slot.version,
        })
    }

    fn try_update(&self, id: &GroupId, expected: Version, group: Group) -> Result<UpdateOutcome> {
        self.update_slot(id, expected, group, None)
    }

    fn create_new(&self, group: Group) -> Result<GroupId> {
        self.insert_group(group, None)
    }

    fn try_update_with_alert(
        &self,
        id: &GroupId,
        expected: Version,
        group: Group,
        incoming: &Alert,
    ) -> Result<UpdateOutcome> {
        incoming.validate()?;
        self.update_slot(id, expected, group, Some(incoming))
    }

    fn create_with_alert(&self, group: Group, incoming: &Alert) -> Result<GroupId> {
        incoming.validate()?;
        self.insert_group(group, Some(incoming))
    }

    fn list(&self, filter: &GroupFilter) -> GroupPage {
        let slots: Vec<Arc<Mutex<Slot>>> = self.groups.read().values().cloned().collect();
        let mut matching: Vec<Group> = slots
            .iter()
            .filter_map(|slot| {
                let slot = slot.lock();
                filter.matches(&slot.group).then(|| slot.group.clone())
            })
            .collect();
        matching.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        filter.paginate(matching)
    }

    fn merge(&self, target: &GroupId, sources: &[GroupId]) -> Result<Versioned<Group>> {
        let mut ids: Vec<&GroupId> = sources.iter().filter(|s| *s != target).collect();
        ids.sort();
        ids.dedup();

        let groups = self.groups.read();
        let target_slot = groups
            .get(target)
            .cloned()
            .ok_or_else(|| TriageError::GroupNotFound {
                id: target.to_string(),
            })?;
        let mut source_slots = Vec::with_capacity(ids.len());
        for id in &ids {
            let slot = groups
                .get(*id)
                .cloned()
                .ok_or_else(|| TriageError::GroupNotFound { id: id.to_string() })?;
            source_slots.push(((*id).clone(), slot));
        }
        drop(groups);

        // Lock every slot in ascending ID order.
        let mut order: Vec<(GroupId, Arc<Mutex<Slot>>)> = source_slots;
        order.push((target.clone(), target_slot));
        order.sort_by(|a, b| a.0.cmp(&b.0));
        let mut guards: Vec<(GroupId, parking_lot::MutexGuard<'_, Slot>)> =
            order.iter().map(|(id, slot)| (id.clone(), slot.lock())).collect();

        let mut merged = guards
            .iter()
            .find(|(id, _)| id == target)
            .map(|(_, g)| g.group.clone())
            .ok_or_else(|| TriageError::GroupNotFound {
                id: target.to_string(),
            })?;

        let mut moved: Vec<AlertId> = Vec::new();
        let now = Utc::now();
        for (id, guard) in &mut guards {
            if *id == *target {
                continue;
            }
            merged.absorb_group(&guard.group);
            moved.extend(guard.group.members.drain(..));
            guard.group.merged_into = Some(target.clone());
            guard.group.resolve(Some(format!("merged into {target}")));
            guard.group.updated_at = now;
            guard.version = guard.version.next();
        }

        {
            let mut alerts = self.alerts.write();
            for alert_id in &moved {
                if let Some(record) = alerts.get_mut(alert_id) {
                    record.group = Some(target.clone());
                }
            }
        }

        let mut result = None;
        for (id, guard) in &mut guards {
            if *id == *target {
                guard.version = guard.version.next();
                guard.group = merged.clone();
                result = Some(Versioned {
                    value: merged.clone(),
                    version: guard.version,
                });
            }
        }

        info!(
            target = %target,
            sources = ids.len(),
            moved = moved.len(),
            "groups merged"
        );
        result.ok_or_else(|| TriageError::GroupNotFound {
            id: target.to_string(),
        })
    }

    fn put_alert(&self, alert: Alert) -> Result<Alert> {
        alert.validate()?;
        let mut alerts = self.alerts.write();
        let record = alerts.entry(alert.id.clone()).or_insert_with(|| AlertRecord {
            alert,
            group: None,
        });
        Ok(record.alert.clone())
    }

    fn get_alert(&self, id: &AlertId) -> Option<Alert> {
        self.alerts.read().get(id).map(|r| r.alert.clone())
    }

    fn group_of(&self, id: &AlertId) -> Option<GroupId> {
        self.alerts.read().get(id).and_then(|r| r.group.clone())
    }

    fn set_alert_status(&self, id: &AlertId, status: AlertStatus) -> Result<Alert> {
        let mut alerts = self.alerts.write();
        let record = alerts
            .get_mut(id)
            .ok_or_else(|| TriageError::AlertNotFound { id: id.to_string() })?;
        record.alert.status = status;
        debug!(alert_id = %id, status = %status, "alert status updated");
        Ok(record.alert.clone())
    }

    fn alerts_of(&self, id: &GroupId) -> Result<Vec<Alert>> {
        let members = self.get(id)?.value.members;
        let alerts = self.alerts.read();
        Ok(members
            .iter()
            .filter_map(|m| alerts.get(m).map(|r| r.alert.clone()))
            .collect())
    }

    fn group_count(&self) -> usize {
        self.groups.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{GroupStoreExt, Mutation};
    use std::thread;
    use triage_core::{Embedding, GroupStatus, Severity};

    fn alert(id: &str) -> Alert {
        Alert::new(id, format!("alert {id}"), Severity::High, "Prometheus")
    }

    fn seeded(store: &MemoryGroupStore, group_id: &str, alert_id: &str) -> GroupId {
        let a = store.put_alert(alert(alert_id)).unwrap();
        let group = Group::seed(GroupId::new(group_id), &a, &Embedding::new(vec![1.0, 0.0]));
        store.create_new(group).unwrap()
    }

    mod crud_tests {
        use super::*;

        #[test]
        fn create_and_get() {
            let store = MemoryGroupStore::new();
            let id = seeded(&store, "g1", "a1");

            let read = store.get(&id).unwrap();
            assert_eq!(read.version, Version::INITIAL);
            assert_eq!(read.value.members, vec![AlertId::new("a1")]);
            assert_eq!(store.group_of(&AlertId::new("a1")), Some(id));
            assert_eq!(store.group_count(), 1);
        }

        #[test]
        fn get_missing_group() {
            let store = MemoryGroupStore::new();
            let err = store.get(&GroupId::new("nope")).unwrap_err();
            assert_eq!(err, TriageError::GroupNotFound { id: "nope".into() });
        }

        #[test]
        fn put_alert_is_idempotent() {
            let store = MemoryGroupStore::new();
            store.put_alert(alert("a1")).unwrap();
            let again = store
                .put_alert(alert("a1").with_description("different"))
                .unwrap();
            assert!(again.description.is_empty());
            assert_eq!(store.alert_count(), 1);
        }

        #[test]
        fn create_rejects_claimed_member() {
            let store = MemoryGroupStore::new();
            seeded(&store, "g1", "a1");
            let a = store.get_alert(&AlertId::new("a1")).unwrap();
            let dup = Group::seed(GroupId::new("g2"), &a, &Embedding::new(vec![1.0, 0.0]));
            let err = store.create_new(dup).unwrap_err();
            assert_eq!(
                err,
                TriageError::AlertAlreadyAssigned {
                    alert_id: "a1".into(),
                    group_id: "g1".into()
                }
            );
            assert_eq!(store.group_count(), 1);
        }

        #[test]
        fn create_requires_registered_alert() {
            let store = MemoryGroupStore::new();
            let group = Group::seed(
                GroupId::new("g1"),
                &alert("ghost"),
                &Embedding::new(vec![1.0]),
            );
            assert!(matches!(
                store.create_new(group),
                Err(TriageError::AlertNotFound { .. })
            ));
        }

        #[test]
        fn create_with_alert_registers_incoming() {
            let store = MemoryGroupStore::new();
            let a = alert("a1");
            let group = Group::seed(GroupId::new("g1"), &a, &Embedding::new(vec![1.0, 0.0]));
            let id = store.create_with_alert(group, &a).unwrap();

            assert_eq!(store.alert_count(), 1);
            assert_eq!(store.group_of(&AlertId::new("a1")), Some(id));
        }

        #[test]
        fn rejected_create_registers_nothing() {
            let store = MemoryGroupStore::new();
            seeded(&store, "g1", "a1");
            let a = store.get_alert(&AlertId::new("a1")).unwrap();
            let fresh = alert("b1");
            let mut group = Group::seed(GroupId::new("g2"), &fresh, &Embedding::new(vec![1.0, 0.0]));
            group.absorb(&a, &Embedding::new(vec![1.0, 0.0]));

            assert!(matches!(
                store.create_with_alert(group, &fresh),
                Err(TriageError::AlertAlreadyAssigned { .. })
            ));
            assert_eq!(store.alert_count(), 1);
            assert!(store.get_alert(&AlertId::new("b1")).is_none());
        }

        #[test]
        fn set_alert_status() {
            let store = MemoryGroupStore::new();
            store.put_alert(alert("a1")).unwrap();
            let updated = store
                .set_alert_status(&AlertId::new("a1"), AlertStatus::Acknowledged)
                .unwrap();
            assert_eq!(updated.status, AlertStatus::Acknowledged);
            assert!(store
                .set_alert_status(&AlertId::new("zz"), AlertStatus::Resolved)
                .is_err());
        }
    }

    mod versioning_tests {
        use super::*;

        #[test]
        fn stale_version_conflicts() {
            let store = MemoryGroupStore::new();
            let id = seeded(&store, "g1", "a1");
            let read = store.get(&id).unwrap();

            let mut first = read.value.clone();
            first.title = "first".into();
            assert_eq!(
                store.try_update(&id, read.version, first).unwrap(),
                UpdateOutcome::Applied(Version::new(2))
            );

            let mut second = read.value;
            second.title = "second".into();
            assert_eq!(
                store.try_update(&id, read.version, second).unwrap(),
                UpdateOutcome::Conflict {
                    current: Version::new(2)
                }
            );
            assert_eq!(store.get(&id).unwrap().value.title, "first");
        }

        #[test]
        fn update_claims_new_members() {
            let store = MemoryGroupStore::new();
            let id = seeded(&store, "g1", "a1");
            let b = store.put_alert(alert("b1")).unwrap();

            store
                .modify(&id, |g| {
                    g.absorb(&b, &Embedding::new(vec![0.0, 1.0]));
                    Ok(Mutation::Commit(()))
                })
                .unwrap();

            assert_eq!(store.group_of(&AlertId::new("b1")), Some(id.clone()));
            assert_eq!(store.alerts_of(&id).unwrap().len(), 2);
        }

        #[test]
        fn update_refuses_member_owned_elsewhere() {
            let store = MemoryGroupStore::new();
            let g1 = seeded(&store, "g1", "a1");
            let g2 = seeded(&store, "g2", "b1");
            let b = store.get_alert(&AlertId::new("b1")).unwrap();

            let err = store
                .modify(&g1, |g| {
                    g.absorb(&b, &Embedding::new(vec![0.0, 1.0]));
                    Ok(Mutation::Commit(()))
                })
                .unwrap_err();

            assert_eq!(
                err,
                TriageError::AlertAlreadyAssigned {
                    alert_id: "b1".into(),
                    group_id: "g2".into()
                }
            );
            assert_eq!(store.get(&g1).unwrap().value.member_count(), 1);
            assert_eq!(store.group_of(&AlertId::new("b1")), Some(g2));
        }

        #[test]
        fn conflicting_update_registers_nothing() {
            let store = MemoryGroupStore::new();
            let id = seeded(&store, "g1", "a1");
            let read = store.get(&id).unwrap();
            let mut title = read.value.clone();
            title.title = "renamed".into();
            store.try_update(&id, read.version, title).unwrap();

            let b = alert("b1");
            let mut joined = read.value;
            joined.absorb(&b, &Embedding::new(vec![0.0, 1.0]));
            assert!(matches!(
                store.try_update_with_alert(&id, read.version, joined, &b).unwrap(),
                UpdateOutcome::Conflict { .. }
            ));
            assert!(store.get_alert(&AlertId::new("b1")).is_none());

            store
                .modify_with_alert(&id, &b, |g| {
                    g.absorb(&b, &Embedding::new(vec![0.0, 1.0]));
                    Ok(Mutation::Commit(()))
                })
                .unwrap();
            assert_eq!(store.group_of(&AlertId::new("b1")), Some(id));
            assert_eq!(store.alert_count(), 2);
        }

        #[test]
        fn update_refuses_dropping_members() {
            let store = MemoryGroupStore::new();
            let id = seeded(&store, "g1", "a1");
            let read = store.get(&id).unwrap();
            let mut emptied = read.value;
            emptied.members.clear();
            assert!(matches!(
                store.try_update(&id, read.version, emptied),
                Err(TriageError::InvalidAlert { .. })
            ));
        }

        #[test]
        fn skip_leaves_version_untouched() {
            let store = MemoryGroupStore::new();
            let id = seeded(&store, "g1", "a1");
            let out = store.modify(&id, |_| Ok(Mutation::Skip(7))).unwrap();
            assert_eq!(out, 7);
            assert_eq!(store.get(&id).unwrap().version, Version::INITIAL);
        }

        #[test]
        fn concurrent_modifications_are_not_lost() {
            let store = MemoryGroupStore::new();
            let id = seeded(&store, "g1", "seed");
            let alerts: Vec<Alert> = (0..32)
                .map(|i| store.put_alert(alert(&format!("a{i}"))).unwrap())
                .collect();

            thread::scope(|s| {
                for a in &alerts {
                    let store = &store;
                    let id = &id;
                    s.spawn(move || {
                        store
                            .modify(id, |g| {
                                g.absorb(a, &Embedding::new(vec![1.0, 0.0]));
                                Ok(Mutation::Commit(()))
                            })
                            .unwrap();
                    });
                }
            });

            let group = store.get(&id).unwrap().value;
            assert_eq!(group.member_count(), 33);
            for a in &alerts {
                assert_eq!(store.group_of(&a.id), Some(id.clone()));
            }
        }
    }

    mod list_tests {
        use super::*;

        #[test]
        fn list_orders_by_last_modified() {
            let store = MemoryGroupStore::new();
            let g1 = seeded(&store, "g1", "a1");
            let _g2 = seeded(&store, "g2", "a2");
            store
                .modify(&g1, |g| {
                    g.updated_at = Utc::now() + chrono::Duration::seconds(5);
                    Ok(Mutation::Commit(()))
                })
                .unwrap();

            let page = store.list(&GroupFilter::all());
            assert_eq!(page.total, 2);
            assert_eq!(page.groups[0].id, g1);
        }

        #[test]
        fn iter_groups_walks_all_pages() {
            let store = MemoryGroupStore::new();
            for i in 0..7 {
                seeded(&store, &format!("g{i}"), &format!("a{i}"));
            }
            let all: Vec<Group> = store.iter_groups(GroupFilter::all().with_limit(3)).collect();
            assert_eq!(all.len(), 7);
        }
    }

    mod merge_tests {
        use super::*;

        #[test]
        fn merge_moves_members_and_retires_sources() {
            let store = MemoryGroupStore::new();
            let target = seeded(&store, "g-target", "a1");
            let source = seeded(&store, "g-source", "b1");

            let merged = store.merge(&target, &[source.clone()]).unwrap();
            assert_eq!(merged.value.member_count(), 2);
            assert_eq!(merged.version, Version::new(2));

            let retired = store.get(&source).unwrap();
            assert!(retired.value.members.is_empty());
            assert_eq!(retired.value.status, GroupStatus::Resolved);
            assert_eq!(retired.value.merged_into, Some(target.clone()));
            assert_eq!(store.group_of(&AlertId::new("b1")), Some(target));
        }

        #[test]
        fn merge_missing_source_fails_without_changes() {
            let store = MemoryGroupStore::new();
            let target = seeded(&store, "g1", "a1");
            let err = store.merge(&target, &[GroupId::new("missing")]).unwrap_err();
            assert!(matches!(err, TriageError::GroupNotFound { .. }));
            assert_eq!(store.get(&target).unwrap().version, Version::INITIAL);
        }
    }
}
