//! Store trait definitions.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use triage_core::{Alert, AlertId, AlertStatus, Group, GroupId, Result, TriageError};

use crate::filter::{GroupFilter, GroupPage};

/// Monotonic version of a stored group. Every successful write bumps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Version assigned to a freshly created group.
    pub const INITIAL: Self = Self(1);

    /// Wraps a raw version number.
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    /// Returns the raw version number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the following version.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A value read together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    /// The value.
    pub value: T,
    /// Version of the value.
    pub version: Version,
}

/// Outcome of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The write was applied and produced this version.
    Applied(Version),
    /// Someone else wrote first; re-read and retry.
    Conflict {
        /// The version currently stored.
        current: Version,
    },
    /// A newly added member already belongs to another group.
    AlertClaimed {
        /// The contested alert.
        alert_id: AlertId,
        /// Its current owner.
        group_id: GroupId,
    },
}

/// The single synchronization point for group and alert state.
///
/// All mutation flows through versioned compare-and-update on one group at a
/// time, so unrelated groups can be written fully in parallel. The store also
/// owns every alert and the alert-to-group mapping; adding a member through
/// [`GroupStore::try_update`] or [`GroupStore::create_new`] claims the alert
/// atomically with the group write.
pub trait GroupStore: Send + Sync + fmt::Debug {
    /// Reads a group and its current version.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::GroupNotFound` if the group doesn't exist.
    fn get(&self, id: &GroupId) -> Result<Versioned<Group>>;

    /// Writes `group` if the stored version still equals `expected`.
    ///
    /// Members present in `group` but not in the stored copy are claimed for
    /// this group. Members may not be removed through this call.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::GroupNotFound` if the group doesn't exist,
    /// `TriageError::AlertNotFound` if a new member was never registered, or
    /// `TriageError::InvalidAlert` if the write would drop a member.
    fn try_update(&self, id: &GroupId, expected: Version, group: Group) -> Result<UpdateOutcome>;

    /// Inserts a new group, claiming all of its members.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::AlertAlreadyAssigned` if a member already belongs
    /// to a group, or `TriageError::InvalidAlert` if the ID is taken.
    fn create_new(&self, group: Group) -> Result<GroupId>;

    /// Like [`GroupStore::try_update`], but registers `incoming` in the same
    /// write when the update adds it as a member.
    ///
    /// Nothing about `incoming` is stored unless the update is applied. An
    /// already registered copy of the alert is kept as is.
    ///
    /// # Errors
    ///
    /// As [`GroupStore::try_update`], plus `TriageError::InvalidAlert` if
    /// `incoming` fails validation.
    fn try_update_with_alert(
        &self,
        id: &GroupId,
        expected: Version,
        group: Group,
        incoming: &Alert,
    ) -> Result<UpdateOutcome>;

    /// Like [`GroupStore::create_new`], but registers `incoming` together with
    /// the group. Nothing is stored if the group can't be created.
    ///
    /// # Errors
    ///
    /// As [`GroupStore::create_new`], plus `TriageError::InvalidAlert` if
    /// `incoming` fails validation.
    fn create_with_alert(&self, group: Group, incoming: &Alert) -> Result<GroupId>;

    /// Lists groups matching `filter`, newest modification first.
    fn list(&self, filter: &GroupFilter) -> GroupPage;

    /// Atomically moves every member of `sources` into `target`.
    ///
    /// Sources keep their history but lose their members, and are resolved
    /// and marked as merged into `target`. Every group involved gets a new
    /// version.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::GroupNotFound` if any group doesn't exist.
    fn merge(&self, target: &GroupId, sources: &[GroupId]) -> Result<Versioned<Group>>;

    /// Registers an alert. Re-registering an existing ID returns the stored copy.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::InvalidAlert` if the alert fails validation.
    fn put_alert(&self, alert: Alert) -> Result<Alert>;

    /// Reads an alert.
    fn get_alert(&self, id: &AlertId) -> Option<Alert>;

    /// Returns the group that owns `id`, if it has been assigned.
    fn group_of(&self, id: &AlertId) -> Option<GroupId>;

    /// Updates the status of an alert.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::AlertNotFound` if the alert doesn't exist.
    fn set_alert_status(&self, id: &AlertId, status: AlertStatus) -> Result<Alert>;

    /// Returns the member alerts of a group in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::GroupNotFound` if the group doesn't exist.
    fn alerts_of(&self, id: &GroupId) -> Result<Vec<Alert>>;

    /// Number of stored groups.
    fn group_count(&self) -> usize;
}

/// Decision returned by a [`GroupStoreExt::modify`] closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation<T> {
    /// Write the modified group and return the value.
    Commit(T),
    /// Leave the group untouched and return the value.
    Skip(T),
}

/// Read-modify-write helpers built on the conditional write primitive.
pub trait GroupStoreExt: GroupStore {
    /// Applies `f` to the latest copy of a group until the write lands.
    ///
    /// `f` may run several times under contention and must be free of side
    /// effects beyond the group it is handed.
    ///
    /// # Errors
    ///
    /// Propagates errors from `f` and from the store. A member claimed by
    /// another group surfaces as `TriageError::AlertAlreadyAssigned`.
    fn modify<T, F>(&self, id: &GroupId, f: F) -> Result<T>
    where
        F: FnMut(&mut Group) -> Result<Mutation<T>>,
    {
        retry_update(self, id, None, f)
    }

    /// Like [`GroupStoreExt::modify`], registering `incoming` in the write
    /// that makes it a member.
    ///
    /// # Errors
    ///
    /// As [`GroupStoreExt::modify`].
    fn modify_with_alert<T, F>(&self, id: &GroupId, incoming: &Alert, f: F) -> Result<T>
    where
        F: FnMut(&mut Group) -> Result<Mutation<T>>,
    {
        retry_update(self, id, Some(incoming), f)
    }

    /// Iterates every group matching `filter`, fetching one page at a time.
    ///
    /// Starts at `filter.offset` and uses `filter.limit` as the page size.
    fn iter_groups(&self, filter: GroupFilter) -> GroupIter<'_, Self> {
        GroupIter {
            store: self,
            filter,
            buffer: Vec::new().into_iter(),
            done: false,
        }
    }
}

impl<T: GroupStore + ?Sized> GroupStoreExt for T {}

fn retry_update<S, T, F>(store: &S, id: &GroupId, incoming: Option<&Alert>, mut f: F) -> Result<T>
where
    S: GroupStore + ?Sized,
    F: FnMut(&mut Group) -> Result<Mutation<T>>,
{
    loop {
        let current = store.get(id)?;
        let mut group = current.value;
        let out = match f(&mut group)? {
            Mutation::Skip(out) => return Ok(out),
            Mutation::Commit(out) => out,
        };
        let outcome = match incoming {
            Some(alert) => store.try_update_with_alert(id, current.version, group, alert)?,
            None => store.try_update(id, current.version, group)?,
        };
        match outcome {
            UpdateOutcome::Applied(_) => return Ok(out),
            UpdateOutcome::Conflict { current: latest } => {
                debug!(
                    group_id = %id,
                    expected = %current.version,
                    current = %latest,
                    "version conflict, retrying"
                );
            }
            UpdateOutcome::AlertClaimed { alert_id, group_id } => {
                return Err(TriageError::AlertAlreadyAssigned {
                    alert_id: alert_id.to_string(),
                    group_id: group_id.to_string(),
                });
            }
        }
    }
}

/// Lazy paginated iterator over groups, see [`GroupStoreExt::iter_groups`].
#[derive(Debug)]
pub struct GroupIter<'a, S: GroupStore + ?Sized> {
    store: &'a S,
    filter: GroupFilter,
    buffer: std::vec::IntoIter<Group>,
    done: bool,
}

impl<S: GroupStore + ?Sized> Iterator for GroupIter<'_, S> {
    type Item = Group;

    fn next(&mut self) -> Option<Group> {
        loop {
            if let Some(group) = self.buffer.next() {
                return Some(group);
            }
            if self.done {
                return None;
            }
            let page = self.store.list(&self.filter);
            match page.next_offset {
                Some(offset) => self.filter.offset = offset,
                None => self.done = true,
            }
            if page.groups.is_empty() {
                return None;
            }
            self.buffer = page.groups.into_iter();
        }
    }
}
