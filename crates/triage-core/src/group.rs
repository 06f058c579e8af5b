//! Alert groups and their root-cause-analysis state.
//!
//! A [`Group`] is a cluster of alerts believed to share a root cause. Its
//! representative vector and aggregates are derived from the members and are
//! recomputed on every membership change; the member list is the only source
//! of truth for membership.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TriageError};
use crate::types::{Alert, AlertId, GroupId, Severity};
use crate::vector::{absorb_into_mean, weighted_mean, Embedding};

const MAX_TITLE_CHARS: usize = 60;
const MAX_DESCRIPTION_CHARS: usize = 200;

/// Status of a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    /// Still collecting alerts.
    #[default]
    Open,
    /// Closed for audit; never receives new members.
    Resolved,
}

impl GroupStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Priority of a group, derived from the most severe member.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum GroupPriority {
    /// Low and informational alerts only.
    Low,
    /// At least one medium alert.
    #[default]
    Medium,
    /// At least one high alert.
    High,
    /// At least one critical alert.
    Critical,
}

impl GroupPriority {
    /// Returns the priority as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl From<Severity> for GroupPriority {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Critical => Self::Critical,
            Severity::High => Self::High,
            Severity::Medium => Self::Medium,
            Severity::Low | Severity::Info => Self::Low,
        }
    }
}

impl fmt::Display for GroupPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Root-cause-analysis state of a group.
///
/// ```text
/// None -> Pending -> Ready -> Stale -> Pending
///            \-> Failed -> Pending
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RcaState {
    /// No analysis requested yet.
    #[default]
    None,
    /// Analysis requested or in flight.
    Pending,
    /// Analysis reflects the membership it was generated for.
    Ready,
    /// Membership changed after the analysis was generated.
    Stale,
    /// Generation failed.
    Failed,
}

impl RcaState {
    /// Returns the state as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Stale => "stale",
            Self::Failed => "failed",
        }
    }

    /// Returns true if `next` is a legal successor of this state.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::None, Self::Pending)
                | (Self::Pending, Self::Ready)
                | (Self::Pending, Self::Failed)
                | (Self::Ready, Self::Stale)
                | (Self::Stale, Self::Pending)
                | (Self::Failed, Self::Pending)
        )
    }
}

impl fmt::Display for RcaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A generated root cause analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RcaReport {
    /// Narrative analysis text.
    pub narrative: String,
    /// Confidence in `[0, 1]`, if the generator reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// When the analysis was produced.
    pub generated_at: DateTime<Utc>,
}

impl RcaReport {
    /// Creates a report generated now.
    #[must_use]
    pub fn new(narrative: impl Into<String>) -> Self {
        Self {
            narrative: narrative.into(),
            confidence: None,
            generated_at: Utc::now(),
        }
    }

    /// Sets the confidence, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }
}

/// The per-group generation lock.
///
/// At most one lease exists per group. It records the membership epoch the
/// generation started from so completion can detect changes made meanwhile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationLease {
    /// Lease identifier; only the holder may release it.
    pub id: Uuid,
    /// Membership epoch at acquisition.
    pub epoch: u64,
    /// When the lease was taken.
    pub started_at: DateTime<Utc>,
}

impl GenerationLease {
    /// Creates a lease for the given epoch.
    #[must_use]
    pub fn new(epoch: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            started_at: Utc::now(),
        }
    }
}

/// RCA bookkeeping carried on each group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RcaTracker {
    /// Current state.
    pub state: RcaState,
    /// Latest successful analysis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<RcaReport>,
    /// Membership epoch `report` was generated from.
    #[serde(default)]
    pub report_epoch: u64,
    /// Consecutive failed generations since the last success or manual reset.
    #[serde(default)]
    pub attempts: u32,
    /// Message of the most recent failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// In-flight generation, if any. Never persisted.
    #[serde(skip)]
    pub lease: Option<GenerationLease>,
}

impl RcaTracker {
    /// Moves to `next`, rejecting transitions outside the state machine.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::InvalidTransition` for an illegal transition.
    pub fn transition(&mut self, next: RcaState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(TriageError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Returns true while a generation holds the lease.
    #[must_use]
    pub const fn in_flight(&self) -> bool {
        self.lease.is_some()
    }

    /// Returns true if `lease_id` is the lease currently held.
    #[must_use]
    pub fn holds(&self, lease_id: Uuid) -> bool {
        self.lease.as_ref().is_some_and(|l| l.id == lease_id)
    }
}

/// A cluster of alerts believed to share a root cause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Unique identifier.
    pub id: GroupId,
    /// Display title.
    pub title: String,
    /// Display description.
    pub description: String,
    /// Member alerts in insertion order.
    pub members: Vec<AlertId>,
    /// Arithmetic mean of the member embeddings.
    pub representative: Embedding,
    /// Open or resolved.
    pub status: GroupStatus,
    /// Priority derived from the most severe member.
    pub priority: GroupPriority,
    /// When the group was created.
    pub created_at: DateTime<Utc>,
    /// Last modification of any kind.
    pub updated_at: DateTime<Utc>,
    /// When the group was resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Notes recorded on resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_notes: Option<String>,
    /// Group this one was merged into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<GroupId>,
    /// Most severe member severity.
    pub max_severity: Severity,
    /// Member count per severity.
    pub severity_distribution: BTreeMap<Severity, usize>,
    /// Earliest member timestamp.
    pub first_alert_at: DateTime<Utc>,
    /// Latest member timestamp.
    pub last_alert_at: DateTime<Utc>,
    /// Services seen across members.
    pub affected_services: Vec<String>,
    /// Hosts seen across members.
    pub affected_hosts: Vec<String>,
    /// Environments seen across members.
    pub affected_environments: Vec<String>,
    /// Union of member tags.
    pub tags: BTreeSet<String>,
    /// RCA state and content.
    pub rca: RcaTracker,
    /// Bumped on every membership change.
    pub membership_epoch: u64,
}

impl Group {
    /// Starts a new open group whose sole member is `alert`.
    #[must_use]
    pub fn seed(id: GroupId, alert: &Alert, embedding: &Embedding) -> Self {
        let now = Utc::now();
        let mut group = Self {
            id,
            title: truncate_chars(&format!("Alert Group - {}", alert.title), MAX_TITLE_CHARS),
            description: truncate_chars(
                &format!("Group containing alerts similar to: {}", alert.title),
                MAX_DESCRIPTION_CHARS,
            ),
            members: Vec::new(),
            representative: Embedding::default(),
            status: GroupStatus::Open,
            priority: GroupPriority::from(alert.severity),
            created_at: now,
            updated_at: now,
            resolved_at: None,
            resolution_notes: None,
            merged_into: None,
            max_severity: alert.severity,
            severity_distribution: BTreeMap::new(),
            first_alert_at: alert.created_at,
            last_alert_at: alert.created_at,
            affected_services: Vec::new(),
            affected_hosts: Vec::new(),
            affected_environments: Vec::new(),
            tags: BTreeSet::new(),
            rca: RcaTracker::default(),
            membership_epoch: 0,
        };
        group.absorb(alert, embedding);
        group
    }

    /// Number of member alerts.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Returns true if the group still accepts members.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == GroupStatus::Open
    }

    /// Returns true if `alert_id` is a member.
    #[must_use]
    pub fn contains(&self, alert_id: &AlertId) -> bool {
        self.members.contains(alert_id)
    }

    /// Incident duration in minutes, from the first to the last member.
    #[must_use]
    pub fn duration_minutes(&self) -> f64 {
        (self.last_alert_at - self.first_alert_at).num_seconds() as f64 / 60.0
    }

    /// Appends a member, folding its embedding into the running centroid
    /// and refreshing every aggregate. Already-present alerts are ignored.
    pub fn absorb(&mut self, alert: &Alert, embedding: &Embedding) {
        if self.contains(&alert.id) {
            return;
        }

        let mut centroid = std::mem::take(&mut self.representative).into_inner();
        absorb_into_mean(&mut centroid, self.members.len(), embedding.as_slice());
        self.representative = Embedding::new(centroid);
        self.members.push(alert.id.clone());

        if alert.severity > self.max_severity || self.members.len() == 1 {
            self.max_severity = alert.severity;
        }
        self.priority = GroupPriority::from(self.max_severity);
        *self.severity_distribution.entry(alert.severity).or_insert(0) += 1;

        if alert.created_at < self.first_alert_at {
            self.first_alert_at = alert.created_at;
        }
        if alert.created_at > self.last_alert_at {
            self.last_alert_at = alert.created_at;
        }

        push_unique(&mut self.affected_services, alert.service_name.as_deref());
        push_unique(&mut self.affected_hosts, alert.host_name.as_deref());
        push_unique(&mut self.affected_environments, alert.environment.as_deref());
        self.tags.extend(alert.tags.iter().cloned());

        self.membership_epoch += 1;
        self.updated_at = Utc::now();
    }

    /// Moves every member of `source` into this group.
    ///
    /// The representative becomes the member-count weighted mean of both
    /// centroids. `source` itself is left untouched; the caller retires it.
    pub fn absorb_group(&mut self, source: &Self) {
        let incoming: Vec<&AlertId> = source
            .members
            .iter()
            .filter(|id| !self.contains(id))
            .collect();
        if incoming.is_empty() {
            return;
        }

        let merged = weighted_mean(
            self.representative.as_slice(),
            self.members.len(),
            source.representative.as_slice(),
            incoming.len(),
        );
        self.representative = Embedding::new(merged);
        self.members.extend(incoming.into_iter().cloned());

        self.max_severity = self.max_severity.max(source.max_severity);
        self.priority = GroupPriority::from(self.max_severity);
        for (severity, count) in &source.severity_distribution {
            *self.severity_distribution.entry(*severity).or_insert(0) += count;
        }
        self.first_alert_at = self.first_alert_at.min(source.first_alert_at);
        self.last_alert_at = self.last_alert_at.max(source.last_alert_at);
        for service in &source.affected_services {
            push_unique(&mut self.affected_services, Some(service));
        }
        for host in &source.affected_hosts {
            push_unique(&mut self.affected_hosts, Some(host));
        }
        for env in &source.affected_environments {
            push_unique(&mut self.affected_environments, Some(env));
        }
        self.tags.extend(source.tags.iter().cloned());

        self.membership_epoch += 1;
        self.updated_at = Utc::now();
    }

    /// Marks the group resolved. Resolving twice keeps the first timestamp.
    pub fn resolve(&mut self, notes: Option<String>) {
        let now = Utc::now();
        if self.status != GroupStatus::Resolved {
            self.status = GroupStatus::Resolved;
            self.resolved_at = Some(now);
        }
        if notes.is_some() {
            self.resolution_notes = notes;
        }
        self.updated_at = now;
    }
}

fn push_unique(values: &mut Vec<String>, value: Option<&str>) {
    if let Some(v) = value {
        if !v.is_empty() && !values.iter().any(|existing| existing == v) {
            values.push(v.to_string());
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use test_case::test_case;

    fn alert(id: &str, severity: Severity) -> Alert {
        Alert::new(id, format!("alert {id}"), severity, "Prometheus")
    }

    mod rca_state_tests {
        use super::*;
        use test_case::test_case;

        #[test_case(RcaState::None, RcaState::Pending, true ; "none to pending")]
        #[test_case(RcaState::None, RcaState::Ready, false ; "none cannot skip to ready")]
        #[test_case(RcaState::Pending, RcaState::Ready, true ; "pending to ready")]
        #[test_case(RcaState::Pending, RcaState::Failed, true ; "pending to failed")]
        #[test_case(RcaState::Ready, RcaState::Stale, true ; "ready to stale")]
        #[test_case(RcaState::Ready, RcaState::Pending, false ; "ready must go stale first")]
        #[test_case(RcaState::Stale, RcaState::Pending, true ; "stale retrigger")]
        #[test_case(RcaState::Failed, RcaState::Pending, true ; "failed retry")]
        #[test_case(RcaState::Failed, RcaState::Ready, false ; "failed cannot jump to ready")]
        #[test_case(RcaState::Pending, RcaState::None, false ; "no way back to none")]
        fn transitions(from: RcaState, to: RcaState, allowed: bool) {
            assert_eq!(from.can_transition_to(to), allowed);
        }

        #[test]
        fn tracker_rejects_illegal_transition() {
            let mut tracker = RcaTracker::default();
            let err = tracker.transition(RcaState::Ready).unwrap_err();
            assert_eq!(
                err,
                TriageError::InvalidTransition {
                    from: "none".into(),
                    to: "ready".into()
                }
            );
            assert_eq!(tracker.state, RcaState::None);
        }

        #[test]
        fn lease_is_not_serialized() {
            let tracker = RcaTracker {
                state: RcaState::Pending,
                lease: Some(GenerationLease::new(3)),
                ..Default::default()
            };
            let json = serde_json::to_string(&tracker).unwrap();
            let back: RcaTracker = serde_json::from_str(&json).unwrap();
            assert_eq!(back.state, RcaState::Pending);
            assert!(back.lease.is_none());
        }
    }

    mod membership_tests {
        use super::*;

        #[test]
        fn seed_creates_single_member_group() {
            let a = alert("a-1", Severity::High).with_service("web");
            let group = Group::seed(GroupId::new("g"), &a, &Embedding::new(vec![1.0, 0.0]));

            assert_eq!(group.member_count(), 1);
            assert_eq!(group.representative.as_slice(), &[1.0, 0.0]);
            assert_eq!(group.priority, GroupPriority::High);
            assert_eq!(group.affected_services, vec!["web".to_string()]);
            assert_eq!(group.membership_epoch, 1);
            assert_eq!(group.title, "Alert Group - alert a-1");
            assert_eq!(group.rca.state, RcaState::None);
        }

        #[test]
        fn seed_truncates_long_titles() {
            let a = Alert::new("a", "x".repeat(200), Severity::Low, "Zabbix");
            let group = Group::seed(GroupId::new("g"), &a, &Embedding::new(vec![1.0]));
            assert_eq!(group.title.chars().count(), 60);
            assert_eq!(group.description.chars().count(), 200);
        }

        #[test]
        fn absorb_updates_centroid_and_aggregates() {
            let base = Utc::now();
            let a = alert("a-1", Severity::Low).at(base).with_host("h1");
            let b = alert("b-1", Severity::Critical)
                .at(base + Duration::minutes(10))
                .with_host("h2")
                .with_tag("disk");

            let mut group = Group::seed(GroupId::new("g"), &a, &Embedding::new(vec![1.0, 0.0]));
            group.absorb(&b, &Embedding::new(vec![0.0, 1.0]));

            assert_eq!(group.member_count(), 2);
            assert_eq!(group.representative.as_slice(), &[0.5, 0.5]);
            assert_eq!(group.max_severity, Severity::Critical);
            assert_eq!(group.priority, GroupPriority::Critical);
            assert_eq!(group.severity_distribution.get(&Severity::Low), Some(&1));
            assert_eq!(group.affected_hosts, vec!["h1".to_string(), "h2".to_string()]);
            assert!(group.tags.contains("disk"));
            assert!((group.duration_minutes() - 10.0).abs() < 1e-9);
            assert_eq!(group.membership_epoch, 2);
        }

        #[test]
        fn absorb_ignores_existing_member() {
            let a = alert("a-1", Severity::Low);
            let mut group = Group::seed(GroupId::new("g"), &a, &Embedding::new(vec![1.0, 0.0]));
            group.absorb(&a, &Embedding::new(vec![0.0, 1.0]));
            assert_eq!(group.member_count(), 1);
            assert_eq!(group.membership_epoch, 1);
        }

        #[test]
        fn absorb_group_weights_centroids_by_member_count() {
            let mut target = Group::seed(
                GroupId::new("t"),
                &alert("a", Severity::Low),
                &Embedding::new(vec![0.0, 0.0]),
            );
            target.absorb(&alert("b", Severity::Low), &Embedding::new(vec![0.0, 0.0]));
            target.absorb(&alert("c", Severity::Low), &Embedding::new(vec![0.0, 0.0]));
            let source = Group::seed(
                GroupId::new("s"),
                &alert("d", Severity::High).with_service("db"),
                &Embedding::new(vec![4.0, 8.0]),
            );

            target.absorb_group(&source);

            assert_eq!(target.member_count(), 4);
            assert_eq!(target.representative.as_slice(), &[1.0, 2.0]);
            assert_eq!(target.max_severity, Severity::High);
            assert_eq!(target.affected_services, vec!["db".to_string()]);
        }

        #[test]
        fn resolve_keeps_first_timestamp() {
            let mut group = Group::seed(
                GroupId::new("g"),
                &alert("a", Severity::Low),
                &Embedding::new(vec![1.0]),
            );
            group.resolve(None);
            let first = group.resolved_at;
            group.resolve(Some("fixed the disk".into()));
            assert_eq!(group.resolved_at, first);
            assert_eq!(group.status, GroupStatus::Resolved);
            assert_eq!(group.resolution_notes.as_deref(), Some("fixed the disk"));
        }
    }

    #[test_case(Severity::Critical, GroupPriority::Critical)]
    #[test_case(Severity::High, GroupPriority::High)]
    #[test_case(Severity::Medium, GroupPriority::Medium)]
    #[test_case(Severity::Low, GroupPriority::Low)]
    #[test_case(Severity::Info, GroupPriority::Low)]
    fn priority_from_severity(severity: Severity, expected: GroupPriority) {
        assert_eq!(GroupPriority::from(severity), expected);
    }
}
