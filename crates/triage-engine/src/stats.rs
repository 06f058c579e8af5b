//! Aggregate statistics over all groups.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use triage_core::{Group, GroupPriority, GroupStatus, RcaState};

/// Counts and averages across the group population.
///
/// Groups that were merged into another group are only counted in
/// `merged_groups`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupStatistics {
    /// Groups that still own alerts.
    pub total_groups: usize,
    /// Open groups.
    pub open_groups: usize,
    /// Resolved groups.
    pub resolved_groups: usize,
    /// Groups retired by a merge.
    pub merged_groups: usize,
    /// Alerts across all groups.
    pub total_alerts: usize,
    /// Groups whose RCA is Ready.
    pub rca_ready: usize,
    /// Group count per priority.
    pub by_priority: BTreeMap<GroupPriority, usize>,
    /// Group count per RCA state name.
    pub by_rca_state: BTreeMap<String, usize>,
    /// Mean hours from creation to resolution, if any group was resolved.
    pub mean_resolution_hours: Option<f64>,
}

impl GroupStatistics {
    /// Accumulates statistics from `groups`.
    pub fn collect(groups: impl IntoIterator<Item = Group>) -> Self {
        let mut stats = Self::default();
        let mut resolution_secs = 0i64;
        let mut resolved_with_time = 0u32;

        for group in groups {
            if group.merged_into.is_some() {
                stats.merged_groups += 1;
                continue;
            }
            stats.total_groups += 1;
            stats.total_alerts += group.member_count();
            match group.status {
                GroupStatus::Open => stats.open_groups += 1,
                GroupStatus::Resolved => stats.resolved_groups += 1,
            }
            if group.rca.state == RcaState::Ready {
                stats.rca_ready += 1;
            }
            *stats.by_priority.entry(group.priority).or_insert(0) += 1;
            *stats
                .by_rca_state
                .entry(group.rca.state.as_str().to_string())
                .or_insert(0) += 1;
            if let Some(resolved_at) = group.resolved_at {
                resolution_secs += (resolved_at - group.created_at).num_seconds().max(0);
                resolved_with_time += 1;
            }
        }

        if resolved_with_time > 0 {
            stats.mean_resolution_hours =
                Some(resolution_secs as f64 / 3600.0 / f64::from(resolved_with_time));
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use triage_core::{Alert, Embedding, GroupId, Severity};

    fn group(id: &str, severity: Severity) -> Group {
        let alert = Alert::new(id, "t", severity, "Grafana");
        Group::seed(GroupId::new(id), &alert, &Embedding::new(vec![1.0]))
    }

    #[test]
    fn empty_population() {
        let stats = GroupStatistics::collect(Vec::new());
        assert_eq!(stats.total_groups, 0);
        assert_eq!(stats.mean_resolution_hours, None);
    }

    #[test]
    fn counts_and_resolution_time() {
        let open = group("a", Severity::Critical);
        let mut ready = group("b", Severity::High);
        ready.rca.state = RcaState::Ready;
        let mut resolved = group("c", Severity::Info);
        resolved.resolve(None);
        resolved.resolved_at = Some(resolved.created_at + Duration::hours(3));
        let mut merged = group("d", Severity::Low);
        merged.members.clear();
        merged.merged_into = Some(GroupId::new("a"));
        merged.resolve(None);

        let stats = GroupStatistics::collect(vec![open, ready, resolved, merged]);

        assert_eq!(stats.total_groups, 3);
        assert_eq!(stats.open_groups, 2);
        assert_eq!(stats.resolved_groups, 1);
        assert_eq!(stats.merged_groups, 1);
        assert_eq!(stats.total_alerts, 3);
        assert_eq!(stats.rca_ready, 1);
        assert_eq!(stats.by_priority.get(&GroupPriority::Critical), Some(&1));
        assert_eq!(stats.by_priority.get(&GroupPriority::Low), Some(&1));
        assert_eq!(stats.by_rca_state.get("none"), Some(&2));
        let hours = stats.mean_resolution_hours.expect("resolution time");
        assert!((hours - 3.0).abs() < 1e-9);
    }
}
