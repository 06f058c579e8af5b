//! Group listing filters and pagination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use triage_core::{Group, GroupPriority, GroupStatus, RcaState};

/// Default page size for group listings.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Criteria for listing groups. All set criteria must match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupFilter {
    /// Filter by status.
    pub status: Option<GroupStatus>,
    /// Filter by priority.
    pub priority: Option<GroupPriority>,
    /// Filter by RCA state.
    pub rca_state: Option<RcaState>,
    /// Only groups affecting this service.
    pub service: Option<String>,
    /// Only groups affecting this environment.
    pub environment: Option<String>,
    /// Only groups carrying this tag.
    pub tag: Option<String>,
    /// Only groups created at or after this instant.
    pub created_after: Option<DateTime<Utc>>,
    /// Only groups created before this instant.
    pub created_before: Option<DateTime<Utc>>,
    /// Number of matching groups to skip.
    pub offset: usize,
    /// Page size.
    pub limit: usize,
}

impl Default for GroupFilter {
    fn default() -> Self {
        Self {
            status: None,
            priority: None,
            rca_state: None,
            service: None,
            environment: None,
            tag: None,
            created_after: None,
            created_before: None,
            offset: 0,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl GroupFilter {
    /// Matches every group, first page.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches open groups only.
    #[must_use]
    pub fn open() -> Self {
        Self {
            status: Some(GroupStatus::Open),
            ..Default::default()
        }
    }

    /// Filter by status.
    #[must_use]
    pub const fn with_status(mut self, status: GroupStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filter by priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: GroupPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Filter by RCA state.
    #[must_use]
    pub const fn with_rca_state(mut self, state: RcaState) -> Self {
        self.rca_state = Some(state);
        self
    }

    /// Filter by affected service.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Filter by affected environment.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Filter by tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Skip the first `offset` matches.
    #[must_use]
    pub const fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Page size; zero is treated as one.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = if limit == 0 { 1 } else { limit };
        self
    }

    /// Returns true if `group` satisfies every criterion.
    #[must_use]
    pub fn matches(&self, group: &Group) -> bool {
        if self.status.is_some_and(|s| s != group.status) {
            return false;
        }
        if self.priority.is_some_and(|p| p != group.priority) {
            return false;
        }
        if self.rca_state.is_some_and(|r| r != group.rca.state) {
            return false;
        }
        if let Some(service) = &self.service {
            if !group.affected_services.iter().any(|s| s == service) {
                return false;
            }
        }
        if let Some(env) = &self.environment {
            if !group.affected_environments.iter().any(|e| e == env) {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !group.tags.contains(tag) {
                return false;
            }
        }
        if self.created_after.is_some_and(|t| group.created_at < t) {
            return false;
        }
        if self.created_before.is_some_and(|t| group.created_at >= t) {
            return false;
        }
        true
    }

    /// Cuts one page out of the matching groups, which must already be sorted.
    #[must_use]
    pub fn paginate(&self, matching: Vec<Group>) -> GroupPage {
        let total = matching.len();
        let limit = self.limit.max(1);
        let groups: Vec<Group> = matching.into_iter().skip(self.offset).take(limit).collect();
        let end = self.offset.saturating_add(groups.len());
        let next_offset = (end < total).then_some(end);
        GroupPage {
            groups,
            total,
            next_offset,
        }
    }
}

/// One page of a group listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPage {
    /// Groups on this page.
    pub groups: Vec<Group>,
    /// Number of groups matching the filter across all pages.
    pub total: usize,
    /// Offset of the next page, if there is one.
    pub next_offset: Option<usize>,
}
