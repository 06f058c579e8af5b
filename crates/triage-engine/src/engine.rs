//! Alert-to-group assignment.
//!
//! For each alert the engine asks the similarity index for the nearest group
//! representatives, re-measures them against the stored groups and either
//! joins the closest eligible group or starts a new one. Membership changes go
//! through the store's versioned update, so concurrent assignments to the same
//! group never lose members.

use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use triage_core::{Alert, Embedding, Group, GroupId, Result, TriageError};
use triage_store::{GroupStore, GroupStoreExt, Mutation};

use crate::capabilities::SimilarityIndex;
use crate::config::GroupingConfig;

/// Distances closer than this are treated as equal.
pub const DISTANCE_EPSILON: f64 = 1e-9;

/// Where an alert ended up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// The owning group.
    pub group_id: GroupId,
    /// True if the alert started a new group.
    pub created: bool,
    /// True if the alert had already been assigned by an earlier call.
    pub already_assigned: bool,
    /// False if the index could not be refreshed with the new representative.
    pub index_synced: bool,
    /// Distance to the joined group's representative, if one was joined.
    pub distance: Option<f64>,
}

/// A group considered for an alert.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// The group.
    pub group_id: GroupId,
    /// Distance from the alert to the group's current representative.
    pub distance: f64,
    /// Last modification of the group.
    pub updated_at: DateTime<Utc>,
}

impl Candidate {
    /// Orders by ascending distance, then most recently modified first.
    fn rank(&self, other: &Self) -> Ordering {
        if (self.distance - other.distance).abs() <= DISTANCE_EPSILON {
            other
                .updated_at
                .cmp(&self.updated_at)
                .then_with(|| self.group_id.cmp(&other.group_id))
        } else {
            self.distance.total_cmp(&other.distance)
        }
    }
}

/// Sorts candidates best first.
pub fn rank_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(Candidate::rank);
}

enum Join {
    Joined(Embedding),
    AlreadyMember,
    Rejected(&'static str),
}

/// Assigns alerts to groups.
#[derive(Debug, Clone)]
pub struct GroupingEngine {
    store: Arc<dyn GroupStore>,
    index: Arc<dyn SimilarityIndex>,
    config: GroupingConfig,
    index_timeout: Duration,
}

impl GroupingEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn GroupStore>,
        index: Arc<dyn SimilarityIndex>,
        config: GroupingConfig,
        index_timeout: Duration,
    ) -> Self {
        Self {
            store,
            index,
            config,
            index_timeout,
        }
    }

    /// The grouping settings.
    #[must_use]
    pub const fn config(&self) -> &GroupingConfig {
        &self.config
    }

    /// Assigns `alert`, which must carry an embedding.
    ///
    /// Re-assigning an alert ID that already belongs to a group returns that
    /// group and re-publishes its representative to the index.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::InvalidAlert` for a malformed alert or missing
    /// embedding, `TriageError::EmbeddingDimensionMismatch` if the embedding
    /// doesn't fit the index, and `TriageError::IndexUnavailable` if the index
    /// can't be queried or written. The alert is registered in the same store
    /// write that makes it a member, so nothing is stored on error.
    pub async fn assign(&self, mut alert: Alert) -> Result<Assignment> {
        alert.validate()?;
        let embedding = alert
            .embedding
            .clone()
            .ok_or_else(|| TriageError::InvalidAlert {
                reason: format!("alert {} has no embedding", alert.id),
            })?;
        embedding.check(self.index.dimension())?;

        if let Some(group_id) = self.store.group_of(&alert.id) {
            return self.reassigned(group_id).await;
        }

        let neighbors = self
            .with_timeout("query", self.index.query(&embedding, self.config.candidate_limit))
            .await?;
        let mut candidates = self.candidates(&embedding, neighbors.iter().map(|n| &n.group_id));
        rank_candidates(&mut candidates);

        alert.embedding = Some(embedding.clone());

        let max_distance = self.config.max_distance() + DISTANCE_EPSILON;
        for candidate in candidates.iter().take_while(|c| c.distance <= max_distance) {
            match self.try_join(candidate, &alert, &embedding) {
                Ok(Join::Joined(representative)) => {
                    info!(
                        alert_id = %alert.id,
                        group_id = %candidate.group_id,
                        distance = candidate.distance,
                        "alert joined group"
                    );
                    let index_synced = self.publish(&candidate.group_id, &representative).await;
                    return Ok(Assignment {
                        group_id: candidate.group_id.clone(),
                        created: false,
                        already_assigned: false,
                        index_synced,
                        distance: Some(candidate.distance),
                    });
                }
                Ok(Join::AlreadyMember) => {
                    return self.reassigned(candidate.group_id.clone()).await;
                }
                Ok(Join::Rejected(reason)) => {
                    debug!(
                        alert_id = %alert.id,
                        group_id = %candidate.group_id,
                        reason,
                        "candidate rejected"
                    );
                }
                Err(TriageError::AlertAlreadyAssigned { group_id, .. }) => {
                    return self.reassigned(GroupId::new(group_id)).await;
                }
                Err(TriageError::GroupNotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        }

        self.create_group(&alert, &embedding).await
    }

    /// Measures the alert against each listed group's stored representative,
    /// keeping only groups that may accept members.
    fn candidates<'a>(
        &self,
        embedding: &Embedding,
        ids: impl Iterator<Item = &'a GroupId>,
    ) -> Vec<Candidate> {
        ids.filter_map(|id| match self.store.get(id) {
            Ok(read) => Some(read.value),
            Err(err) => {
                debug!(group_id = %id, error = %err, "indexed group not in store");
                None
            }
        })
        .filter(|group| self.accepts_members(group))
        .map(|group| Candidate {
            distance: embedding.distance_to(&group.representative).unwrap_or(1.0),
            group_id: group.id,
            updated_at: group.updated_at,
        })
        .collect()
    }

    fn accepts_members(&self, group: &Group) -> bool {
        if group.merged_into.is_some() {
            return false;
        }
        if !group.is_open() && !self.config.include_resolved {
            return false;
        }
        group.member_count() < self.config.max_group_size
    }

    fn try_join(
        &self,
        candidate: &Candidate,
        alert: &Alert,
        embedding: &Embedding,
    ) -> Result<Join> {
        self.store.modify_with_alert(&candidate.group_id, alert, |group| {
            if group.contains(&alert.id) {
                return Ok(Mutation::Skip(Join::AlreadyMember));
            }
            if group.merged_into.is_some() {
                return Ok(Mutation::Skip(Join::Rejected("merged")));
            }
            if !group.is_open() && !self.config.include_resolved {
                return Ok(Mutation::Skip(Join::Rejected("resolved")));
            }
            if group.member_count() >= self.config.max_group_size {
                return Ok(Mutation::Skip(Join::Rejected("full")));
            }
            group.absorb(alert, embedding);
            Ok(Mutation::Commit(Join::Joined(group.representative.clone())))
        })
    }

    async fn create_group(&self, alert: &Alert, embedding: &Embedding) -> Result<Assignment> {
        let group = Group::seed(GroupId::generate(), alert, embedding);
        let group_id = group.id.clone();

        // Index first: a failure here leaves no trace in the store.
        self.with_timeout("upsert", self.index.upsert(&group_id, &group.representative))
            .await?;

        match self.store.create_with_alert(group, alert) {
            Ok(group_id) => {
                info!(alert_id = %alert.id, group_id = %group_id, "new group created");
                Ok(Assignment {
                    group_id,
                    created: true,
                    already_assigned: false,
                    index_synced: true,
                    distance: None,
                })
            }
            Err(TriageError::AlertAlreadyAssigned { group_id: owner, .. }) => {
                self.retract(&group_id).await;
                self.reassigned(GroupId::new(owner)).await
            }
            Err(err) => {
                self.retract(&group_id).await;
                Err(err)
            }
        }
    }

    /// Drops a representative that no stored group backs.
    pub(crate) async fn retract(&self, group_id: &GroupId) {
        if let Err(err) = self
            .with_timeout("remove", self.index.remove(group_id))
            .await
        {
            warn!(group_id = %group_id, error = %err, "stale index entry left behind");
        }
    }

    async fn reassigned(&self, group_id: GroupId) -> Result<Assignment> {
        let group = self.store.get(&group_id)?.value;
        debug!(group_id = %group_id, "alert already assigned");
        let index_synced = self.publish(&group_id, &group.representative).await;
        Ok(Assignment {
            group_id,
            created: false,
            already_assigned: true,
            index_synced,
            distance: None,
        })
    }

    /// Pushes a representative to the index. Failures are logged, not returned.
    pub(crate) async fn publish(&self, group_id: &GroupId, representative: &Embedding) -> bool {
        match self
            .with_timeout("upsert", self.index.upsert(group_id, representative))
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(group_id = %group_id, error = %err, "index out of date for group");
                false
            }
        }
    }

    async fn with_timeout<T>(
        &self,
        op: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.index_timeout, fut)
            .await
            .unwrap_or_else(|_| {
                Err(TriageError::IndexUnavailable {
                    reason: format!(
                        "{op} timed out after {}ms",
                        self.index_timeout.as_millis()
                    ),
                })
            })
    }
}
