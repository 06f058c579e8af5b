//! The triage service facade.
//!
//! [`TriageService`] wires the embedder, the grouping engine and the RCA
//! coordinator around one shared store and exposes the operations an API
//! layer or the CLI needs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};
use triage_core::{Alert, AlertId, AlertStatus, Embedding, Group, GroupId, Result, TriageError};
use triage_store::{GroupFilter, GroupPage, GroupStore, GroupStoreExt, Mutation};

use crate::builtin::{FlatIndex, HashingEmbedder, TemplateRcaGenerator};
use crate::capabilities::{EmbeddingProvider, RcaGenerator, SimilarityIndex};
use crate::config::TriageConfig;
use crate::engine::{Assignment, GroupingEngine};
use crate::rca::{RcaCoordinator, RcaTransition, RcaTrigger};
use crate::stats::GroupStatistics;

/// Outcome of ingesting one alert.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    /// Where the alert went.
    pub assignment: Assignment,
    /// What the RCA coordinator did about it.
    pub rca: RcaTrigger,
}

/// Alerts and groups touched by a batch ingest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Alerts assigned, including repeats.
    pub ingested: usize,
    /// Groups created by the batch.
    pub groups_created: usize,
    /// Alerts that failed, with the reason.
    pub failed: Vec<(AlertId, String)>,
}

/// Alert grouping and RCA coordination over a shared store.
#[derive(Debug, Clone)]
pub struct TriageService {
    store: Arc<dyn GroupStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    engine: GroupingEngine,
    coordinator: RcaCoordinator,
    config: TriageConfig,
}

impl TriageService {
    /// Builds a service from explicit capabilities.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::InvalidConfig` if `config` is invalid and
    /// `TriageError::EmbeddingDimensionMismatch` if the embedder and index
    /// disagree on dimension.
    pub fn new(
        config: TriageConfig,
        store: Arc<dyn GroupStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn SimilarityIndex>,
        generator: Arc<dyn RcaGenerator>,
    ) -> Result<Self> {
        config.validate()?;
        if embedder.dimension() != index.dimension() {
            return Err(TriageError::EmbeddingDimensionMismatch {
                expected: index.dimension(),
                actual: embedder.dimension(),
            });
        }

        let engine = GroupingEngine::new(
            Arc::clone(&store),
            index,
            config.grouping.clone(),
            config.timeouts.index(),
        );
        let coordinator = RcaCoordinator::new(Arc::clone(&store), generator, config.rca.clone());
        info!(
            dimension = embedder.dimension(),
            threshold = config.grouping.similarity_threshold,
            groups = store.group_count(),
            "triage service ready"
        );
        Ok(Self {
            store,
            embedder,
            engine,
            coordinator,
            config,
        })
    }

    /// Builds a service on the built-in offline capabilities.
    ///
    /// Existing groups in `store` are published to the fresh index.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::InvalidConfig` if `config` is invalid.
    pub async fn offline(config: TriageConfig, store: Arc<dyn GroupStore>) -> Result<Self> {
        let dimension = config.embedding.dimension;
        let service = Self::new(
            config,
            store,
            Arc::new(HashingEmbedder::new(dimension)),
            Arc::new(FlatIndex::new(dimension)),
            Arc::new(TemplateRcaGenerator::new()),
        )?;
        service.reindex().await;
        Ok(service)
    }

    /// Publishes every open group's representative to the index.
    ///
    /// Returns the number of groups that could not be published.
    pub async fn reindex(&self) -> usize {
        let mut failed = 0;
        let groups: Vec<Group> = self
            .store
            .iter_groups(GroupFilter::open().with_limit(100))
            .collect();
        for group in groups {
            if group.members.is_empty() {
                continue;
            }
            if !self.engine.publish(&group.id, &group.representative).await {
                failed += 1;
            }
        }
        failed
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &TriageConfig {
        &self.config
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn GroupStore> {
        &self.store
    }

    /// Embeds (if needed), assigns and evaluates an alert.
    ///
    /// Safe to retry with the same alert ID: a repeat returns the original
    /// group without adding a membership.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::EmbeddingUnavailable` or
    /// `TriageError::IndexUnavailable` for transient failures, and the
    /// validation errors of [`GroupingEngine::assign`].
    pub async fn ingest(&self, mut alert: Alert) -> Result<Ingested> {
        if alert.embedding.is_none() {
            alert.embedding = match self.store.get_alert(&alert.id).and_then(|a| a.embedding) {
                Some(stored) => Some(stored),
                None => Some(self.embed(&alert).await?),
            };
        }

        let assignment = self.engine.assign(alert).await?;
        let rca = self.coordinator.on_group_changed(&assignment.group_id)?;
        debug!(group_id = %assignment.group_id, rca = ?rca, "alert ingested");
        Ok(Ingested { assignment, rca })
    }

    /// Ingests alerts one after another, collecting failures instead of stopping.
    pub async fn ingest_batch(&self, alerts: impl IntoIterator<Item = Alert>) -> BatchReport {
        let mut report = BatchReport::default();
        for alert in alerts {
            let id = alert.id.clone();
            match self.ingest(alert).await {
                Ok(ingested) => {
                    report.ingested += 1;
                    if ingested.assignment.created {
                        report.groups_created += 1;
                    }
                }
                Err(err) => {
                    debug!(alert_id = %id, error = %err, "alert ingestion failed");
                    report.failed.push((id, err.to_string()));
                }
            }
        }
        info!(
            ingested = report.ingested,
            groups_created = report.groups_created,
            failed = report.failed.len(),
            "batch ingested"
        );
        report
    }

    /// Assigns an alert and returns its group.
    ///
    /// # Errors
    ///
    /// See [`TriageService::ingest`].
    pub async fn assign(&self, alert: Alert) -> Result<GroupId> {
        Ok(self.ingest(alert).await?.assignment.group_id)
    }

    async fn embed(&self, alert: &Alert) -> Result<Embedding> {
        let text = alert.embedding_text();
        let timeout = self.config.timeouts.embedding();
        tokio::time::timeout(timeout, self.embedder.embed(&text))
            .await
            .unwrap_or_else(|_| {
                Err(TriageError::EmbeddingUnavailable {
                    reason: format!("embedding timed out after {}ms", timeout.as_millis()),
                })
            })
    }

    /// Reads a group.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::GroupNotFound` if the group doesn't exist.
    pub fn get_group(&self, group_id: &GroupId) -> Result<Group> {
        Ok(self.store.get(group_id)?.value)
    }

    /// Lists groups, most recently modified first.
    #[must_use]
    pub fn list_groups(&self, filter: &GroupFilter) -> GroupPage {
        self.store.list(filter)
    }

    /// Member alerts of a group in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::GroupNotFound` if the group doesn't exist.
    pub fn group_alerts(&self, group_id: &GroupId) -> Result<Vec<Alert>> {
        self.store.alerts_of(group_id)
    }

    /// Reads an alert.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::AlertNotFound` if the alert doesn't exist.
    pub fn get_alert(&self, alert_id: &AlertId) -> Result<Alert> {
        self.store
            .get_alert(alert_id)
            .ok_or_else(|| TriageError::AlertNotFound {
                id: alert_id.to_string(),
            })
    }

    /// Marks a group resolved. Resolved groups stop receiving alerts.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::GroupNotFound` if the group doesn't exist.
    pub fn resolve_group(&self, group_id: &GroupId, notes: Option<String>) -> Result<Group> {
        let group = self.store.modify(group_id, |group| {
            group.resolve(notes.clone());
            Ok(Mutation::Commit(group.clone()))
        })?;
        info!(group_id = %group_id, members = group.member_count(), "group resolved");
        Ok(group)
    }

    /// Forces a new RCA for a group, resetting its failure budget.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::GroupNotFound` if the group doesn't exist.
    pub fn request_rca_regeneration(&self, group_id: &GroupId) -> Result<RcaTrigger> {
        self.coordinator.request_regeneration(group_id)
    }

    /// Cancels a running RCA generation. Returns false if none was running.
    pub fn cancel_rca(&self, group_id: &GroupId) -> bool {
        self.coordinator.cancel_generation(group_id)
    }

    /// Merges `sources` into `target`.
    ///
    /// Source groups are emptied, resolved and marked as merged; the target
    /// gets their members and is evaluated for a new RCA.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::GroupNotFound` if any group doesn't exist,
    /// `TriageError::GroupResolved` if the target is resolved, and
    /// `TriageError::InvalidAlert` if no other group is named.
    pub async fn merge_groups(&self, target: &GroupId, sources: &[GroupId]) -> Result<Group> {
        if sources.iter().all(|s| s == target) {
            return Err(TriageError::InvalidAlert {
                reason: "merge needs at least one source group besides the target".to_string(),
            });
        }
        if !self.store.get(target)?.value.is_open() {
            return Err(TriageError::GroupResolved {
                id: target.to_string(),
            });
        }

        for source in sources.iter().filter(|s| *s != target) {
            self.coordinator.cancel_generation(source);
        }
        let merged = self.store.merge(target, sources)?.value;
        info!(
            target = %target,
            sources = sources.len(),
            members = merged.member_count(),
            "groups merged"
        );

        for source in sources.iter().filter(|s| *s != target) {
            self.engine.retract(source).await;
        }
        self.engine.publish(target, &merged.representative).await;
        self.coordinator.on_group_changed(target)?;
        Ok(merged)
    }

    /// Sets the status of an alert.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::AlertNotFound` if the alert doesn't exist.
    pub fn update_alert_status(&self, alert_id: &AlertId, status: AlertStatus) -> Result<Alert> {
        self.store.set_alert_status(alert_id, status)
    }

    /// Aggregate statistics over every group.
    #[must_use]
    pub fn statistics(&self) -> GroupStatistics {
        GroupStatistics::collect(self.store.iter_groups(GroupFilter::all().with_limit(100)))
    }

    /// Receives every RCA state change from now on.
    #[must_use]
    pub fn subscribe_rca(&self) -> broadcast::Receiver<RcaTransition> {
        self.coordinator.subscribe()
    }

    /// Waits for all scheduled RCA work to settle.
    pub async fn wait_idle(&self) {
        self.coordinator.wait_idle().await;
    }

    /// Cancels RCA work, releases every lease and waits for tasks to stop.
    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
        info!("triage service stopped");
    }
}
