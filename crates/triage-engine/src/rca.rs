//! RCA trigger coordination.
//!
//! The coordinator decides when a group needs a (new) root cause analysis and
//! runs at most one generation per group at a time. The per-group lock is a
//! [`GenerationLease`] stored on the group itself and acquired through the
//! store's versioned update, so it holds across every coordinator handle.
//!
//! ```text
//! None ──► Pending ──► Ready ──► Stale
//!            ▲  │                  │
//!            │  ▼                  │
//!            Failed ◄──────────────┘ (Stale ──► Pending)
//! ```
//!
//! A generation task always releases its lease on exit, including when it is
//! cancelled or dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use triage_core::{
    Alert, GenerationLease, Group, GroupId, RcaReport, RcaState, Result, TriageError,
};
use triage_store::{GroupStore, GroupStoreExt, Mutation};
use uuid::Uuid;

use crate::capabilities::{RcaGenerator, RcaRequest};
use crate::config::RcaConfig;

/// Capacity of the transition broadcast channel.
const EVENT_BUFFER: usize = 1024;

/// A committed RCA state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RcaTransition {
    /// The group.
    pub group_id: GroupId,
    /// Previous state.
    pub from: RcaState,
    /// New state.
    pub to: RcaState,
    /// Commit time.
    pub at: DateTime<Utc>,
}

/// Result of asking the coordinator to (re)generate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RcaTrigger {
    /// A lease was acquired and a generation scheduled.
    Started {
        /// The new lease.
        lease_id: Uuid,
    },
    /// Not enough members yet; the state stays None.
    BelowMinimum {
        /// Current member count.
        members: usize,
        /// Configured minimum.
        required: usize,
    },
    /// A generation is already in flight; it will pick the change up.
    Coalesced,
    /// The current report already covers the current membership.
    UpToDate,
    /// The failure budget is spent; only a manual request restarts it.
    Exhausted {
        /// Failed attempts so far.
        attempts: u32,
    },
    /// The group has no members left, usually because it was merged away.
    Retired,
    /// The coordinator is shutting down.
    ShuttingDown,
}

enum Acquire {
    Started {
        lease: GenerationLease,
        group: Group,
        path: Vec<(RcaState, RcaState)>,
    },
    Declined(RcaTrigger),
}

#[derive(Debug)]
struct Inner {
    store: Arc<dyn GroupStore>,
    generator: Arc<dyn RcaGenerator>,
    config: RcaConfig,
    tasks: TaskTracker,
    shutdown: CancellationToken,
    running: Mutex<HashMap<Uuid, CancellationToken>>,
    events: broadcast::Sender<RcaTransition>,
    idle: tokio::sync::Mutex<()>,
}

/// Schedules RCA generations in response to group changes.
///
/// Cloning yields another handle onto the same coordinator. Trigger methods
/// spawn tasks and must be called from within a Tokio runtime.
#[derive(Debug, Clone)]
pub struct RcaCoordinator {
    inner: Arc<Inner>,
}

impl RcaCoordinator {
    /// Creates a coordinator over `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn GroupStore>,
        generator: Arc<dyn RcaGenerator>,
        config: RcaConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(Inner {
                store,
                generator,
                config,
                tasks: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                running: Mutex::new(HashMap::new()),
                events,
                idle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Receives every committed RCA state change from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RcaTransition> {
        self.inner.events.subscribe()
    }

    /// Evaluates a group after a membership change.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::GroupNotFound` if the group doesn't exist.
    pub fn on_group_changed(&self, group_id: &GroupId) -> Result<RcaTrigger> {
        self.inner.trigger(group_id, false)
    }

    /// Forces a new generation.
    ///
    /// Resets the failure counter, ignores the member minimum and moves a
    /// Ready group through Stale. Reports [`RcaTrigger::Coalesced`] if a
    /// generation is already running.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::GroupNotFound` if the group doesn't exist.
    pub fn request_regeneration(&self, group_id: &GroupId) -> Result<RcaTrigger> {
        self.inner.trigger(group_id, true)
    }

    /// Cancels the generation running for a group. Returns false if none is.
    ///
    /// The token of a lease is registered before the lease is committed, so a
    /// lease visible on the group can always be cancelled here.
    pub fn cancel_generation(&self, group_id: &GroupId) -> bool {
        let lease_id = match self.inner.store.get(group_id) {
            Ok(read) => read.value.rca.lease.map(|lease| lease.id),
            Err(_) => None,
        };
        let Some(lease_id) = lease_id else {
            return false;
        };
        match self.inner.running.lock().get(&lease_id) {
            Some(token) => {
                info!(group_id = %group_id, lease = %lease_id, "cancelling rca generation");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of generations currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.running.lock().len()
    }

    /// Waits until every scheduled generation and retry has settled.
    pub async fn wait_idle(&self) {
        let _idle = self.inner.idle.lock().await;
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }

    /// Cancels all work, waits for it to stop and refuses new triggers.
    pub async fn shutdown(&self) {
        info!(in_flight = self.in_flight(), "rca coordinator shutting down");
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }
}

impl Inner {
    fn trigger(self: &Arc<Self>, group_id: &GroupId, manual: bool) -> Result<RcaTrigger> {
        if self.shutdown.is_cancelled() {
            return Ok(RcaTrigger::ShuttingDown);
        }

        let min_members = self.config.min_members;
        let max_attempts = self.config.max_attempts;
        let lease_id = Uuid::new_v4();
        let cancel = self.shutdown.child_token();
        self.running.lock().insert(lease_id, cancel.clone());

        let acquired = self.store.modify(group_id, |group| {
            if group.merged_into.is_some() || group.members.is_empty() {
                return Ok(Mutation::Skip(Acquire::Declined(RcaTrigger::Retired)));
            }
            if group.rca.in_flight() {
                return Ok(Mutation::Skip(Acquire::Declined(RcaTrigger::Coalesced)));
            }

            let mut path = Vec::new();
            match group.rca.state {
                RcaState::None => {
                    if !manual && group.member_count() < min_members {
                        return Ok(Mutation::Skip(Acquire::Declined(
                            RcaTrigger::BelowMinimum {
                                members: group.member_count(),
                                required: min_members,
                            },
                        )));
                    }
                    path.push(step(group, RcaState::Pending)?);
                }
                // Left without a lease by a cancelled or restored generation.
                RcaState::Pending => {}
                RcaState::Ready => {
                    if !manual && group.rca.report_epoch == group.membership_epoch {
                        return Ok(Mutation::Skip(Acquire::Declined(RcaTrigger::UpToDate)));
                    }
                    path.push(step(group, RcaState::Stale)?);
                    path.push(step(group, RcaState::Pending)?);
                }
                RcaState::Stale => path.push(step(group, RcaState::Pending)?),
                RcaState::Failed => {
                    if !manual && group.rca.attempts >= max_attempts {
                        return Ok(Mutation::Skip(Acquire::Declined(RcaTrigger::Exhausted {
                            attempts: group.rca.attempts,
                        })));
                    }
                    path.push(step(group, RcaState::Pending)?);
                }
            }

            if manual {
                group.rca.attempts = 0;
                group.rca.last_error = None;
            }
            let lease = GenerationLease {
                id: lease_id,
                ..GenerationLease::new(group.membership_epoch)
            };
            group.rca.lease = Some(lease.clone());
            Ok(Mutation::Commit(Acquire::Started {
                lease,
                group: group.clone(),
                path,
            }))
        });

        match acquired {
            Err(err) => {
                self.running.lock().remove(&lease_id);
                Err(err)
            }
            Ok(Acquire::Declined(outcome)) => {
                self.running.lock().remove(&lease_id);
                debug!(group_id = %group_id, outcome = ?outcome, manual, "rca trigger declined");
                Ok(outcome)
            }
            Ok(Acquire::Started { lease, group, path }) => {
                self.publish(group_id, &path);
                info!(
                    group_id = %group_id,
                    lease = %lease_id,
                    epoch = lease.epoch,
                    members = group.member_count(),
                    manual,
                    "rca generation scheduled"
                );
                let inner = Arc::clone(self);
                self.tasks.spawn(async move {
                    inner.generate(group, lease, cancel).await;
                });
                Ok(RcaTrigger::Started { lease_id })
            }
        }
    }

    async fn generate(
        self: Arc<Self>,
        group: Group,
        lease: GenerationLease,
        cancel: CancellationToken,
    ) {
        let _guard = LeaseGuard {
            inner: Arc::clone(&self),
            group_id: group.id.clone(),
            lease_id: lease.id,
        };

        let timeout = self.config.generation_timeout();
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = self.run_generator(&group, timeout) => Some(result),
        };

        match outcome {
            None => info!(group_id = %group.id, lease = %lease.id, "rca generation cancelled"),
            Some(Ok(report)) => self.complete(&group.id, &lease, report),
            Some(Err(err)) => self.fail(&group.id, &lease, &err),
        }
    }

    async fn run_generator(&self, group: &Group, timeout: Duration) -> Result<RcaReport> {
        let alerts: Vec<Alert> = group
            .members
            .iter()
            .filter_map(|id| self.store.get_alert(id))
            .collect();
        let request = RcaRequest::new(group.clone(), alerts);
        debug!(
            group_id = %group.id,
            alerts = request.alerts.len(),
            temporal = %request.pattern.temporal,
            "calling rca generator"
        );

        match tokio::time::timeout(timeout, self.generator.generate(&request)).await {
            Ok(result) => result,
            Err(_) => Err(TriageError::GenerationTimeout {
                seconds: timeout.as_secs(),
            }),
        }
    }

    fn complete(self: &Arc<Self>, group_id: &GroupId, lease: &GenerationLease, report: RcaReport) {
        let confidence = report.confidence;
        let recorded = self.store.modify(group_id, |group| {
            if !group.rca.holds(lease.id) {
                return Ok(Mutation::Skip(None));
            }
            group.rca.lease = None;
            group.rca.report = Some(report.clone());
            group.rca.report_epoch = lease.epoch;
            group.rca.attempts = 0;
            group.rca.last_error = None;

            let mut path = vec![step(group, RcaState::Ready)?];
            let changed = group.membership_epoch != lease.epoch;
            if changed {
                path.push(step(group, RcaState::Stale)?);
            }
            Ok(Mutation::Commit(Some((path, changed))))
        });

        match recorded {
            Ok(Some((path, changed))) => {
                self.publish(group_id, &path);
                info!(
                    group_id = %group_id,
                    lease = %lease.id,
                    confidence = ?confidence,
                    stale = changed,
                    "rca generation completed"
                );
                if changed {
                    match self.trigger(group_id, false) {
                        Ok(outcome) => {
                            debug!(group_id = %group_id, outcome = ?outcome, "stale rca re-triggered");
                        }
                        Err(err) => {
                            warn!(group_id = %group_id, error = %err, "failed to re-trigger stale rca");
                        }
                    }
                }
            }
            Ok(None) => {
                warn!(
                    group_id = %group_id,
                    lease = %lease.id,
                    "rca result discarded, lease no longer held"
                );
            }
            Err(err) => warn!(group_id = %group_id, error = %err, "failed to record rca result"),
        }
    }

    fn fail(self: &Arc<Self>, group_id: &GroupId, lease: &GenerationLease, err: &TriageError) {
        let recorded = self.store.modify(group_id, |group| {
            if !group.rca.holds(lease.id) {
                return Ok(Mutation::Skip(None));
            }
            group.rca.lease = None;
            group.rca.attempts = group.rca.attempts.saturating_add(1);
            group.rca.last_error = Some(err.to_string());
            let path = vec![step(group, RcaState::Failed)?];
            Ok(Mutation::Commit(Some((path, group.rca.attempts))))
        });

        match recorded {
            Ok(Some((path, attempts))) => {
                self.publish(group_id, &path);
                if attempts < self.config.max_attempts {
                    let delay = self.config.backoff_for(attempts);
                    warn!(
                        group_id = %group_id,
                        error = %err,
                        attempts,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "rca generation failed, retrying"
                    );
                    self.schedule_retry(group_id.clone(), delay);
                } else {
                    warn!(
                        group_id = %group_id,
                        error = %err,
                        attempts,
                        "rca generation failed, giving up until regeneration is requested"
                    );
                }
            }
            Ok(None) => {
                debug!(
                    group_id = %group_id,
                    lease = %lease.id,
                    "rca failure discarded, lease no longer held"
                );
            }
            Err(store_err) => {
                warn!(group_id = %group_id, error = %store_err, "failed to record rca failure");
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, group_id: GroupId, delay: Duration) {
        let inner = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    match inner.trigger(&group_id, false) {
                        Ok(outcome) => {
                            debug!(group_id = %group_id, outcome = ?outcome, "rca retry triggered");
                        }
                        Err(err) => {
                            warn!(group_id = %group_id, error = %err, "rca retry failed to trigger");
                        }
                    }
                }
            }
        });
    }

    fn publish(&self, group_id: &GroupId, path: &[(RcaState, RcaState)]) {
        for (from, to) in path {
            info!(group_id = %group_id, from = %from, to = %to, "rca state changed");
            let _ = self.events.send(RcaTransition {
                group_id: group_id.clone(),
                from: *from,
                to: *to,
                at: Utc::now(),
            });
        }
    }
}

fn step(group: &mut Group, to: RcaState) -> Result<(RcaState, RcaState)> {
    let from = group.rca.state;
    group.rca.transition(to)?;
    Ok((from, to))
}

/// Releases a generation lease when the task holding it ends, however it ends.
struct LeaseGuard {
    inner: Arc<Inner>,
    group_id: GroupId,
    lease_id: Uuid,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let lease_id = self.lease_id;
        let released = self.inner.store.modify(&self.group_id, |group| {
            if group.rca.holds(lease_id) {
                group.rca.lease = None;
                Ok(Mutation::Commit(true))
            } else {
                Ok(Mutation::Skip(false))
            }
        });
        match released {
            Ok(true) => {
                info!(group_id = %self.group_id, lease = %lease_id, "rca lease released");
            }
            Ok(false) => {}
            Err(err) => {
                warn!(group_id = %self.group_id, error = %err, "failed to release rca lease");
            }
        }

        self.inner.running.lock().remove(&lease_id);
    }
}
