//! External capabilities consumed by the engine.
//!
//! Embedding, similarity search and RCA generation are black boxes behind
//! these traits. Every call may block on I/O; the engine wraps each one in a
//! timeout and drops the future to cancel it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use triage_core::{Alert, Embedding, Group, GroupId, RcaReport, Result};

use crate::analysis::IncidentPattern;

/// Converts alert text into a fixed-dimension vector.
pub trait EmbeddingProvider: Send + Sync + fmt::Debug {
    /// Dimension of every produced vector.
    fn dimension(&self) -> usize;

    /// Embeds `text`.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::EmbeddingUnavailable` if the provider can't be reached.
    fn embed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Embedding>> + Send + 'a>>;
}

/// A nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Group whose representative matched.
    pub group_id: GroupId,
    /// Distance reported by the index, in `[0, 1]`.
    pub distance: f64,
}

/// Nearest-neighbour search over group representatives.
pub trait SimilarityIndex: Send + Sync + fmt::Debug {
    /// Dimension of the stored vectors.
    fn dimension(&self) -> usize;

    /// Returns up to `k` groups ordered by ascending distance to `vector`.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::IndexUnavailable` if the index can't be reached.
    fn query<'a>(
        &'a self,
        vector: &'a Embedding,
        k: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Neighbor>>> + Send + 'a>>;

    /// Inserts or replaces the representative of `group_id`.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::IndexUnavailable` if the index can't be reached.
    fn upsert<'a>(
        &'a self,
        group_id: &'a GroupId,
        vector: &'a Embedding,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Drops the representative of `group_id`. Removing an unknown group is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::IndexUnavailable` if the index can't be reached.
    fn remove<'a>(
        &'a self,
        group_id: &'a GroupId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Everything a generator gets to look at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RcaRequest {
    /// Group snapshot at lease acquisition.
    pub group: Group,
    /// Member alerts in insertion order.
    pub alerts: Vec<Alert>,
    /// Pattern analysis over `alerts`.
    pub pattern: IncidentPattern,
}

impl RcaRequest {
    /// Builds a request, running the pattern analysis over `alerts`.
    #[must_use]
    pub fn new(group: Group, alerts: Vec<Alert>) -> Self {
        let pattern = IncidentPattern::analyze(&alerts);
        Self {
            group,
            alerts,
            pattern,
        }
    }
}

/// Produces root cause narratives.
pub trait RcaGenerator: Send + Sync + fmt::Debug {
    /// Generates an analysis for the group in `request`.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::GenerationUnavailable` if the model can't be
    /// reached or refuses.
    fn generate<'a>(
        &'a self,
        request: &'a RcaRequest,
    ) -> Pin<Box<dyn Future<Output = Result<RcaReport>> + Send + 'a>>;
}
