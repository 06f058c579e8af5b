//! Core types for the triage alert grouping engine.
//!
//! `triage-core` holds the data model shared by the store and the engine:
//!
//! - **Alerts**: immutable reports from monitoring systems, identified by [`AlertId`]
//! - **Groups**: clusters of alerts with a representative vector and aggregates
//! - **RCA state**: the per-group root cause analysis state machine
//! - **Vector math**: cosine distance and centroid maintenance
//! - **Errors**: the [`TriageError`] taxonomy used across the workspace
//!
//! # Example
//!
//! ```rust
//! use triage_core::{Alert, Embedding, Group, GroupId, RcaState, Severity};
//!
//! let alert = Alert::new("alert-1", "CPU 95%", Severity::High, "Prometheus")
//!     .with_service("web-api");
//! let group = Group::seed(GroupId::generate(), &alert, &Embedding::new(vec![1.0, 0.0]));
//!
//! assert_eq!(group.member_count(), 1);
//! assert_eq!(group.rca.state, RcaState::None);
//! assert!(RcaState::None.can_transition_to(RcaState::Pending));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod group;
pub mod types;
pub mod vector;

pub use error::{Result, TriageError};
pub use group::{
    GenerationLease, Group, GroupPriority, GroupStatus, RcaReport, RcaState, RcaTracker,
};
pub use types::{Alert, AlertId, AlertStatus, GroupId, Severity, SourceSystem};
pub use vector::{cosine_distance, cosine_similarity, l2_normalize, Embedding};
