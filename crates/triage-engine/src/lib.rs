//! Alert grouping and root cause analysis coordination.
//!
//! `triage-engine` turns a stream of alerts into incident groups:
//!
//! - **Grouping**: each alert joins the nearest open group whose
//!   representative is within the configured cosine distance, or starts a new
//!   group
//! - **RCA coordination**: groups with enough members get a root cause
//!   analysis generated in the background, at most one generation per group
//!   at a time, with retries and coalescing of concurrent changes
//! - **Capabilities**: embedding, similarity search and RCA generation are
//!   traits; offline built-ins are provided
//! - **Service facade**: [`TriageService`] exposes ingest, listing, merge,
//!   resolution and statistics over a shared [`triage_store::GroupStore`]
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use triage_core::{Alert, Severity};
//! use triage_engine::{TriageConfig, TriageService};
//! use triage_store::MemoryGroupStore;
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! runtime.block_on(async {
//!     let store = Arc::new(MemoryGroupStore::new());
//!     let service = TriageService::offline(TriageConfig::default(), store)
//!         .await
//!         .unwrap();
//!
//!     let alert = Alert::new("a1", "High CPU usage", Severity::High, "Prometheus")
//!         .with_service("web-api");
//!     let first = service.ingest(alert.clone()).await.unwrap();
//!     let again = service.ingest(alert).await.unwrap();
//!
//!     assert!(first.assignment.created);
//!     assert_eq!(again.assignment.group_id, first.assignment.group_id);
//!     service.shutdown().await;
//! });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod analysis;
pub mod builtin;
pub mod capabilities;
pub mod config;
pub mod engine;
pub mod rca;
pub mod service;
pub mod stats;

// Re-export main types at crate root
pub use analysis::{IncidentPattern, TemporalPattern, TimelineEntry};
pub use builtin::{FlatIndex, HashingEmbedder, TemplateRcaGenerator};
pub use capabilities::{EmbeddingProvider, Neighbor, RcaGenerator, RcaRequest, SimilarityIndex};
pub use config::{
    EmbeddingConfig, GroupingConfig, RcaConfig, TimeoutConfig, TriageConfig, MAX_RETRY_BACKOFF,
};
pub use engine::{rank_candidates, Assignment, Candidate, GroupingEngine, DISTANCE_EPSILON};
pub use rca::{RcaCoordinator, RcaTransition, RcaTrigger};
pub use service::{BatchReport, Ingested, TriageService};
pub use stats::GroupStatistics;
