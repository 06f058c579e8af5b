//! Versioned group storage for the triage engine.
//!
//! `triage-store` is the single synchronization point for group state:
//!
//! - **Optimistic concurrency**: every group carries a [`Version`]; writes are
//!   conditional on the version they were read at
//! - **Atomic membership**: adding a member claims the alert in the same write,
//!   so an alert can never belong to two groups
//! - **Merges**: all members of several groups move into one target atomically
//! - **Listing**: filtered, paginated views ordered by last modification
//! - **Snapshots**: the in-memory store can be saved to and loaded from JSON
//!
//! # Example
//!
//! ```rust
//! use triage_core::{Alert, Embedding, Group, GroupId, Severity};
//! use triage_store::{GroupStore, GroupStoreExt, MemoryGroupStore, Mutation};
//!
//! let store = MemoryGroupStore::new();
//! let alert = store
//!     .put_alert(Alert::new("a1", "CPU 95%", Severity::High, "Prometheus"))
//!     .unwrap();
//! let id = store
//!     .create_new(Group::seed(GroupId::new("g1"), &alert, &Embedding::new(vec![1.0])))
//!     .unwrap();
//!
//! store
//!     .modify(&id, |group| {
//!         group.title = "CPU saturation".to_string();
//!         Ok(Mutation::Commit(()))
//!     })
//!     .unwrap();
//!
//! assert_eq!(store.get(&id).unwrap().value.title, "CPU saturation");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod filter;
pub mod memory;
pub mod snapshot;
pub mod traits;

pub use filter::{GroupFilter, GroupPage, DEFAULT_PAGE_SIZE};
pub use memory::MemoryGroupStore;
pub use snapshot::{JsonSnapshot, StoreSnapshot, VersionedGroup, GROUPS_SNAPSHOT};
pub use traits::{
    GroupIter, GroupStore, GroupStoreExt, Mutation, UpdateOutcome, Version, Versioned,
};
