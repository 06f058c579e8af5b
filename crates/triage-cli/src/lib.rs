//! # triage-cli
//!
//! Command-line interface for the triage engine.
//!
//! Provides commands for:
//! - Ingesting alert batches and generating RCA reports
//! - Listing and inspecting groups
//! - Resolving and merging groups
//! - Group statistics
//!
//! State lives in a directory holding a JSON snapshot of the group store;
//! every command loads it, works on it in memory and saves it back if it
//! changed anything.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{Cli, Commands, Format, GroupsArgs, IngestArgs, StateArgs, StatusArg};
pub use error::CliError;
pub use output::OutputFormat;
