//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use triage_core::GroupStatus;

/// Triage - groups related alerts and explains their root cause.
#[derive(Parser, Debug, Clone)]
#[command(name = "triage")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table, global = true)]
    pub format: Format,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, env = "TRIAGE_LOG_JSON", global = true)]
    pub log_json: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Group a JSON array of alerts and generate RCA reports.
    Ingest(IngestArgs),

    /// List groups.
    Groups(GroupsArgs),

    /// Show one group with its alerts and RCA report.
    Group {
        /// Group ID.
        id: String,

        /// Snapshot location.
        #[command(flatten)]
        state: StateArgs,
    },

    /// Mark a group resolved.
    Resolve {
        /// Group ID.
        id: String,

        /// Resolution notes.
        #[arg(short, long)]
        notes: Option<String>,

        /// Snapshot location.
        #[command(flatten)]
        state: StateArgs,
    },

    /// Merge groups into a target group.
    Merge {
        /// Group receiving the alerts.
        target: String,

        /// Groups to merge into the target.
        #[arg(required = true)]
        sources: Vec<String>,

        /// Snapshot location.
        #[command(flatten)]
        state: StateArgs,
    },

    /// Show aggregate statistics.
    Stats {
        /// Snapshot location.
        #[command(flatten)]
        state: StateArgs,
    },

    /// Write the default configuration as TOML.
    InitConfig {
        /// File to write; stdout if omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Location of the persisted store.
#[derive(Args, Debug, Clone)]
pub struct StateArgs {
    /// Directory holding the group snapshot.
    #[arg(short, long, env = "TRIAGE_STATE")]
    pub state: PathBuf,
}

/// Arguments for the ingest command.
#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    /// JSON file containing an array of alerts.
    pub file: PathBuf,

    /// Configuration file (TOML).
    #[arg(short, long, env = "TRIAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the group snapshot; nothing is persisted if omitted.
    #[arg(short, long, env = "TRIAGE_STATE")]
    pub state: Option<PathBuf>,
}

/// Arguments for the groups command.
#[derive(Args, Debug, Clone)]
pub struct GroupsArgs {
    /// Snapshot location.
    #[command(flatten)]
    pub state: StateArgs,

    /// Only show groups with this status.
    #[arg(long, value_enum)]
    pub status: Option<StatusArg>,

    /// Only show groups touching this service.
    #[arg(long)]
    pub service: Option<String>,

    /// Maximum number of groups to show.
    #[arg(short, long, default_value_t = 20)]
    pub limit: usize,

    /// Number of groups to skip.
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
}

/// Group status filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    /// Groups still receiving alerts.
    Open,
    /// Resolved groups.
    Resolved,
}

impl From<StatusArg> for GroupStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Open => Self::Open,
            StatusArg::Resolved => Self::Resolved,
        }
    }
}
