//! Stats command implementation.

use std::io::Write;
use std::path::Path;

use triage_engine::GroupStatistics;
use triage_store::{GroupFilter, GroupStoreExt};

use super::load_store;
use crate::error::CliError;
use crate::output::OutputFormat;

/// Handler for the stats command.
pub struct StatsCommand<'a> {
    state: &'a Path,
}

impl<'a> StatsCommand<'a> {
    /// Creates a handler over the state directory.
    #[must_use]
    pub const fn new(state: &'a Path) -> Self {
        Self { state }
    }

    /// Prints statistics over every stored group.
    ///
    /// # Errors
    ///
    /// Returns error if the state can't be loaded or output fails.
    pub fn execute<W: Write>(&self, out: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let store = load_store(self.state)?;
        let stats = GroupStatistics::collect(store.iter_groups(GroupFilter::all().with_limit(100)));
        format.write(out, &stats)
    }
}
