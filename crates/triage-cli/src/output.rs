//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;
use triage_core::{Alert, Group};
use triage_engine::{BatchReport, GroupStatistics};
use triage_store::GroupPage;

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Get the current format.
    #[must_use]
    pub const fn format(&self) -> Format {
        self.format
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a serializable value to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => {
                value.write_table(writer)?;
            }
        }
        Ok(())
    }

    /// Write a serializable value to a string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_string<T>(&self, value: &T) -> Result<String, CliError>
    where
        T: Serialize + TableDisplay,
    {
        let mut buf = Vec::new();
        self.write(&mut buf, value)?;
        String::from_utf8(buf).map_err(|e| CliError::Format(format!("UTF-8 error: {e}")))
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

/// One line of a group listing.
#[derive(Debug, Clone, Serialize)]
pub struct GroupRow {
    /// Group ID.
    pub id: String,
    /// Group title.
    pub title: String,
    /// Open or resolved.
    pub status: String,
    /// Derived priority.
    pub priority: String,
    /// RCA state.
    pub rca: String,
    /// Member count.
    pub alerts: usize,
    /// Last modification.
    pub updated_at: DateTime<Utc>,
}

impl From<&Group> for GroupRow {
    fn from(group: &Group) -> Self {
        Self {
            id: group.id.to_string(),
            title: group.title.clone(),
            status: match &group.merged_into {
                Some(target) => format!("merged:{target}"),
                None => group.status.to_string(),
            },
            priority: group.priority.to_string(),
            rca: group.rca.state.to_string(),
            alerts: group.member_count(),
            updated_at: group.updated_at,
        }
    }
}

fn write_rows<W: Write>(writer: &mut W, rows: &[GroupRow]) -> Result<(), CliError> {
    writeln!(
        writer,
        "{:<36}  {:<8}  {:<8}  {:<8}  {:>6}  {:<40}",
        "ID", "PRIORITY", "STATUS", "RCA", "ALERTS", "TITLE"
    )?;
    writeln!(writer, "{}", "─".repeat(116))?;
    for row in rows {
        writeln!(
            writer,
            "{:<36}  {:<8}  {:<8}  {:<8}  {:>6}  {:<40}",
            row.id,
            row.priority,
            truncate(&row.status, 8),
            row.rca,
            row.alerts,
            truncate(&row.title, 40)
        )?;
    }
    Ok(())
}

/// A page of groups.
#[derive(Debug, Clone, Serialize)]
pub struct GroupList {
    /// Groups on this page.
    pub groups: Vec<GroupRow>,
    /// Matching groups across all pages.
    pub total: usize,
    /// Offset of the next page.
    pub next_offset: Option<usize>,
}

impl From<&GroupPage> for GroupList {
    fn from(page: &GroupPage) -> Self {
        Self {
            groups: page.groups.iter().map(GroupRow::from).collect(),
            total: page.total,
            next_offset: page.next_offset,
        }
    }
}

impl TableDisplay for GroupList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.groups.is_empty() {
            writeln!(writer, "No groups found")?;
            return Ok(());
        }
        write_rows(writer, &self.groups)?;
        writeln!(writer)?;
        write!(writer, "Showing {} of {} group(s)", self.groups.len(), self.total)?;
        match self.next_offset {
            Some(offset) => writeln!(writer, ", next page at --offset {offset}")?,
            None => writeln!(writer)?,
        }
        Ok(())
    }
}

/// A group with its member alerts.
#[derive(Debug, Clone, Serialize)]
pub struct GroupDetail {
    /// The group.
    pub group: Group,
    /// Member alerts in insertion order.
    pub alerts: Vec<Alert>,
}

impl TableDisplay for GroupDetail {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        let g = &self.group;
        writeln!(writer, "Group: {}", g.id)?;
        writeln!(writer, "══════════════════════════════════════════════════")?;
        writeln!(writer, "Title:            {}", g.title)?;
        writeln!(writer, "Status:           {}", g.status)?;
        if let Some(target) = &g.merged_into {
            writeln!(writer, "Merged Into:      {target}")?;
        }
        writeln!(writer, "Priority:         {}", g.priority)?;
        writeln!(writer, "Max Severity:     {}", g.max_severity)?;
        writeln!(writer, "Alerts:           {}", g.member_count())?;
        writeln!(writer, "First Alert:      {}", g.first_alert_at.to_rfc3339())?;
        writeln!(writer, "Last Alert:       {}", g.last_alert_at.to_rfc3339())?;
        if !g.affected_services.is_empty() {
            writeln!(writer, "Services:         {}", g.affected_services.join(", "))?;
        }
        if !g.affected_hosts.is_empty() {
            writeln!(writer, "Hosts:            {}", g.affected_hosts.join(", "))?;
        }
        if let Some(notes) = &g.resolution_notes {
            writeln!(writer, "Resolution:       {notes}")?;
        }
        writeln!(writer)?;

        writeln!(writer, "Root Cause Analysis ({})", g.rca.state)?;
        writeln!(writer, "{}", "─".repeat(50))?;
        match &g.rca.report {
            Some(report) => {
                if let Some(confidence) = report.confidence {
                    writeln!(writer, "Confidence: {:.0}%", confidence * 100.0)?;
                }
                writeln!(writer, "{}", report.narrative.trim_end())?;
            }
            None => match &g.rca.last_error {
                Some(err) => writeln!(writer, "Last attempt failed: {err}")?,
                None => writeln!(writer, "Not generated")?,
            },
        }
        writeln!(writer)?;

        if self.alerts.is_empty() {
            writeln!(writer, "Alerts: None")?;
        } else {
            writeln!(writer, "Alerts ({}):", self.alerts.len())?;
            for alert in &self.alerts {
                writeln!(
                    writer,
                    "  {} [{}] {} - {}",
                    alert.created_at.format("%Y-%m-%d %H:%M:%S"),
                    alert.severity,
                    alert.id,
                    truncate(&alert.title, 60)
                )?;
            }
        }
        Ok(())
    }
}

/// An alert the ingest could not place.
#[derive(Debug, Clone, Serialize)]
pub struct FailedAlert {
    /// Alert ID.
    pub id: String,
    /// Why it failed.
    pub error: String,
}

/// Result of an ingest run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    /// Alerts read from the input.
    pub received: usize,
    /// Alerts assigned to a group.
    pub ingested: usize,
    /// Groups created by this run.
    pub groups_created: usize,
    /// Alerts that failed.
    pub failed: Vec<FailedAlert>,
    /// Groups the input touched.
    pub groups: Vec<GroupRow>,
}

impl IngestSummary {
    /// Builds the summary from the batch report and the touched groups.
    #[must_use]
    pub fn new(received: usize, report: BatchReport, groups: &[Group]) -> Self {
        Self {
            received,
            ingested: report.ingested,
            groups_created: report.groups_created,
            failed: report
                .failed
                .into_iter()
                .map(|(id, error)| FailedAlert {
                    id: id.to_string(),
                    error,
                })
                .collect(),
            groups: groups.iter().map(GroupRow::from).collect(),
        }
    }
}

impl TableDisplay for IngestSummary {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(
            writer,
            "Ingested {} of {} alert(s), {} new group(s)",
            self.ingested, self.received, self.groups_created
        )?;
        for failed in &self.failed {
            writeln!(writer, "  ✗ {}: {}", failed.id, failed.error)?;
        }
        if !self.groups.is_empty() {
            writeln!(writer)?;
            write_rows(writer, &self.groups)?;
        }
        Ok(())
    }
}

/// Confirmation of a group change.
#[derive(Debug, Clone, Serialize)]
pub struct GroupUpdated {
    /// Human-readable summary.
    pub message: String,
    /// The group after the change.
    pub group: GroupRow,
}

impl TableDisplay for GroupUpdated {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "✓ {}", self.message)?;
        writeln!(writer)?;
        write_rows(writer, std::slice::from_ref(&self.group))
    }
}

impl TableDisplay for GroupStatistics {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Group Statistics")?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Groups:           {}", self.total_groups)?;
        writeln!(writer, "  Open:           {}", self.open_groups)?;
        writeln!(writer, "  Resolved:       {}", self.resolved_groups)?;
        writeln!(writer, "  Merged:         {}", self.merged_groups)?;
        writeln!(writer, "Alerts:           {}", self.total_alerts)?;
        writeln!(writer, "RCA Ready:        {}", self.rca_ready)?;
        match self.mean_resolution_hours {
            Some(hours) => writeln!(writer, "Mean Resolution:  {hours:.1}h")?,
            None => writeln!(writer, "Mean Resolution:  -")?,
        }
        writeln!(writer)?;
        writeln!(writer, "By Priority")?;
        for (priority, count) in self.by_priority.iter().rev() {
            writeln!(writer, "  {:<16}{count}", format!("{priority}:"))?;
        }
        writeln!(writer)?;
        writeln!(writer, "By RCA State")?;
        for (state, count) in &self.by_rca_state {
            writeln!(writer, "  {:<16}{count}", format!("{state}:"))?;
        }
        Ok(())
    }
}

/// Truncate a string to a maximum number of characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len > 3 {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{kept}...")
    } else {
        s.chars().take(max_len).collect()
    }
}
