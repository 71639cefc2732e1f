//! Run reports
//!
//! A report is produced for every run, whatever its outcome. It renders as
//! colored text or JSON, and can be exported to a `.json` or `.xlsx` file:
//! - Summary sheet with per-kind counts and the run outcome
//! - Failures sheet with every failed record and its reason
//! - Changes sheet with field-level diffs of updates

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use rust_xlsxwriter::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::apply::ApplyLog;
use super::types::{
    Action, IgnoredDuplicate, PlanEntry, ReconciliationPlan, RecordFailure, RunState,
    UnmatchedRecord,
};
use crate::error::SyncError;
use crate::models::EntityKind;

/// Exit status for a clean run
pub const EXIT_OK: i32 = 0;
/// Exit status when the run finished but at least one record failed
pub const EXIT_RECORD_FAILURES: i32 = 1;
/// Exit status when the run aborted and rolled back
pub const EXIT_FATAL: i32 = 2;
/// Exit status when the operator interrupted the run
pub const EXIT_CANCELLED: i32 = 130;

/// Per-kind counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSummary {
    pub kind: Option<EntityKind>,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub failed: usize,
    pub unmatched: usize,
}

impl KindSummary {
    fn for_kind(kind: EntityKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    fn add(&mut self, other: &KindSummary) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.deleted += other.deleted;
        self.failed += other.failed;
        self.unmatched += other.unmatched;
    }
}

/// A fatal error that ended the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatalError {
    /// Taxonomy label, e.g. `StoreError`
    pub kind: String,
    pub message: String,
}

impl From<&SyncError> for FatalError {
    fn from(error: &SyncError) -> Self {
        Self {
            kind: error.label().to_string(),
            message: error.to_string(),
        }
    }
}

/// Structured summary of a reconciliation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Which operation ran, e.g. `seed` or `media sync`
    pub command: String,
    pub state: RunState,
    pub dry_run: bool,
    pub reset: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summaries: Vec<KindSummary>,
    pub failures: Vec<RecordFailure>,
    pub duplicates: Vec<IgnoredDuplicate>,
    pub unmatched: Vec<UnmatchedRecord>,
    /// Mutating entries that were applied (or would be, in a dry run);
    /// updates carry their field diffs
    pub changes: Vec<PlanEntry>,
    pub fatal_error: Option<FatalError>,
}

impl RunReport {
    pub fn new(command: impl Into<String>, dry_run: bool, reset: bool) -> Self {
        let now = Utc::now();
        Self {
            command: command.into(),
            state: RunState::Idle,
            dry_run,
            reset,
            started_at: now,
            finished_at: now,
            summaries: Vec::new(),
            failures: Vec::new(),
            duplicates: Vec::new(),
            unmatched: Vec::new(),
            changes: Vec::new(),
            fatal_error: None,
        }
    }

    /// Fill the report from the run's plan and apply log and mark it terminal
    ///
    /// Counts reflect what was applied (or would be, in a dry run). A rolled
    /// back run keeps the counts reached before the failure, but none of
    /// them were persisted.
    pub fn finish(
        &mut self,
        state: RunState,
        kinds: &[EntityKind],
        plan: Option<&ReconciliationPlan>,
        progress: &ApplyLog,
        fatal: Option<&SyncError>,
    ) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.finished_at = Utc::now();
        self.fatal_error = fatal.map(FatalError::from);
        self.failures = progress.failures.clone();

        if let Some(plan) = plan {
            for kind_plan in &plan.kinds {
                self.duplicates.extend(kind_plan.duplicates.iter().cloned());
                self.unmatched.extend(kind_plan.unmatched.iter().cloned());
            }
            self.changes = plan
                .ordered()
                .into_iter()
                .filter(|e| e.action.is_mutating())
                .filter(|e| {
                    progress
                        .applied
                        .iter()
                        .any(|a| a.kind == e.kind && a.key == e.key && a.action == e.action)
                })
                .cloned()
                .collect();
        }

        self.summaries = kinds
            .iter()
            .map(|&kind| {
                let mut summary = KindSummary::for_kind(kind);
                summary.created = progress.count(kind, Action::Create);
                summary.updated = progress.count(kind, Action::Update);
                summary.skipped = progress.count(kind, Action::Skip);
                summary.deleted = progress.count(kind, Action::Delete);
                summary.failed = self.failures.iter().filter(|f| f.kind == kind).count();
                summary.unmatched = self.unmatched.iter().filter(|u| u.kind == kind).count();
                summary
            })
            .collect();
    }

    /// Sum of all per-kind counts
    pub fn totals(&self) -> KindSummary {
        let mut total = KindSummary::default();
        for summary in &self.summaries {
            total.add(summary);
        }
        total
    }

    #[cfg(test)]
    pub fn is_success(&self) -> bool {
        self.exit_code() == EXIT_OK
    }

    /// Process exit status for this run
    pub fn exit_code(&self) -> i32 {
        match (&self.fatal_error, self.state) {
            (Some(fatal), _) if fatal.kind == "Cancelled" => EXIT_CANCELLED,
            (Some(_), _) | (None, RunState::RolledBack) => EXIT_FATAL,
            (None, RunState::Committed | RunState::DryRunReport) if self.failures.is_empty() => {
                EXIT_OK
            }
            (None, RunState::Committed | RunState::DryRunReport) => EXIT_RECORD_FAILURES,
            (None, _) => EXIT_FATAL,
        }
    }

    /// Render as plain text, colored when `color` is set
    pub fn render_text(&self, color: bool) -> String {
        colored::control::set_override(color);
        let text = self.render_text_inner();
        colored::control::unset_override();
        text
    }

    fn render_text_inner(&self) -> String {
        let mut out = String::new();

        let mode = if self.dry_run { " (dry run)" } else { "" };
        let reset = if self.reset { " with reset" } else { "" };
        out.push_str(&format!(
            "{}{}{}\n",
            format!("heritage-sync {}", self.command).bold(),
            mode,
            reset
        ));
        out.push('\n');

        out.push_str(&format!(
            "  {:<12} {:>7} {:>7} {:>7} {:>7} {:>7} {:>9}\n",
            "kind", "created", "updated", "skipped", "deleted", "failed", "unmatched"
        ));
        for summary in &self.summaries {
            let name = summary.kind.map(|k| k.cli_name()).unwrap_or("-");
            out.push_str(&format_row(name, summary));
        }
        out.push_str(&format_row("total", &self.totals()));

        if !self.duplicates.is_empty() {
            out.push_str(&format!("\n{}\n", "Ignored duplicates:".yellow()));
            for dup in &self.duplicates {
                out.push_str(&format!(
                    "  {} '{}' at #{} (kept #{})\n",
                    dup.kind, dup.key, dup.index, dup.kept_index
                ));
            }
        }

        let updates: Vec<&PlanEntry> = self
            .changes
            .iter()
            .filter(|e| e.action == Action::Update)
            .collect();
        if !updates.is_empty() {
            out.push_str(&format!("\n{}\n", "Updates:".cyan()));
            for entry in updates {
                out.push_str(&format!(
                    "  {} {} '{}': {}\n",
                    entry.action.symbol(),
                    entry.kind,
                    entry.key,
                    entry.changed_fields().join(", ")
                ));
            }
        }

        if !self.unmatched.is_empty() {
            out.push_str(&format!(
                "\n{}\n",
                "Unmatched records (not deleted):".yellow()
            ));
            for record in &self.unmatched {
                out.push_str(&format!("  {} '{}' (id {})\n", record.kind, record.key, record.id));
            }
        }

        if !self.failures.is_empty() {
            out.push_str(&format!("\n{}\n", "Failed records:".red()));
            for failure in &self.failures {
                out.push_str(&format!(
                    "  {} [{}] {}\n",
                    failure.describe(),
                    failure.error.label(),
                    failure.error
                ));
            }
        }

        out.push('\n');
        let outcome = match self.state {
            RunState::Committed => "committed".green().bold(),
            RunState::DryRunReport => "dry run: nothing written".cyan().bold(),
            RunState::RolledBack => "rolled back: nothing persisted".red().bold(),
            other => other.label().normal(),
        };
        out.push_str(&format!("Outcome: {}\n", outcome));
        if let Some(fatal) = &self.fatal_error {
            out.push_str(&format!("{} {}\n", format!("{}:", fatal.kind).red(), fatal.message));
        }

        out
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize run report")
    }

    /// Write the report to `path`; the extension picks the format
    pub fn export(&self, path: &Path) -> Result<()> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("xlsx") => self.export_to_excel(path),
            Some("json") => {
                std::fs::write(path, self.to_json()?)
                    .with_context(|| format!("Failed to write report: {}", path.display()))?;
                log::info!("Run report exported to: {}", path.display());
                Ok(())
            }
            _ => anyhow::bail!(
                "Unsupported report format for {} (expected .json or .xlsx)",
                path.display()
            ),
        }
    }

    /// Export the report to an Excel workbook
    pub fn export_to_excel(&self, path: &Path) -> Result<()> {
        let mut workbook = Workbook::new();

        create_summary_sheet(&mut workbook, self)?;
        create_failures_sheet(&mut workbook, self)?;
        create_changes_sheet(&mut workbook, self)?;

        workbook
            .save(path)
            .with_context(|| format!("Failed to save Excel file: {}", path.display()))?;

        log::info!("Run report exported to: {}", path.display());
        Ok(())
    }
}

fn format_row(name: &str, summary: &KindSummary) -> String {
    let failed = format!("{:>7}", summary.failed);
    let failed = if summary.failed > 0 {
        failed.red().to_string()
    } else {
        failed
    };
    format!(
        "  {:<12} {:>7} {:>7} {:>7} {:>7} {} {:>9}\n",
        name,
        summary.created,
        summary.updated,
        summary.skipped,
        summary.deleted,
        failed,
        summary.unmatched
    )
}

fn header_format() -> Format {
    Format::new()
        .set_bold()
        .set_background_color(Color::RGB(0x4472C4))
        .set_font_color(Color::White)
}

fn create_summary_sheet(workbook: &mut Workbook, report: &RunReport) -> Result<()> {
    let sheet = workbook.add_worksheet();
    sheet.set_name("Summary")?;

    let title_format = Format::new().set_bold().set_font_size(16);
    let bold_format = Format::new().set_bold();
    let header = header_format();

    sheet.write_string_with_format(
        0,
        0,
        &format!("heritage-sync {} report", report.command),
        &title_format,
    )?;
    sheet.write_string(
        1,
        0,
        &format!("Generated: {}", report.finished_at.format("%Y-%m-%d %H:%M:%S UTC")),
    )?;

    let mut row = 3u32;
    for (label, value) in [
        ("Outcome", report.state.label().to_string()),
        ("Dry run", report.dry_run.to_string()),
        ("Reset", report.reset.to_string()),
        (
            "Fatal error",
            report
                .fatal_error
                .as_ref()
                .map(|f| format!("{}: {}", f.kind, f.message))
                .unwrap_or_default(),
        ),
    ] {
        sheet.write_string_with_format(row, 0, label, &bold_format)?;
        sheet.write_string(row, 1, &value)?;
        row += 1;
    }

    row += 1;
    let headers = [
        "Kind", "Created", "Updated", "Skipped", "Deleted", "Failed", "Unmatched",
    ];
    for (col, title) in headers.iter().enumerate() {
        sheet.write_string_with_format(row, col as u16, *title, &header)?;
    }
    row += 1;

    let totals = report.totals();
    let rows = report
        .summaries
        .iter()
        .map(|s| (s.kind.map(|k| k.cli_name()).unwrap_or("-"), s))
        .chain(std::iter::once(("total", &totals)));
    for (name, summary) in rows {
        sheet.write_string(row, 0, name)?;
        for (col, count) in [
            summary.created,
            summary.updated,
            summary.skipped,
            summary.deleted,
            summary.failed,
            summary.unmatched,
        ]
        .into_iter()
        .enumerate()
        {
            sheet.write_number(row, col as u16 + 1, count as f64)?;
        }
        row += 1;
    }

    sheet.set_column_width(0, 16)?;
    sheet.set_column_width(1, 40)?;
    Ok(())
}

fn create_failures_sheet(workbook: &mut Workbook, report: &RunReport) -> Result<()> {
    let sheet = workbook.add_worksheet();
    sheet.set_name("Failures")?;

    let header = header_format();
    for (col, title) in ["Kind", "Key", "Index", "Error", "Reason"].iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *title, &header)?;
    }

    for (i, failure) in report.failures.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string(row, 0, failure.kind.cli_name())?;
        sheet.write_string(
            row,
            1,
            failure.key.as_ref().map(|k| k.as_str()).unwrap_or(""),
        )?;
        if let Some(index) = failure.index {
            sheet.write_number(row, 2, index as f64)?;
        }
        sheet.write_string(row, 3, failure.error.label())?;
        sheet.write_string(row, 4, &failure.error.to_string())?;
    }

    sheet.set_column_width(1, 30)?;
    sheet.set_column_width(4, 60)?;
    Ok(())
}

fn create_changes_sheet(workbook: &mut Workbook, report: &RunReport) -> Result<()> {
    let sheet = workbook.add_worksheet();
    sheet.set_name("Changes")?;

    let header = header_format();
    for (col, title) in ["Kind", "Key", "Action", "Field", "Before", "After"]
        .iter()
        .enumerate()
    {
        sheet.write_string_with_format(0, col as u16, *title, &header)?;
    }

    let mut row = 1u32;
    for entry in &report.changes {
        if entry.field_diff.is_empty() {
            sheet.write_string(row, 0, entry.kind.cli_name())?;
            sheet.write_string(row, 1, entry.key.as_str())?;
            sheet.write_string(row, 2, entry.action.label())?;
            row += 1;
            continue;
        }
        for change in &entry.field_diff {
            sheet.write_string(row, 0, entry.kind.cli_name())?;
            sheet.write_string(row, 1, entry.key.as_str())?;
            sheet.write_string(row, 2, entry.action.label())?;
            sheet.write_string(row, 3, &change.field)?;
            sheet.write_string(row, 4, &change.before.to_string())?;
            sheet.write_string(row, 5, &change.after.to_string())?;
            row += 1;
        }
    }

    sheet.set_column_width(1, 30)?;
    sheet.set_column_width(4, 40)?;
    sheet.set_column_width(5, 40)?;
    Ok(())
}
