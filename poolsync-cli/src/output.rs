//! Output formatting for the end-of-run summary

use colored::Colorize;
use poolsync_core::sync::{DatasetOutcome, OpStatus, PruneReport, SyncReport};
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Table,
        }
    }
}

#[derive(Tabled, Serialize)]
struct OutcomeRow {
    dataset: String,
    state: String,
    snapshot: String,
    transfer: String,
    #[tabled(rename = "pruned src")]
    pruned_source: String,
    #[tabled(rename = "pruned dst")]
    pruned_destination: String,
}

impl From<&DatasetOutcome> for OutcomeRow {
    fn from(outcome: &DatasetOutcome) -> Self {
        Self {
            dataset: outcome.dataset.clone(),
            state: outcome.state.to_string(),
            snapshot: status_cell(&outcome.creation),
            transfer: match &outcome.base {
                Some(_) if outcome.transfer.went_ahead() => {
                    format!("{} (incremental)", status_cell(&outcome.transfer))
                }
                _ => status_cell(&outcome.transfer),
            },
            pruned_source: prune_cell(outcome.source_prune.as_ref()),
            pruned_destination: prune_cell(outcome.destination_prune.as_ref()),
        }
    }
}

fn status_cell(status: &OpStatus) -> String {
    match status {
        OpStatus::Succeeded => status.to_string().green().to_string(),
        OpStatus::Failed(_) => status.to_string().red().to_string(),
        OpStatus::Planned => status.to_string().cyan().to_string(),
        OpStatus::NotAttempted => status.to_string().dimmed().to_string(),
    }
}

fn prune_cell(report: Option<&PruneReport>) -> String {
    let Some(report) = report else {
        return "-".dimmed().to_string();
    };

    let mut cell = report.removed().to_string();
    if !report.unsafe_skipped.is_empty() {
        cell.push_str(&format!(", {} unsafe", report.unsafe_skipped.len()));
    }
    if report.has_failures() {
        cell = format!("{}, {} failed", cell, report.failed.len()).red().to_string();
    }
    cell
}

/// Print the run summary in the requested format
pub fn print_report(report: &SyncReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(report)?,
        OutputFormat::Table => {
            let rows: Vec<OutcomeRow> = report.datasets.iter().map(OutcomeRow::from).collect();
            print_table(rows);

            let summary = format!(
                "{} -> {} ({}) finished in {} ms",
                report.source, report.destination, report.mode, report.duration_ms
            );
            if report.has_failures() {
                print_warning(&format!("{} with failures", summary));
            } else {
                print_success(&summary);
            }
        }
    }
    Ok(())
}

/// Print data as a table using the tabled crate
pub fn print_table<T: Tabled>(data: Vec<T>) {
    if data.is_empty() {
        println!("{}", "No datasets processed".yellow());
        return;
    }

    let table = Table::new(data);
    println!("{}", table);
}

/// Print data as pretty-printed JSON
pub fn print_json<T: Serialize>(data: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    println!("{}", json);
    Ok(())
}

/// Print a success message with green checkmark
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

/// Print an error message with red X
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

/// Print a warning message with yellow triangle
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parsing() {
        assert_eq!(OutputFormat::from_str("json"), OutputFormat::Json);
        assert_eq!(OutputFormat::from_str("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::from_str("table"), OutputFormat::Table);
        assert_eq!(OutputFormat::from_str("anything"), OutputFormat::Table);
    }

    #[test]
    fn test_prune_cell_without_report() {
        colored::control::set_override(false);
        assert_eq!(prune_cell(None), "-");

        let report = PruneReport {
            pool: "tank".to_string(),
            destroyed: vec!["tank/a@s1".to_string(), "tank/a@s2".to_string()],
            unsafe_skipped: vec!["tank/a".to_string()],
            ..Default::default()
        };
        assert_eq!(prune_cell(Some(&report)), "2, 1 unsafe");
    }
}
