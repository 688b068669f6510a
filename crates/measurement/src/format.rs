//! Rendering of snapshots for the console.

use crate::collector::MeasurementSnapshot;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use serde::Serialize;
use std::fmt::Write;

/// How reports are written to stdout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputStyle {
    /// One line per operation
    #[default]
    Plain,
    /// Aligned columns with a header row
    Table,
    /// One JSON document per report
    Json,
}

/// Whether a report is an interval tick or the single closing summary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Periodic,
    Final,
}

impl ReportKind {
    fn label(self) -> &'static str {
        match self {
            ReportKind::Periodic => "Current",
            ReportKind::Final => "Summary",
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    kind: ReportKind,
    #[serde(flatten)]
    snapshot: &'a MeasurementSnapshot,
}

const TABLE_HEADER: [&str; 8] = [
    "Operation",
    "Takes(s)",
    "Count",
    "Errors",
    "OPS",
    "Avg(ms)",
    "Min(ms)",
    "Max(ms)",
];

/// Render a snapshot in the given style. The result has no trailing newline.
pub fn format_snapshot(
    snapshot: &MeasurementSnapshot,
    kind: ReportKind,
    style: OutputStyle,
) -> String {
    match style {
        OutputStyle::Plain => format_plain(snapshot, kind),
        OutputStyle::Table => format_table(snapshot, kind),
        OutputStyle::Json => serde_json::to_string(&JsonReport { kind, snapshot })
            .unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}")),
    }
}

fn format_plain(snapshot: &MeasurementSnapshot, kind: ReportKind) -> String {
    let mut out = String::new();
    for op in &snapshot.operations {
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = write!(
            out,
            "[{}] {} - Takes(s): {:.1}, Count: {}, OPS: {:.1}, Avg(ms): {:.1}, Min(ms): {:.1}, Max(ms): {:.1}, Errors: {}",
            kind.label(),
            op.operation,
            snapshot.elapsed_secs,
            op.count,
            op.ops_per_sec,
            op.avg_ms,
            op.min_ms,
            op.max_ms,
            op.errors,
        );
    }
    if out.is_empty() {
        out = format!(
            "[{}] no operations recorded - Takes(s): {:.1}",
            kind.label(),
            snapshot.elapsed_secs
        );
    }
    out
}

fn format_table(snapshot: &MeasurementSnapshot, kind: ReportKind) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(TABLE_HEADER.to_vec());

    for op in &snapshot.operations {
        table.add_row(vec![
            Cell::new(&op.operation),
            Cell::new(format!("{:.1}", snapshot.elapsed_secs)),
            Cell::new(op.count),
            Cell::new(op.errors),
            Cell::new(format!("{:.1}", op.ops_per_sec)),
            Cell::new(format!("{:.1}", op.avg_ms)),
            Cell::new(format!("{:.1}", op.min_ms)),
            Cell::new(format!("{:.1}", op.max_ms)),
        ]);
    }

    format!("[{}]\n{table}", kind.label())
}
