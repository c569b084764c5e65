//! Plain-text rendering of cases, movements and batch reports.

use chrono::{DateTime, FixedOffset, Utc};
use judsync_core::{Case, Movement};
use judsync_sync::BatchReport;

const DESCRIPTION_WIDTH: usize = 100;

// ── Public API ──

/// Print a case as a short card followed by its movement history.
pub fn print_case(case: &Case, movements: &[Movement], limit: usize, tz: FixedOffset) {
    for line in case_card(case, tz) {
        println!("{line}");
    }
    println!();
    println!("Movements ({})", movements.len());
    for line in movement_lines(movements, limit, tz) {
        println!("{line}");
    }
}

pub fn print_batch_report(report: &BatchReport) {
    if report.disabled {
        println!("batch disabled, nothing to do");
        return;
    }
    if report.aborted {
        println!("batch aborted, see log for details");
        return;
    }
    println!("Batch");
    row("selected", report.selected);
    row("processed", report.processed);
    row("query errors", report.query_errors);
    row("failed", report.failed);
    row("new movements", report.new_movements);
    row("pauses", report.pauses);
}

// ── Rendering ──

fn row(label: &str, value: impl std::fmt::Display) {
    println!("  {label:<26} {value}");
}

fn case_card(case: &Case, tz: FixedOffset) -> Vec<String> {
    let number = case
        .process_number
        .as_ref()
        .map(|n| n.as_str())
        .unwrap_or("(none)");
    vec![
        format!("=== Case {} ===", case.id),
        format!("  {:<26} {}", "process_number", number),
        format!(
            "  {:<26} {}",
            "status",
            case.status.as_deref().unwrap_or("(none)")
        ),
        format!("  {:<26} {}", "updated_at", local(case.updated_at, tz)),
        format!(
            "  {:<26} {}",
            "last_checked_at",
            case.last_checked_at
                .map(|at| local(at, tz))
                .unwrap_or_else(|| "never".into())
        ),
    ]
}

fn movement_lines(movements: &[Movement], limit: usize, tz: FixedOffset) -> Vec<String> {
    let mut lines: Vec<String> = movements
        .iter()
        .take(limit)
        .map(|m| format!("  {}  {}", local(m.occurred_at, tz), clip(&m.description)))
        .collect();
    if movements.len() > limit {
        lines.push(format!("  ... and {} more", movements.len() - limit));
    }
    lines
}

fn local(at: DateTime<Utc>, tz: FixedOffset) -> String {
    at.with_timezone(&tz).format("%Y-%m-%d %H:%M").to_string()
}

fn clip(s: &str) -> String {
    match s.char_indices().nth(DESCRIPTION_WIDTH) {
        Some((i, _)) => format!("{}…", &s[..i]),
        None => s.to_string(),
    }
}
