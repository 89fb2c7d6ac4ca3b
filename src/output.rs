//! Output formatting utilities

use crate::error::Result;
use crate::monitor::MonitorResult;
use crate::report::{FailureKind, ReportSummary};
use crate::rule::{CheckResult, Outcome};
use crate::schema::ValidationResult;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One row of `tabrecon list`
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSummary {
    pub name: String,
    pub description: String,
    pub source: String,
    pub target: String,
    pub rule: String,
    pub schedule: String,
    pub next_fire: Option<DateTime<Utc>>,
    pub last_outcome: Option<Outcome>,
    pub last_run: Option<DateTime<Utc>>,
}

/// Pretty printer for tabrecon output
pub struct PrettyPrinter;

impl PrettyPrinter {
    /// Print every check followed by the summary
    pub fn print_report<R: AsRef<CheckResult>>(results: &[R], summary: &ReportSummary) {
        println!("📊 Reconciliation Report");
        for result in results {
            Self::print_check(result.as_ref(), "├─");
        }
        println!(
            "└─ {} check(s): {} passed, {} failed",
            summary.total, summary.passed, summary.failed
        );

        if !summary.failures.is_empty() {
            println!();
            println!("🟡 Failing checks:");
            for (i, failure) in summary.failures.iter().enumerate() {
                let prefix = if i == summary.failures.len() - 1 { "└─" } else { "├─" };
                let label = match failure.kind {
                    FailureKind::Inconsistent => "inconsistent",
                    FailureKind::CouldNotRun => "could not run",
                };
                println!("{} {} ({}): {}", prefix, failure.check_name, label, failure.message);
            }
        }
    }

    /// Print one check line plus its stats
    pub fn print_check(result: &CheckResult, prefix: &str) {
        let marker = match result.outcome {
            Outcome::Passed => "✅",
            Outcome::Failed => "❌",
            Outcome::Errored => "⚠️",
        };
        println!("{} {} {} [{}]", prefix, marker, result.check_name, result.rule);
        println!("│  └─ {}", result.message);

        let stats = &result.stats;
        if result.outcome != Outcome::Errored && !stats.counts_only && stats.diff_count() > 0 {
            println!(
                "│     only in source: {}, only in target: {}, changed: {}",
                stats.only_in_source, stats.only_in_target, stats.changed_count
            );
            if !stats.column_changes.is_empty() {
                let columns: Vec<String> = stats
                    .column_changes
                    .iter()
                    .map(|(column, count)| format!("{}={}", column, count))
                    .collect();
                println!("│     changed columns: {}", columns.join(", "));
            }
        }
    }

    /// Print registered monitors
    pub fn print_monitor_list(monitors: &[MonitorSummary]) {
        if monitors.is_empty() {
            println!("No monitors registered.");
            return;
        }

        println!("🕒 Monitors:");
        for (i, monitor) in monitors.iter().enumerate() {
            let last = i == monitors.len() - 1;
            let (prefix, indent) = if last { ("└─", "   ") } else { ("├─", "│  ") };
            println!("{} {} [{}] {} → {}", prefix, monitor.name, monitor.rule, monitor.source, monitor.target);
            if !monitor.description.is_empty() {
                println!("{}├─ {}", indent, monitor.description);
            }
            let next = monitor
                .next_fire
                .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "never".to_string());
            println!("{}├─ Schedule: {} (next: {})", indent, monitor.schedule, next);
            match (monitor.last_outcome, monitor.last_run) {
                (Some(outcome), Some(at)) => {
                    println!("{}└─ Last run: {} at {}", indent, outcome, at.format("%Y-%m-%d %H:%M:%S UTC"))
                }
                _ => println!("{}└─ Last run: none", indent),
            }
        }
    }

    /// Print a monitor's recorded results, newest last
    pub fn print_history(rule_name: &str, results: &[MonitorResult]) {
        if results.is_empty() {
            println!("No history recorded for '{}'.", rule_name);
            return;
        }

        println!("📜 History: {}", rule_name);
        for (i, result) in results.iter().enumerate() {
            let prefix = if i == results.len() - 1 { "└─" } else { "├─" };
            println!(
                "{} {} {} ({}) {}",
                prefix,
                result.started_at.format("%Y-%m-%d %H:%M:%S"),
                result.outcome(),
                format_duration(result.duration_ms),
                result.result.message
            );
        }
    }

    /// Print schema validation results
    pub fn print_validation(results: &[ValidationResult]) {
        for (i, result) in results.iter().enumerate() {
            let marker = if result.valid { "✅" } else { "❌" };
            println!("{} Record {}: {} ({})", marker, i + 1, result.schema_name, result.version);
            for (j, error) in result.errors.iter().enumerate() {
                let prefix = if j == result.errors.len() - 1 { "└─" } else { "├─" };
                println!("   {} {}", prefix, error);
            }
        }
    }
}

/// JSON formatter for machine-readable output
pub struct JsonFormatter;

impl JsonFormatter {
    /// Format any serializable data as JSON
    pub fn format<T: serde::Serialize + ?Sized>(data: &T) -> Result<String> {
        Ok(serde_json::to_string_pretty(data)?)
    }

    /// Results and summary in one document
    pub fn format_report<T: Serialize>(results: &[T], summary: &ReportSummary) -> Result<String> {
        let json = serde_json::json!({
            "summary": summary,
            "results": results,
        });
        Ok(serde_json::to_string_pretty(&json)?)
    }
}

/// Format milliseconds in human-readable form
pub fn format_duration(ms: u64) -> String {
    match ms {
        0..=999 => format!("{} ms", ms),
        1_000..=59_999 => format!("{:.1} s", ms as f64 / 1000.0),
        _ => format!("{}m {}s", ms / 60_000, (ms % 60_000) / 1000),
    }
}
