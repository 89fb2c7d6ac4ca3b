//! Threshold rules and check evaluation

use crate::engine::DiffStats;
use crate::error::{DiffError, ReconError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Comparison operator of a threshold rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl Operator {
    /// `metric <op> threshold`; GTE/LTE are inclusive at the boundary.
    pub fn apply(self, metric: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => metric > threshold,
            Self::Gte => metric >= threshold,
            Self::Lt => metric < threshold,
            Self::Lte => metric <= threshold,
            Self::Eq => metric == threshold,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Eq => "==",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gt" | ">" => Ok(Self::Gt),
            "gte" | ">=" => Ok(Self::Gte),
            "lt" | "<" => Ok(Self::Lt),
            "lte" | "<=" => Ok(Self::Lte),
            "eq" | "==" | "=" => Ok(Self::Eq),
            other => Err(format!("Invalid operator: {}. Use gt, gte, lt, lte or eq", other)),
        }
    }
}

/// Success predicate over [`DiffStats`].
///
/// Threshold variants describe the alert condition: the check fails when
/// `metric <operator> value` holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rule {
    /// No differences and equal row totals
    ExactMatch,
    #[serde(rename = "diff_count")]
    DiffCountThreshold { operator: Operator, value: f64 },
    #[serde(rename = "diff_percent")]
    DiffPercentThreshold { operator: Operator, value: f64 },
    #[serde(rename = "row_count_delta")]
    RowCountDeltaThreshold { operator: Operator, value: f64 },
}

impl Rule {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ExactMatch => Ok(()),
            Self::DiffCountThreshold { value, .. }
            | Self::DiffPercentThreshold { value, .. }
            | Self::RowCountDeltaThreshold { value, .. } => {
                if !value.is_finite() || *value < 0.0 {
                    return Err(ReconError::config(format!(
                        "threshold for {} must be a finite, non-negative number (got {})",
                        self.metric_name(),
                        value
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn metric_name(&self) -> &'static str {
        match self {
            Self::ExactMatch => "exact_match",
            Self::DiffCountThreshold { .. } => "diff_count",
            Self::DiffPercentThreshold { .. } => "diff_percent",
            Self::RowCountDeltaThreshold { .. } => "row_count_delta",
        }
    }

    /// Whether the rule can be decided from row totals alone
    pub fn needs_key_diff(&self) -> bool {
        !matches!(self, Self::RowCountDeltaThreshold { .. })
    }

    /// Pass/fail plus explanation. Pure and total.
    pub fn verdict(&self, stats: &DiffStats) -> Verdict {
        let summary = summarize(stats);
        match self {
            Self::ExactMatch => {
                let passed = stats.diff_count() == 0 && stats.rows_source == stats.rows_target;
                let message = if passed {
                    format!("{}: exact match", summary)
                } else {
                    format!("{}: expected an exact match", summary)
                };
                Verdict { passed, message }
            }
            Self::DiffCountThreshold { operator, value } => {
                threshold_verdict(&summary, "diff_count", stats.diff_count() as f64, *operator, *value, "")
            }
            Self::DiffPercentThreshold { operator, value } => {
                threshold_verdict(&summary, "diff_percent", stats.diff_percent(), *operator, *value, "%")
            }
            Self::RowCountDeltaThreshold { operator, value } => threshold_verdict(
                &summary,
                "row_count_delta",
                stats.row_count_delta() as f64,
                *operator,
                *value,
                "",
            ),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExactMatch => f.write_str("exact_match"),
            Self::DiffCountThreshold { operator, value }
            | Self::DiffPercentThreshold { operator, value }
            | Self::RowCountDeltaThreshold { operator, value } => {
                write!(f, "{} {} {}", self.metric_name(), operator, value)
            }
        }
    }
}

impl FromStr for Rule {
    type Err = String;

    /// `exact`, or `<metric><op><value>` such as `diff_percent>0.1`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let text = s.trim();
        if matches!(text.to_lowercase().as_str(), "exact" | "exact_match") {
            return Ok(Self::ExactMatch);
        }

        let op_start = text
            .find(|c: char| matches!(c, '>' | '<' | '='))
            .ok_or_else(|| format!("Invalid rule: {}. Use 'exact' or e.g. 'diff_percent>0.1'", text))?;
        let (metric, rest) = text.split_at(op_start);
        let op_len = rest
            .find(|c: char| !matches!(c, '>' | '<' | '='))
            .unwrap_or(rest.len());
        let (op, value) = rest.split_at(op_len);

        let operator: Operator = op.parse()?;
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| format!("Invalid threshold value in rule: {}", text))?;

        let rule = match metric.trim().to_lowercase().as_str() {
            "diff_count" => Self::DiffCountThreshold { operator, value },
            "diff_percent" => Self::DiffPercentThreshold { operator, value },
            "row_count_delta" | "row_count_diff" => Self::RowCountDeltaThreshold { operator, value },
            other => return Err(format!("Unknown rule metric: {}", other)),
        };
        rule.validate().map_err(|e| e.to_string())?;
        Ok(rule)
    }
}

/// Outcome of a rule applied to stats
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub passed: bool,
    pub message: String,
}

fn summarize(stats: &DiffStats) -> String {
    if stats.counts_only {
        format!(
            "source {} rows, target {} rows, delta {}",
            stats.rows_source,
            stats.rows_target,
            stats.row_count_delta()
        )
    } else {
        format!(
            "source {} rows, target {} rows, {} difference(s) ({:.2}%)",
            stats.rows_source,
            stats.rows_target,
            stats.diff_count(),
            stats.diff_percent()
        )
    }
}

fn threshold_verdict(summary: &str, metric: &str, observed: f64, operator: Operator, value: f64, unit: &str) -> Verdict {
    let triggered = operator.apply(observed, value);
    let message = if triggered {
        format!(
            "{}: {} {}{} {} {}{} threshold breached",
            summary, metric, observed, unit, operator, value, unit
        )
    } else {
        format!(
            "{}: {} {}{} within threshold (alerts when {} {}{})",
            summary, metric, observed, unit, operator, value, unit
        )
    };
    Verdict {
        passed: !triggered,
        message,
    }
}

/// Final state of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Ran and the rule held
    Passed,
    /// Ran and found an inconsistency
    Failed,
    /// Could not run
    Errored,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Errored => "error",
        })
    }
}

/// Immutable result of one check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check_name: String,
    pub rule: Rule,
    pub outcome: Outcome,
    pub stats: DiffStats,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DiffError>,
    pub timestamp: DateTime<Utc>,
}

impl CheckResult {
    /// A check that could not complete. Stats are left zeroed.
    pub fn errored(check_name: impl Into<String>, rule: &Rule, error: DiffError, timestamp: DateTime<Utc>) -> Self {
        Self {
            check_name: check_name.into(),
            rule: rule.clone(),
            outcome: Outcome::Errored,
            stats: DiffStats::default(),
            message: format!("could not run: {}", error),
            error: Some(error),
            timestamp,
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}

impl AsRef<CheckResult> for CheckResult {
    fn as_ref(&self) -> &CheckResult {
        self
    }
}

/// Apply `rule` to `stats`. Never fails; identical inputs give identical results.
pub fn evaluate(check_name: &str, stats: &DiffStats, rule: &Rule, timestamp: DateTime<Utc>) -> CheckResult {
    let verdict = rule.verdict(stats);
    CheckResult {
        check_name: check_name.to_string(),
        rule: rule.clone(),
        outcome: if verdict.passed {
            Outcome::Passed
        } else {
            Outcome::Failed
        },
        stats: stats.clone(),
        message: verdict.message,
        error: None,
        timestamp,
    }
}
