//! Aggregation of check results into a run report

use crate::rule::{CheckResult, Outcome};
use serde::Serialize;

/// Why a check appears in the failure list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Ran and found an inconsistency
    Inconsistent,
    /// Could not complete
    CouldNotRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedCheck {
    pub check_name: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Counts plus the ordered failures of a set of checks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    /// Checks that did not pass, whether inconsistent or errored
    pub failed: usize,
    /// Subset of `failed` that could not run
    pub errored: usize,
    pub failures: Vec<FailedCheck>,
}

impl ReportSummary {
    /// Fold any sequence of results, keeping their order.
    pub fn from_results<I, R>(results: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: AsRef<CheckResult>,
    {
        results.into_iter().fold(Self::default(), |mut summary, result| {
            summary.add(result.as_ref());
            summary
        })
    }

    pub fn add(&mut self, result: &CheckResult) {
        self.total += 1;
        let kind = match result.outcome {
            Outcome::Passed => {
                self.passed += 1;
                return;
            }
            Outcome::Failed => FailureKind::Inconsistent,
            Outcome::Errored => {
                self.errored += 1;
                FailureKind::CouldNotRun
            }
        };
        self.failed += 1;
        self.failures.push(FailedCheck {
            check_name: result.check_name.clone(),
            kind,
            message: result.message.clone(),
        });
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    /// Process exit status: 0 when every check passed
    pub fn exit_code(&self) -> i32 {
        if self.all_passed() {
            0
        } else {
            1
        }
    }
}
