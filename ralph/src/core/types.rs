//! Shared deterministic types for the build loop.
//!
//! These types define stable contracts between components and are serialized
//! into iteration artifacts, so field names must stay stable.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result of one machine-checkable criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    /// Criterion text as written in the backlog.
    pub criterion: String,
    pub passed: bool,
    /// Human-readable explanation (e.g. "missing file docs/a.txt").
    pub detail: String,
}

/// Outcome of verifying one story against the working tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub passed: bool,
    /// Outcomes for machine-checkable criteria, in backlog order.
    pub details: Vec<CheckOutcome>,
    /// Descriptive criteria that were not executed.
    pub notes: usize,
}

impl VerificationResult {
    /// True when the story had no machine-checkable criterion at all.
    pub fn unchecked(&self) -> bool {
        self.details.is_empty()
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.details.iter().filter(|check| !check.passed)
    }

    pub fn passed_count(&self) -> usize {
        self.details.iter().filter(|check| check.passed).count()
    }
}

/// Result of running the quality gates after an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateOutcome {
    /// Every gate succeeded (or the backlog declares none).
    Pass,
    /// A gate failed or timed out.
    Fail,
    /// Gates were not run because the story already failed.
    Skipped,
}

impl fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GateOutcome::Pass => "pass",
            GateOutcome::Fail => "fail",
            GateOutcome::Skipped => "skipped",
        })
    }
}

/// Result of a single gate command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateResult {
    pub command: String,
    pub passed: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

/// Aggregate gate result for one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateReport {
    pub outcome: GateOutcome,
    pub results: Vec<GateResult>,
}

impl GateReport {
    pub fn skipped() -> Self {
        Self {
            outcome: GateOutcome::Skipped,
            results: Vec::new(),
        }
    }

    pub fn first_failure(&self) -> Option<&GateResult> {
        self.results.iter().find(|result| !result.passed)
    }
}

/// What the commit manager did for a story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommitOutcome {
    /// Commits were disabled for this run.
    Disabled,
    /// Story did not reach `done`, so nothing was committed.
    Skipped,
    Committed { sha: String },
    Failed { message: String },
}

impl fmt::Display for CommitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitOutcome::Disabled => f.write_str("disabled"),
            CommitOutcome::Skipped => f.write_str("skipped"),
            CommitOutcome::Committed { sha } => f.write_str(sha),
            CommitOutcome::Failed { message } => write!(f, "error: {message}"),
        }
    }
}

/// Final classification of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationResult {
    Pass,
    Fail,
    Interrupted,
    /// Run-level failure while the story was in flight; the story went back to `open`.
    Aborted,
}

impl IterationResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            IterationResult::Pass => "pass",
            IterationResult::Fail => "fail",
            IterationResult::Interrupted => "interrupted",
            IterationResult::Aborted => "aborted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pass" => Some(IterationResult::Pass),
            "fail" => Some(IterationResult::Fail),
            "interrupted" => Some(IterationResult::Interrupted),
            "aborted" => Some(IterationResult::Aborted),
            _ => None,
        }
    }
}

impl fmt::Display for IterationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
