//! Per-stage check outcome.

use serde::{Deserialize, Serialize};

/// Error recorded on every stage skipped after a blocking failure.
pub const SKIPPED_BLOCKING: &str = "skipped: blocking syntax failure";

/// Error recorded when a stage exceeds its timeout.
pub const TIMEOUT: &str = "timeout";

/// Prefix of the error recorded when a stage errors or panics.
pub const CRASHED_PREFIX: &str = "crashed: ";

/// Outcome of one stage for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub stage_name: String,
    pub passed: bool,

    /// Score in [0, 1]; `None` means the stage is pass/fail only.
    pub score: Option<f64>,

    #[serde(default)]
    pub findings: Vec<String>,

    /// Why the stage could not complete normally (timeout, crash, skip).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Set when this failure blocks verification regardless of score.
    #[serde(default)]
    pub blocking: bool,
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

impl CheckResult {
    /// Build a result, clamping `score` into [0, 1].
    pub fn new(stage_name: impl Into<String>, passed: bool, score: Option<f64>) -> Self {
        Self {
            stage_name: stage_name.into(),
            passed,
            score: score.map(clamp_score),
            findings: Vec::new(),
            error: None,
            blocking: false,
        }
    }

    pub fn pass(stage_name: impl Into<String>) -> Self {
        Self::new(stage_name, true, Some(1.0))
    }

    pub fn fail(stage_name: impl Into<String>, findings: Vec<String>) -> Self {
        Self::new(stage_name, false, Some(0.0)).with_findings(findings)
    }

    /// A failure that blocks the whole attempt (e.g. unparseable code).
    pub fn blocking_failure(stage_name: impl Into<String>, findings: Vec<String>) -> Self {
        let mut result = Self::fail(stage_name, findings);
        result.blocking = true;
        result
    }

    pub fn skipped(stage_name: impl Into<String>) -> Self {
        Self::new(stage_name, false, Some(0.0)).with_error(SKIPPED_BLOCKING)
    }

    pub fn timed_out(stage_name: impl Into<String>) -> Self {
        Self::new(stage_name, false, Some(0.0)).with_error(TIMEOUT)
    }

    pub fn crashed(stage_name: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self::new(stage_name, false, Some(0.0)).with_error(format!("{CRASHED_PREFIX}{detail}"))
    }

    pub fn with_findings(mut self, findings: Vec<String>) -> Self {
        self.findings = findings;
        self
    }

    pub fn with_finding(mut self, finding: impl Into<String>) -> Self {
        self.findings.push(finding.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Score used for aggregation: the explicit score, or 1/0 by `passed`.
    pub fn effective_score(&self) -> f64 {
        match self.score {
            Some(s) => clamp_score(s),
            None if self.passed => 1.0,
            None => 0.0,
        }
    }

    pub fn is_blocking_failure(&self) -> bool {
        self.blocking && !self.passed
    }

    pub fn is_skipped(&self) -> bool {
        self.error.as_deref() == Some(SKIPPED_BLOCKING)
    }
}
