//! Verification report for one attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::request::VerificationRequest;
use super::result::CheckResult;

/// Outcome of one verification attempt.
///
/// `results` keeps registry order. An escalated terminal report has the same
/// shape as a verified one, with `requires_human_review` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub session_id: Uuid,
    pub request: VerificationRequest,
    pub timestamp: DateTime<Utc>,
    pub results: Vec<CheckResult>,
    pub overall_score: f64,
    pub verified: bool,
    pub attempt_number: u32,

    /// Ids of the earlier reports in the same session, oldest first.
    #[serde(default)]
    pub correction_history: Vec<Uuid>,

    #[serde(default)]
    pub requires_human_review: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<String>,
}

impl Report {
    pub fn new(
        session_id: Uuid,
        request: VerificationRequest,
        results: Vec<CheckResult>,
        overall_score: f64,
        verified: bool,
        attempt_number: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            request,
            timestamp: Utc::now(),
            results,
            overall_score,
            verified,
            attempt_number,
            correction_history: Vec::new(),
            requires_human_review: false,
            escalation_reason: None,
        }
    }

    pub fn with_history(mut self, history: Vec<Uuid>) -> Self {
        self.correction_history = history;
        self
    }

    /// Tag the report as the escalated end of a session.
    pub fn escalate(&mut self, reason: impl Into<String>) {
        self.requires_human_review = true;
        self.escalation_reason = Some(reason.into());
    }

    pub fn result(&self, stage_name: &str) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.stage_name == stage_name)
    }

    /// Findings of every non-passing stage, prefixed with the stage name.
    /// Stages that only failed because they were skipped contribute nothing.
    pub fn failure_findings(&self) -> Vec<String> {
        let mut out = Vec::new();
        for r in self.results.iter().filter(|r| !r.passed && !r.is_skipped()) {
            if r.findings.is_empty() {
                let detail = r.error.as_deref().unwrap_or("check failed");
                out.push(format!("{}: {}", r.stage_name, detail));
            }
            for finding in &r.findings {
                out.push(format!("{}: {}", r.stage_name, finding));
            }
        }
        out
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.passed_count()
    }
}
