//! Collaborator contracts that stages delegate to.

use std::fmt;

use async_trait::async_trait;
use codegate_core::{TestCase, VerificationRequest};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// One issue reported by a security scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityFinding {
    pub rule: String,
    pub severity: Severity,
    /// 1-based line number, when known.
    pub line: Option<usize>,
    pub message: String,
}

impl fmt::Display for SecurityFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(
                f,
                "[{}] {} (line {}): {}",
                self.severity, self.rule, line, self.message
            ),
            None => write!(f, "[{}] {}: {}", self.severity, self.rule, self.message),
        }
    }
}

#[async_trait]
pub trait SecurityScanner: Send + Sync {
    async fn scan(&self, code: &str, language: &str) -> anyhow::Result<Vec<SecurityFinding>>;
}

/// Linter verdict: clean or not, plus its diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LintOutcome {
    pub clean: bool,
    pub diagnostics: Vec<String>,
}

#[async_trait]
pub trait Linter: Send + Sync {
    async fn lint(&self, code: &str, language: &str) -> anyhow::Result<LintOutcome>;
}

/// Result of one runtime test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseOutcome {
    pub name: String,
    pub passed: bool,
    pub actual: Option<String>,
    pub error: Option<String>,
}

impl CaseOutcome {
    pub fn describe_failure(&self, expected: &str) -> String {
        match (&self.error, &self.actual) {
            (Some(e), _) => format!("case `{}` errored: {}", self.name, e),
            (None, Some(actual)) => format!(
                "case `{}`: expected `{}`, got `{}`",
                self.name, expected, actual
            ),
            (None, None) => format!("case `{}` failed", self.name),
        }
    }
}

/// Executes one test case against candidate code in isolation.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run_case(
        &self,
        code: &str,
        language: &str,
        case: &TestCase,
    ) -> anyhow::Result<CaseOutcome>;
}

/// Requirement coverage assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    #[serde(default)]
    pub covered: Vec<String>,
    #[serde(default)]
    pub missing: Vec<String>,
    pub score: f64,
}

/// Reviewer verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    #[serde(alias = "verified")]
    pub approved: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    pub confidence: f64,
}

/// A model-backed assessor. Each stage uses one of the three tasks; a judge
/// that does not support a task returns an error for it.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn coverage(&self, _request: &VerificationRequest) -> anyhow::Result<Coverage> {
        anyhow::bail!("judge does not support coverage assessment")
    }

    async fn review(&self, _request: &VerificationRequest) -> anyhow::Result<Review> {
        anyhow::bail!("judge does not support review")
    }

    /// Does the code correctly implement the requirements?
    async fn vote(&self, _request: &VerificationRequest) -> anyhow::Result<bool> {
        anyhow::bail!("judge does not support voting")
    }
}
