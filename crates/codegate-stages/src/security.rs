//! Security stage and the built-in rule scanner.

use std::sync::Arc;

use async_trait::async_trait;
use codegate_core::{CheckResult, Stage, VerificationRequest};
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::collaborators::{SecurityFinding, SecurityScanner, Severity};

/// Hosts that may be reached over plain HTTP.
const LOCAL_HOSTS: &[&str] = &["localhost", "127.0.0.1", "0.0.0.0", "[::1]"];

/// XML namespace URIs are identifiers, not endpoints.
const NAMESPACE_HOSTS: &[&str] = &["www.w3.org"];

/// A user-supplied scanner rule.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    pub id: String,
    pub severity: Severity,
    pub pattern: String,
    pub message: String,
}

struct Rule {
    id: String,
    severity: Severity,
    message: String,
    regex: Regex,
    /// Capture group 1 is a host checked against `LOCAL_HOSTS`.
    remote_host_only: bool,
}

const BUILTIN_RULES: &[(&str, Severity, &str, &str)] = &[
    (
        "hardcoded-secret",
        Severity::High,
        "hard-coded credential literal",
        r#"(?i)\b(?:api[_-]?key|secret(?:[_-]?key)?|password|passwd|pwd|auth[_-]?token|access[_-]?token|token)\b["']?\s*[:=]\s*["'][^"'\s]{4,}["']"#,
    ),
    (
        "private-key",
        Severity::Critical,
        "embedded private key",
        r"-----BEGIN (?:RSA |EC |DSA |OPENSSH |ENCRYPTED )?PRIVATE KEY-----",
    ),
    (
        "aws-access-key",
        Severity::Critical,
        "AWS access key id",
        r"\bAKIA[0-9A-Z]{16}\b",
    ),
    (
        "dynamic-eval",
        Severity::High,
        "dynamic code evaluation via eval()",
        r"(?:^|[^.\w])eval\s*\(",
    ),
    (
        "dynamic-function",
        Severity::High,
        "dynamic code evaluation via new Function()",
        r"\bnew\s+Function\s*\(",
    ),
    (
        "dynamic-exec",
        Severity::High,
        "dynamic code execution via exec()",
        r"(?:^|[^.\w])exec\s*\(",
    ),
    (
        "unsafe-html",
        Severity::Medium,
        "assignment to innerHTML",
        r"\.(?:inner|outer)HTML\s*\+?=",
    ),
    (
        "unsafe-html",
        Severity::Medium,
        "v-html renders unescaped markup",
        r"\bv-html\s*=",
    ),
    (
        "unsafe-html",
        Severity::Medium,
        "dangerouslySetInnerHTML renders unescaped markup",
        r"\bdangerouslySetInnerHTML\b",
    ),
    (
        "unsafe-html",
        Severity::Medium,
        "document.write injects markup",
        r"\bdocument\.write(?:ln)?\s*\(",
    ),
    (
        "shell-injection",
        Severity::High,
        "subprocess call with shell=True",
        r"\bsubprocess\.\w+\([^)]*\bshell\s*=\s*True",
    ),
    (
        "shell-injection",
        Severity::High,
        "os.system runs a shell command",
        r"\bos\.system\s*\(",
    ),
];

const INSECURE_TRANSPORT: &str = r"\bhttp://([A-Za-z0-9.\-_]+|\[[0-9a-fA-F:]+\])";

/// Line-oriented regex scanner for common vulnerability markers.
pub struct RuleSecurityScanner {
    rules: Vec<Rule>,
}

impl RuleSecurityScanner {
    pub fn new() -> anyhow::Result<Self> {
        let mut rules = Vec::with_capacity(BUILTIN_RULES.len() + 1);
        for (id, severity, message, pattern) in BUILTIN_RULES {
            rules.push(Rule {
                id: (*id).to_string(),
                severity: *severity,
                message: (*message).to_string(),
                regex: Regex::new(pattern)?,
                remote_host_only: false,
            });
        }
        rules.push(Rule {
            id: "insecure-transport".to_string(),
            severity: Severity::Medium,
            message: "plain HTTP endpoint".to_string(),
            regex: Regex::new(INSECURE_TRANSPORT)?,
            remote_host_only: true,
        });
        Ok(Self { rules })
    }

    pub fn with_rule(mut self, spec: RuleSpec) -> anyhow::Result<Self> {
        let regex = Regex::new(&spec.pattern)
            .map_err(|e| anyhow::anyhow!("invalid pattern for rule {}: {e}", spec.id))?;
        self.rules.push(Rule {
            id: spec.id,
            severity: spec.severity,
            message: spec.message,
            regex,
            remote_host_only: false,
        });
        Ok(self)
    }

    pub fn scan_source(&self, code: &str) -> Vec<SecurityFinding> {
        let mut findings = Vec::new();
        for (idx, line) in code.lines().enumerate() {
            for rule in &self.rules {
                let hit = if rule.remote_host_only {
                    rule.regex.captures_iter(line).any(|caps| {
                        caps.get(1).is_some_and(|host| {
                            let host = host.as_str().to_ascii_lowercase();
                            !LOCAL_HOSTS.contains(&host.as_str())
                                && !NAMESPACE_HOSTS.contains(&host.as_str())
                        })
                    })
                } else {
                    rule.regex.is_match(line)
                };
                if hit {
                    findings.push(SecurityFinding {
                        rule: rule.id.clone(),
                        severity: rule.severity,
                        line: Some(idx + 1),
                        message: rule.message.clone(),
                    });
                }
            }
        }
        findings
    }
}

#[async_trait]
impl SecurityScanner for RuleSecurityScanner {
    async fn scan(&self, code: &str, _language: &str) -> anyhow::Result<Vec<SecurityFinding>> {
        Ok(self.scan_source(code))
    }
}

/// Passes iff the scanner reports no issues. Carries no score of its own.
pub struct SecurityStage {
    name: String,
    scanner: Arc<dyn SecurityScanner>,
}

impl SecurityStage {
    pub fn new(name: impl Into<String>, scanner: Arc<dyn SecurityScanner>) -> Self {
        Self {
            name: name.into(),
            scanner,
        }
    }

    /// Security stage backed by `RuleSecurityScanner`.
    pub fn with_builtin_rules(name: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self::new(name, Arc::new(RuleSecurityScanner::new()?)))
    }
}

#[async_trait]
impl Stage for SecurityStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, request: &VerificationRequest) -> anyhow::Result<CheckResult> {
        let issues = self
            .scanner
            .scan(&request.code, &request.requirements.language)
            .await?;
        debug!(issues = issues.len(), "security scan complete");
        Ok(CheckResult::new(&self.name, issues.is_empty(), None)
            .with_findings(issues.iter().map(ToString::to_string).collect()))
    }
}
