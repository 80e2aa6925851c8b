//! Structural marker presence.

use async_trait::async_trait;
use codegate_core::{CheckResult, Stage, VerificationRequest};
use regex::Regex;

/// Prefix marking a required pattern as a regular expression.
pub const REGEX_PREFIX: &str = "re:";

/// Every entry of `requirements.patterns` must occur in the code.
pub struct PatternStage {
    name: String,
}

impl Default for PatternStage {
    fn default() -> Self {
        Self::new("pattern")
    }
}

impl PatternStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

enum Marker<'a> {
    Literal(&'a str),
    Regex(Regex),
    Invalid(&'a str, regex::Error),
}

impl<'a> Marker<'a> {
    fn parse(pattern: &'a str) -> Self {
        match pattern.strip_prefix(REGEX_PREFIX) {
            Some(expr) => match Regex::new(expr) {
                Ok(re) => Marker::Regex(re),
                Err(e) => Marker::Invalid(expr, e),
            },
            None => Marker::Literal(pattern),
        }
    }

    fn matches(&self, code: &str) -> bool {
        match self {
            Marker::Literal(s) => code.contains(s),
            Marker::Regex(re) => re.is_match(code),
            Marker::Invalid(..) => false,
        }
    }
}

#[async_trait]
impl Stage for PatternStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, request: &VerificationRequest) -> anyhow::Result<CheckResult> {
        let patterns = &request.requirements.patterns;
        if patterns.is_empty() {
            return Ok(CheckResult::pass(&self.name));
        }

        let mut findings = Vec::new();
        let mut matched = 0usize;
        for pattern in patterns {
            let marker = Marker::parse(pattern);
            if marker.matches(&request.code) {
                matched += 1;
                continue;
            }
            findings.push(match marker {
                Marker::Invalid(expr, e) => format!("invalid pattern `{expr}`: {e}"),
                _ => format!("missing required pattern `{pattern}`"),
            });
        }

        let score = matched as f64 / patterns.len() as f64;
        Ok(CheckResult::new(&self.name, findings.is_empty(), Some(score)).with_findings(findings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codegate_core::Requirements;

    fn request(code: &str, patterns: &[&str]) -> VerificationRequest {
        let reqs = patterns
            .iter()
            .fold(Requirements::new("vue"), |r, p| r.with_pattern(*p));
        VerificationRequest::new(code, reqs)
    }

    #[tokio::test]
    async fn missing_marker_scores_zero() {
        let result = PatternStage::default()
            .check(&request("<script>export default {}</script>", &["<template>"]))
            .await
            .unwrap();
        assert!(!result.passed);
        assert_eq!(result.score, Some(0.0));
        assert_eq!(result.findings, vec!["missing required pattern `<template>`"]);
    }

    #[tokio::test]
    async fn partial_match_scores_fraction() {
        let result = PatternStage::default()
            .check(&request(
                "<template><form></form></template>",
                &["<template>", "<form", "re:v-model=\"\\w+\"", "<script"],
            ))
            .await
            .unwrap();
        assert!(!result.passed);
        assert_eq!(result.score, Some(0.5));
        assert_eq!(result.findings.len(), 2);
    }

    #[tokio::test]
    async fn regex_markers() {
        let result = PatternStage::default()
            .check(&request(
                "<input v-model=\"email\">",
                &["re:v-model=\"\\w+\"", "re:<input\\b"],
            ))
            .await
            .unwrap();
        assert!(result.passed);
        assert_eq!(result.score, Some(1.0));
    }

    #[tokio::test]
    async fn invalid_regex_is_a_finding() {
        let result = PatternStage::default()
            .check(&request("anything", &["re:(unclosed"]))
            .await
            .unwrap();
        assert!(!result.passed);
        assert!(result.findings[0].starts_with("invalid pattern `(unclosed`"));
    }

    #[tokio::test]
    async fn no_patterns_passes() {
        let result = PatternStage::default()
            .check(&request("", &[]))
            .await
            .unwrap();
        assert!(result.passed);
        assert_eq!(result.score, Some(1.0));
    }
}
