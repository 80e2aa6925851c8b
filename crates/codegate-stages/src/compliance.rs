//! Requirement coverage, optionally blended with similarity to a design
//! reference.

use std::sync::Arc;

use async_trait::async_trait;
use codegate_core::{aggregator::SCORE_EPSILON, CheckResult, Stage, VerificationRequest};
use tracing::debug;

use crate::collaborators::Judge;

pub const DEFAULT_MIN_SCORE: f64 = 0.85;

pub struct SpecComplianceStage {
    name: String,
    judge: Arc<dyn Judge>,
    min_score: f64,
}

impl SpecComplianceStage {
    pub fn new(name: impl Into<String>, judge: Arc<dyn Judge>) -> Self {
        Self {
            name: name.into(),
            judge,
            min_score: DEFAULT_MIN_SCORE,
        }
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }
}

#[async_trait]
impl Stage for SpecComplianceStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, request: &VerificationRequest) -> anyhow::Result<CheckResult> {
        let coverage = self.judge.coverage(request).await?;
        let mut score = coverage.score.clamp(0.0, 1.0);
        let mut findings: Vec<String> = coverage
            .missing
            .iter()
            .map(|item| format!("unmet requirement: {item}"))
            .collect();

        if let Some(reference) = &request.requirements.design_reference {
            let similarity = line_similarity(&request.code, reference);
            debug!(coverage = score, similarity, "blending design reference similarity");
            if similarity + SCORE_EPSILON < self.min_score {
                findings.push(format!(
                    "structure diverges from design reference (similarity {similarity:.2})"
                ));
            }
            score = (score + similarity) / 2.0;
        }

        let passed = score + SCORE_EPSILON >= self.min_score;
        Ok(CheckResult::new(&self.name, passed, Some(score)).with_findings(findings))
    }
}

/// Line-level similarity ratio: `2 * M / T`, where `M` is the length of the
/// longest common subsequence of non-blank trimmed lines and `T` the total
/// number of such lines in both inputs. Two empty inputs are identical.
pub fn line_similarity(a: &str, b: &str) -> f64 {
    let left: Vec<&str> = a.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let right: Vec<&str> = b.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let total = left.len() + right.len();
    if total == 0 {
        return 1.0;
    }

    let mut prev = vec![0usize; right.len() + 1];
    let mut curr = vec![0usize; right.len() + 1];
    for l in &left {
        for (j, r) in right.iter().enumerate() {
            curr[j + 1] = if l == r {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    2.0 * prev[right.len()] as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Coverage;
    use codegate_core::Requirements;

    struct FixedCoverage(f64, Vec<&'static str>);

    #[async_trait]
    impl Judge for FixedCoverage {
        async fn coverage(&self, _request: &VerificationRequest) -> anyhow::Result<Coverage> {
            Ok(Coverage {
                covered: Vec::new(),
                missing: self.1.iter().map(|s| s.to_string()).collect(),
                score: self.0,
            })
        }
    }

    #[test]
    fn similarity_ratio() {
        assert_eq!(line_similarity("", ""), 1.0);
        assert_eq!(line_similarity("a\nb\nc", "a\nb\nc"), 1.0);
        assert_eq!(line_similarity("a\nb", "c\nd"), 0.0);
        // LCS of [a, b, c, d] and [a, c, d, e] is [a, c, d]: 2*3/8
        assert!((line_similarity("a\nb\nc\nd", "a\nc\nd\ne") - 0.75).abs() < 1e-12);
        // indentation and blank lines are ignored
        assert_eq!(line_similarity("  a\n\n b", "a\nb\n"), 1.0);
    }

    #[tokio::test]
    async fn coverage_alone() {
        let stage = SpecComplianceStage::new("spec_compliance", Arc::new(FixedCoverage(0.9, vec![])));
        let req = VerificationRequest::new("code", Requirements::new("vue"));
        let result = stage.check(&req).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.score, Some(0.9));
    }

    #[tokio::test]
    async fn missing_items_become_findings() {
        let stage = SpecComplianceStage::new(
            "spec_compliance",
            Arc::new(FixedCoverage(0.5, vec!["email validation"])),
        );
        let req = VerificationRequest::new("code", Requirements::new("vue"));
        let result = stage.check(&req).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.findings, vec!["unmet requirement: email validation"]);
    }

    #[tokio::test]
    async fn blends_design_reference() {
        let stage = SpecComplianceStage::new("spec_compliance", Arc::new(FixedCoverage(1.0, vec![])));
        let reqs = Requirements::new("vue").with_design_reference("a\nb\nc\nd");
        let req = VerificationRequest::new("a\nc\nd\ne", reqs);
        let result = stage.check(&req).await.unwrap();
        // (1.0 + 0.75) / 2
        assert!((result.score.unwrap() - 0.875).abs() < 1e-12);
        assert!(result.passed);
        assert_eq!(result.findings.len(), 1);
    }

    #[tokio::test]
    async fn threshold_is_configurable() {
        let stage = SpecComplianceStage::new("spec_compliance", Arc::new(FixedCoverage(0.6, vec![])))
            .with_min_score(0.5);
        let req = VerificationRequest::new("code", Requirements::new("vue"));
        assert!(stage.check(&req).await.unwrap().passed);
    }

    #[tokio::test]
    async fn judge_error_propagates() {
        struct NoCoverage;
        #[async_trait]
        impl Judge for NoCoverage {}

        let stage = SpecComplianceStage::new("spec_compliance", Arc::new(NoCoverage));
        let req = VerificationRequest::new("code", Requirements::new("vue"));
        assert!(stage.check(&req).await.is_err());
    }
}
