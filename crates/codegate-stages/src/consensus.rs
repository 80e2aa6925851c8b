//! Cross-model voting.

use std::sync::Arc;

use async_trait::async_trait;
use codegate_core::{CheckResult, Stage, VerificationRequest};
use futures::future::join_all;
use tracing::warn;

use crate::collaborators::Judge;

/// Fraction of "yes" votes needed to pass.
pub const CONSENSUS_QUORUM: f64 = 0.5;

/// Asks every judge concurrently whether the code implements the
/// requirements. A judge that errors counts as a "no" and adds a finding.
pub struct ConsensusStage {
    name: String,
    judges: Vec<(String, Arc<dyn Judge>)>,
}

impl ConsensusStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            judges: Vec::new(),
        }
    }

    pub fn with_judge(mut self, label: impl Into<String>, judge: Arc<dyn Judge>) -> Self {
        self.judges.push((label.into(), judge));
        self
    }
}

#[async_trait]
impl Stage for ConsensusStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, request: &VerificationRequest) -> anyhow::Result<CheckResult> {
        if self.judges.is_empty() {
            anyhow::bail!("consensus stage has no judges");
        }

        let votes = join_all(self.judges.iter().map(|(_, j)| j.vote(request))).await;

        let mut yes = 0usize;
        let mut findings = Vec::new();
        for ((label, _), vote) in self.judges.iter().zip(votes) {
            match vote {
                Ok(true) => yes += 1,
                Ok(false) => findings.push(format!("judge `{label}` voted no")),
                Err(e) => {
                    warn!(judge = %label, error = %e, "judge failed to vote");
                    findings.push(format!("judge `{label}` failed: {e}"));
                }
            }
        }

        let score = yes as f64 / self.judges.len() as f64;
        Ok(CheckResult::new(&self.name, score >= CONSENSUS_QUORUM, Some(score)).with_findings(findings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codegate_core::Requirements;

    struct Vote(Option<bool>);

    #[async_trait]
    impl Judge for Vote {
        async fn vote(&self, _request: &VerificationRequest) -> anyhow::Result<bool> {
            self.0.ok_or_else(|| anyhow::anyhow!("model unavailable"))
        }
    }

    fn stage(votes: &[Option<bool>]) -> ConsensusStage {
        votes
            .iter()
            .enumerate()
            .fold(ConsensusStage::new("consensus"), |s, (i, v)| {
                s.with_judge(format!("model-{i}"), Arc::new(Vote(*v)))
            })
    }

    fn request() -> VerificationRequest {
        VerificationRequest::new("code", Requirements::new("vue"))
    }

    #[tokio::test]
    async fn majority_passes() {
        let result = stage(&[Some(true), Some(true), Some(false)])
            .check(&request())
            .await
            .unwrap();
        assert!(result.passed);
        assert!((result.score.unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(result.findings, vec!["judge `model-2` voted no"]);
    }

    #[tokio::test]
    async fn even_split_passes() {
        let result = stage(&[Some(true), Some(false)])
            .check(&request())
            .await
            .unwrap();
        assert!(result.passed);
        assert_eq!(result.score, Some(0.5));
    }

    #[tokio::test]
    async fn failing_judge_counts_as_no() {
        let result = stage(&[Some(true), None, None])
            .check(&request())
            .await
            .unwrap();
        assert!(!result.passed);
        assert!((result.score.unwrap() - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(result.findings.len(), 2);
        assert!(result.findings[0].contains("model unavailable"));
    }

    #[tokio::test]
    async fn no_judges_is_error() {
        assert!(ConsensusStage::new("consensus").check(&request()).await.is_err());
    }
}
