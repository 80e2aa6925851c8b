//! Single-reviewer judgement.

use std::sync::Arc;

use async_trait::async_trait;
use codegate_core::{CheckResult, Stage, VerificationRequest};

use crate::collaborators::Judge;

/// Score is the reviewer's confidence, `passed` its approval.
pub struct PeerReviewStage {
    name: String,
    reviewer: Arc<dyn Judge>,
}

impl PeerReviewStage {
    pub fn new(name: impl Into<String>, reviewer: Arc<dyn Judge>) -> Self {
        Self {
            name: name.into(),
            reviewer,
        }
    }
}

#[async_trait]
impl Stage for PeerReviewStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, request: &VerificationRequest) -> anyhow::Result<CheckResult> {
        let review = self.reviewer.review(request).await?;
        Ok(
            CheckResult::new(&self.name, review.approved, Some(review.confidence))
                .with_findings(review.issues),
        )
    }
}
