//! Corrector contract and the retry-once call policy.
//!
//! The corrector is the external code generator. The pipeline only depends
//! on this contract; adapters (HTTP, scripted fakes) live elsewhere.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::domain::Requirements;

/// A similar prior case handed to the corrector as precedent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorCase {
    pub report_id: Uuid,
    pub similarity: f64,
    /// True when the prior case had byte-identical requirements.
    pub exact_match: bool,
    pub verified: bool,
    pub overall_score: f64,
    pub code: String,
    pub findings: Vec<String>,
}

/// Everything the corrector gets for one correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRequest {
    /// Code of the attempt that failed.
    pub original_code: String,
    pub requirements: Requirements,
    /// Aggregated findings of the failed report.
    pub findings: Vec<String>,
    #[serde(default)]
    pub prior_cases: Vec<PriorCase>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CorrectorError {
    #[error("corrector timed out after {0:?}")]
    Timeout(Duration),

    #[error("corrector transport error: {0}")]
    Transport(String),

    #[error("corrector rejected the request: {0}")]
    Rejected(String),
}

/// External code generator that proposes corrected code.
#[async_trait]
pub trait Corrector: Send + Sync {
    async fn correct(&self, request: &CorrectionRequest) -> Result<String, CorrectorError>;
}

/// Time budget and retry backoff for corrector calls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrectionPolicy {
    pub timeout: Duration,
    pub retry_backoff: Duration,
}

impl Default for CorrectionPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Call the corrector, retrying once after `retry_backoff` on failure.
///
/// Each call is bounded by `policy.timeout`. The second error is returned
/// as-is; the caller escalates on it.
pub async fn correct_with_retry(
    corrector: &dyn Corrector,
    request: &CorrectionRequest,
    policy: &CorrectionPolicy,
) -> Result<String, CorrectorError> {
    match call_once(corrector, request, policy.timeout).await {
        Ok(code) => Ok(code),
        Err(first) => {
            warn!(
                error = %first,
                backoff_ms = policy.retry_backoff.as_millis() as u64,
                "corrector call failed; retrying once"
            );
            tokio::time::sleep(policy.retry_backoff).await;
            call_once(corrector, request, policy.timeout).await
        }
    }
}

async fn call_once(
    corrector: &dyn Corrector,
    request: &CorrectionRequest,
    timeout: Duration,
) -> Result<String, CorrectorError> {
    match tokio::time::timeout(timeout, corrector.correct(request)).await {
        Ok(result) => result,
        Err(_) => Err(CorrectorError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Corrector for Flaky {
        async fn correct(&self, _request: &CorrectionRequest) -> Result<String, CorrectorError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                Err(CorrectorError::Transport("connection reset".into()))
            } else {
                Ok("fixed".into())
            }
        }
    }

    struct Stalled;

    #[async_trait]
    impl Corrector for Stalled {
        async fn correct(&self, _request: &CorrectionRequest) -> Result<String, CorrectorError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("late".into())
        }
    }

    fn request() -> CorrectionRequest {
        CorrectionRequest {
            original_code: "broken".into(),
            requirements: Requirements::new("vue"),
            findings: vec!["pattern: missing <template>".into()],
            prior_cases: vec![],
        }
    }

    fn fast_policy() -> CorrectionPolicy {
        CorrectionPolicy {
            timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn retries_once_then_succeeds() {
        let c = Flaky {
            failures_before_success: 1,
            calls: AtomicU32::new(0),
        };
        let code = correct_with_retry(&c, &request(), &fast_policy())
            .await
            .unwrap();
        assert_eq!(code, "fixed");
        assert_eq!(c.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_failure_is_returned() {
        let c = Flaky {
            failures_before_success: 5,
            calls: AtomicU32::new(0),
        };
        let err = correct_with_retry(&c, &request(), &fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, CorrectorError::Transport(_)));
        assert_eq!(c.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_are_reported() {
        let err = correct_with_retry(&Stalled, &request(), &fast_policy())
            .await
            .unwrap_err();
        assert_eq!(err, CorrectorError::Timeout(Duration::from_secs(5)));
    }
}
