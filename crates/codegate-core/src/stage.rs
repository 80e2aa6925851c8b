//! The Stage contract: one independent verification strategy.

use async_trait::async_trait;

use crate::domain::{CheckResult, VerificationRequest};

/// A single verification strategy.
///
/// Stages are stateless per invocation. An `Err` (or a panic) is recorded by
/// the registry as a crash result for the stage; it never aborts the attempt.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Unique name within a registry; also the key in the report.
    fn name(&self) -> &str;

    /// Blocking stages run first. If any of them fails, every other stage is
    /// skipped for the attempt and the report cannot verify.
    fn is_blocking(&self) -> bool {
        false
    }

    async fn check(&self, request: &VerificationRequest) -> anyhow::Result<CheckResult>;
}
