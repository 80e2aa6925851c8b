//! Verification pipeline and the bounded correction loop.
//!
//! `verify` runs one attempt. `run_session` drives
//! verify -> correct -> verify ... until the candidate verifies or the
//! attempt budget is spent, then persists the terminal report.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::corrector::{correct_with_retry, CorrectionPolicy, CorrectionRequest, Corrector};
use crate::domain::{CodegateError, Report, Result, Session, SessionState, VerificationRequest};
use crate::feedback::FeedbackStore;
use crate::metrics::METRICS;
use crate::obs;
use crate::registry::StageRegistry;

/// Default number of attempts per session.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default number of similar prior cases attached to a correction request.
pub const DEFAULT_SIMILAR_CASES: usize = 3;

/// Loop-level knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub max_attempts: u32,
    pub similar_cases: usize,
    pub correction: CorrectionPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            similar_cases: DEFAULT_SIMILAR_CASES,
            correction: CorrectionPolicy::default(),
        }
    }
}

/// Terminal result of a correction-loop session.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    /// `Verified` or `Escalated`.
    pub state: SessionState,
    /// The terminal report (persisted to the feedback store).
    pub report: Report,
    /// Every attempt's report in order; the last one is `report`.
    pub attempts: Vec<Report>,
}

impl SessionOutcome {
    pub fn verified(&self) -> bool {
        self.state == SessionState::Verified
    }

    pub fn attempt_count(&self) -> u32 {
        self.report.attempt_number
    }
}

/// Entry point for callers: registry + corrector + feedback store.
pub struct VerificationPipeline {
    registry: Arc<StageRegistry>,
    corrector: Option<Arc<dyn Corrector>>,
    feedback: Option<Arc<FeedbackStore>>,
    settings: PipelineSettings,
}

impl VerificationPipeline {
    pub fn new(registry: Arc<StageRegistry>) -> Self {
        Self {
            registry,
            corrector: None,
            feedback: None,
            settings: PipelineSettings::default(),
        }
    }

    pub fn with_corrector(mut self, corrector: Arc<dyn Corrector>) -> Self {
        self.corrector = Some(corrector);
        self
    }

    pub fn with_feedback(mut self, feedback: Arc<FeedbackStore>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn feedback(&self) -> Option<&Arc<FeedbackStore>> {
        self.feedback.as_ref()
    }

    /// Verify a single candidate (one attempt, nothing persisted).
    pub async fn verify(&self, request: &VerificationRequest) -> Result<Report> {
        self.verify_with_cancel(request, &CancellationToken::new())
            .await
    }

    pub async fn verify_with_cancel(
        &self,
        request: &VerificationRequest,
        cancel: &CancellationToken,
    ) -> Result<Report> {
        self.verify_attempt(request, Uuid::new_v4(), 1, Vec::new(), cancel)
            .await
    }

    async fn verify_attempt(
        &self,
        request: &VerificationRequest,
        session_id: Uuid,
        attempt_number: u32,
        history: Vec<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<Report> {
        let results = self.registry.run(request, cancel).await?;
        let weights = self.registry.weights();
        let verdict = self
            .registry
            .aggregator()
            .aggregate(results.iter().zip(weights));

        let report = Report::new(
            session_id,
            request.clone(),
            results,
            verdict.overall_score,
            verdict.verified,
            attempt_number,
        )
        .with_history(history);

        METRICS.inc_verifications();
        obs::emit_attempt_verified(
            report.id,
            attempt_number,
            report.overall_score,
            report.verified,
        );
        Ok(report)
    }

    /// Run the full correction loop with up to `max_attempts` verify calls.
    pub async fn run_session(
        &self,
        request: &VerificationRequest,
        max_attempts: u32,
    ) -> Result<SessionOutcome> {
        self.run_session_with_cancel(request, max_attempts, &CancellationToken::new())
            .await
    }

    /// Like [`run_session`](Self::run_session), aborting with
    /// [`CodegateError::Cancelled`] when `cancel` fires. A cancelled session
    /// persists nothing.
    pub async fn run_session_with_cancel(
        &self,
        request: &VerificationRequest,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome> {
        let session = Session::new(request.code.clone(), max_attempts)?;
        let span = obs::session_span(session.id());
        self.drive_session(session, request, cancel)
            .instrument(span)
            .await
    }

    async fn drive_session(
        &self,
        mut session: Session,
        request: &VerificationRequest,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome> {
        let start = Instant::now();
        let max_attempts = session.max_attempts();
        obs::emit_session_started(session.id(), max_attempts, self.registry.entries().len());

        let mut current = request.clone();
        let mut attempts: Vec<Report> = Vec::new();

        let (state, report) = loop {
            session.begin_verification()?;
            let mut report = self
                .verify_attempt(
                    &current,
                    session.id(),
                    session.attempt_number(),
                    session.report_ids().to_vec(),
                    cancel,
                )
                .await?;

            match session.record_report(report.id, report.verified)? {
                SessionState::Verified => break (SessionState::Verified, report),
                SessionState::Escalated => {
                    report.escalate(format!(
                        "not verified after {} attempt(s)",
                        session.attempt_number()
                    ));
                    break (SessionState::Escalated, report);
                }
                _ => {}
            }

            let Some(corrector) = self.corrector.as_ref() else {
                session.escalate()?;
                report.escalate("no corrector configured");
                break (SessionState::Escalated, report);
            };

            session.begin_correction()?;
            let correction = self.build_correction(&current, &report).await;
            obs::emit_correction_requested(
                session.attempt_number(),
                correction.findings.len(),
                correction.prior_cases.len(),
            );
            METRICS.inc_corrections();

            let corrected = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CodegateError::Cancelled),
                r = correct_with_retry(corrector.as_ref(), &correction, &self.settings.correction) => r,
            };

            match corrected {
                Ok(code) => {
                    current = current.with_code(code.clone());
                    session.complete_correction(code)?;
                    attempts.push(report);
                }
                Err(e) => {
                    warn!(error = %e, attempt = session.attempt_number(), "corrector failed twice; escalating");
                    session.escalate()?;
                    report.escalate(format!("corrector failed: {e}"));
                    break (SessionState::Escalated, report);
                }
            }
        };

        if state == SessionState::Escalated {
            METRICS.inc_escalations();
        }

        if let Some(feedback) = &self.feedback {
            feedback.record(&report).await;
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let state_name = if state == SessionState::Verified {
            "verified"
        } else {
            "escalated"
        };
        obs::emit_session_finished(
            session.id(),
            state_name,
            report.attempt_number,
            duration_ms,
        );
        info!(
            overall_score = report.overall_score,
            attempts = report.attempt_number,
            "session finished: {}",
            state_name
        );

        attempts.push(report.clone());
        Ok(SessionOutcome {
            session_id: session.id(),
            state,
            report,
            attempts,
        })
    }

    async fn build_correction(
        &self,
        current: &VerificationRequest,
        failed: &Report,
    ) -> CorrectionRequest {
        let prior_cases = match &self.feedback {
            Some(store) => store
                .similar_cases(&current.requirements, self.settings.similar_cases)
                .await
                .iter()
                .map(|case| case.to_prior_case())
                .collect(),
            None => Vec::new(),
        };

        CorrectionRequest {
            original_code: current.code.clone(),
            requirements: current.requirements.clone(),
            findings: failed.failure_findings(),
            prior_cases,
        }
    }
}
