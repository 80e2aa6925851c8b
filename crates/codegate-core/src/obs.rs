//! Structured lifecycle events for verification sessions.
//!
//! `session_span` scopes every log line of a session to its id; the
//! `emit_*` functions log the key lifecycle events at `info!` level.

use tracing::{info, warn};
use uuid::Uuid;

/// Span carrying the session id; attach it to the session future with
/// `tracing::Instrument` so every event inside is tagged.
///
/// ```ignore
/// drive(session).instrument(session_span(session_id)).await
/// ```
pub fn session_span(session_id: Uuid) -> tracing::Span {
    tracing::info_span!("codegate.session", session_id = %session_id)
}

pub fn emit_session_started(session_id: Uuid, max_attempts: u32, stages: usize) {
    info!(
        event = "session.started",
        session_id = %session_id,
        max_attempts = max_attempts,
        stages = stages,
    );
}

pub fn emit_stage_completed(stage: &str, passed: bool, score: Option<f64>, error: Option<&str>) {
    info!(
        event = "stage.completed",
        stage = %stage,
        passed = passed,
        score = score.unwrap_or(if passed { 1.0 } else { 0.0 }),
        error = error.unwrap_or(""),
    );
}

pub fn emit_attempt_verified(report_id: Uuid, attempt: u32, overall_score: f64, verified: bool) {
    info!(
        event = "attempt.verified",
        report_id = %report_id,
        attempt = attempt,
        overall_score = overall_score,
        verified = verified,
    );
}

pub fn emit_correction_requested(attempt: u32, findings: usize, prior_cases: usize) {
    info!(
        event = "correction.requested",
        attempt = attempt,
        findings = findings,
        prior_cases = prior_cases,
    );
}

/// Emit event: session reached a terminal state.
pub fn emit_session_finished(session_id: Uuid, state: &str, attempts: u32, duration_ms: u64) {
    info!(
        event = "session.finished",
        session_id = %session_id,
        state = %state,
        attempts = attempts,
        duration_ms = duration_ms,
    );
}

/// Emit event: a report could not be persisted (warning level).
pub fn emit_feedback_record_failed(report_id: Uuid, error: &dyn std::fmt::Display) {
    warn!(event = "feedback.record_failed", report_id = %report_id, error = %error);
}
