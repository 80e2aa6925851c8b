//! End-to-end tests of the verification pipeline and correction loop using
//! scripted stages and correctors.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use codegate_core::domain::{SKIPPED_BLOCKING, TIMEOUT};
use codegate_core::{
    CancellationToken, CheckResult, CodegateError, ContentDigest, CorrectionPolicy,
    CorrectionRequest, Corrector, CorrectorError, FeedbackLog, FeedbackStore, PipelineSettings,
    Requirements, SessionState, Stage, StageRegistry, VerificationPipeline, VerificationRequest,
};
use feedback_state::fakes::UnavailableFeedbackLog;
use feedback_state::{FeedbackEntry, ScoredEntry, StorageResult};

// ---------------------------------------------------------------------------
// Scripted stages
// ---------------------------------------------------------------------------

/// Passes iff the code contains `needle`; counts invocations.
struct Contains {
    name: &'static str,
    needle: &'static str,
    blocking: bool,
    calls: Arc<AtomicU32>,
}

impl Contains {
    fn new(name: &'static str, needle: &'static str) -> Self {
        Self {
            name,
            needle,
            blocking: false,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }
}

#[async_trait]
impl Stage for Contains {
    fn name(&self) -> &str {
        self.name
    }

    fn is_blocking(&self) -> bool {
        self.blocking
    }

    async fn check(&self, request: &VerificationRequest) -> anyhow::Result<CheckResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(if request.code.contains(self.needle) {
            CheckResult::pass(self.name)
        } else {
            CheckResult::fail(self.name, vec![format!("missing {}", self.needle)])
        })
    }
}

struct Sleeper;

#[async_trait]
impl Stage for Sleeper {
    fn name(&self) -> &str {
        "sleeper"
    }

    async fn check(&self, _request: &VerificationRequest) -> anyhow::Result<CheckResult> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(CheckResult::pass("sleeper"))
    }
}

/// Sleeps for `secs`, then passes.
struct Nap {
    name: &'static str,
    secs: u64,
}

#[async_trait]
impl Stage for Nap {
    fn name(&self) -> &str {
        self.name
    }

    async fn check(&self, _request: &VerificationRequest) -> anyhow::Result<CheckResult> {
        tokio::time::sleep(Duration::from_secs(self.secs)).await;
        Ok(CheckResult::pass(self.name))
    }
}

struct Panics;

#[async_trait]
impl Stage for Panics {
    fn name(&self) -> &str {
        "panics"
    }

    async fn check(&self, _request: &VerificationRequest) -> anyhow::Result<CheckResult> {
        panic!("boom");
    }
}

struct Errors;

#[async_trait]
impl Stage for Errors {
    fn name(&self) -> &str {
        "errors"
    }

    async fn check(&self, _request: &VerificationRequest) -> anyhow::Result<CheckResult> {
        anyhow::bail!("linter binary not found")
    }
}

// ---------------------------------------------------------------------------
// Scripted correctors
// ---------------------------------------------------------------------------

enum Step {
    Code(&'static str),
    Fail(CorrectorError),
    Stall,
}

struct ScriptedCorrector {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
    seen: Mutex<Vec<CorrectionRequest>>,
}

impl ScriptedCorrector {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Corrector for ScriptedCorrector {
    async fn correct(&self, request: &CorrectionRequest) -> Result<String, CorrectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.clone());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Code(code)) => Ok(code.to_string()),
            Some(Step::Fail(e)) => Err(e),
            Some(Step::Stall) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok("too late".into())
            }
            None => Err(CorrectorError::Rejected("script exhausted".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Feedback backends
// ---------------------------------------------------------------------------

/// Never answers.
struct StalledLog;

#[async_trait]
impl FeedbackLog for StalledLog {
    async fn append(&self, _entry: FeedbackEntry) -> StorageResult<()> {
        std::future::pending().await
    }

    async fn nearest(&self, _embedding: &[f32], _k: usize) -> StorageResult<Vec<ScoredEntry>> {
        std::future::pending().await
    }

    async fn by_fingerprint(&self, _fingerprint: &ContentDigest) -> StorageResult<Vec<FeedbackEntry>> {
        std::future::pending().await
    }

    async fn len(&self) -> StorageResult<usize> {
        std::future::pending().await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn request(code: &str) -> VerificationRequest {
    VerificationRequest::new(
        code,
        Requirements::new("vue")
            .with_pattern("<template>")
            .with_rule("form", "login form"),
    )
}

fn fast_settings() -> PipelineSettings {
    PipelineSettings {
        correction: CorrectionPolicy {
            timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_millis(10),
        },
        ..PipelineSettings::default()
    }
}

/// Five stages at 0.2; "e" only passes when the code contains "fixed".
fn five_stage_registry(threshold: f64) -> (Arc<StageRegistry>, Arc<AtomicU32>) {
    let needs_fix = Contains::new("e", "fixed");
    let calls = Arc::clone(&needs_fix.calls);
    let registry = StageRegistry::builder()
        .stage(Arc::new(Contains::new("a", "")), 0.2)
        .stage(Arc::new(Contains::new("b", "")), 0.2)
        .stage(Arc::new(Contains::new("c", "")), 0.2)
        .stage(Arc::new(Contains::new("d", "")), 0.2)
        .stage(Arc::new(needs_fix), 0.2)
        .pass_threshold(threshold)
        .build()
        .unwrap();
    (Arc::new(registry), calls)
}

// ---------------------------------------------------------------------------
// Single attempts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_marker_scores_zero() {
    let registry = StageRegistry::builder()
        .stage(Arc::new(Contains::new("pattern", "<template>")), 1.0)
        .pass_threshold(0.85)
        .build()
        .unwrap();
    let pipeline = VerificationPipeline::new(Arc::new(registry));

    let report = pipeline.verify(&request("<script></script>")).await.unwrap();
    let pattern = report.result("pattern").unwrap();
    assert!(!pattern.passed);
    assert_eq!(pattern.score, Some(0.0));
    assert_eq!(report.overall_score, 0.0);
    assert!(!report.verified);
    assert_eq!(report.attempt_number, 1);
}

#[tokio::test]
async fn all_passing_verifies_at_threshold_one() {
    let registry = StageRegistry::builder()
        .stage(Arc::new(Contains::new("a", "")), 0.2)
        .stage(Arc::new(Contains::new("b", "")), 0.3)
        .stage(Arc::new(Contains::new("c", "")), 0.3)
        .stage(Arc::new(Contains::new("d", "")), 0.15)
        .stage(Arc::new(Contains::new("e", "")), 0.05)
        .pass_threshold(1.0)
        .build()
        .unwrap();
    let report = VerificationPipeline::new(Arc::new(registry))
        .verify(&request("anything"))
        .await
        .unwrap();
    assert_eq!(report.overall_score, 1.0);
    assert!(report.verified);
}

#[tokio::test]
async fn four_of_five_needs_correction() {
    let (registry, _) = five_stage_registry(0.85);
    let pipeline = VerificationPipeline::new(registry).with_settings(fast_settings());

    let report = pipeline.verify(&request("draft")).await.unwrap();
    assert!((report.overall_score - 0.8).abs() < 1e-9);
    assert!(!report.verified);

    let corrector = ScriptedCorrector::new(vec![Step::Code("fixed draft")]);
    let outcome = VerificationPipeline::new(five_stage_registry(0.85).0)
        .with_corrector(corrector.clone())
        .with_settings(fast_settings())
        .run_session(&request("draft"), 3)
        .await
        .unwrap();

    assert_eq!(outcome.state, SessionState::Verified);
    assert_eq!(outcome.attempts.len(), 2);
    assert!(!outcome.attempts[0].verified);
    assert_eq!(outcome.report.attempt_number, 2);
    assert_eq!(outcome.report.correction_history, vec![outcome.attempts[0].id]);
    assert_eq!(corrector.calls(), 1);

    let seen = corrector.seen.lock().unwrap();
    assert_eq!(seen[0].original_code, "draft");
    assert_eq!(seen[0].findings, vec!["e: missing fixed"]);
}

#[tokio::test]
async fn blocking_failure_skips_and_blocks() {
    let downstream = Contains::new("pattern", "");
    let downstream_calls = Arc::clone(&downstream.calls);
    let registry = StageRegistry::builder()
        .stage(Arc::new(Contains::new("syntax", "{").blocking()), 0.5)
        .stage(Arc::new(downstream), 0.5)
        .pass_threshold(0.0)
        .build()
        .unwrap();

    let report = VerificationPipeline::new(Arc::new(registry))
        .verify(&request("no braces"))
        .await
        .unwrap();

    let skipped = report.result("pattern").unwrap();
    assert_eq!(skipped.error.as_deref(), Some(SKIPPED_BLOCKING));
    assert!(!skipped.passed);
    assert_eq!(skipped.score, Some(0.0));
    assert_eq!(downstream_calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.overall_score, 0.0);
    assert!(!report.verified);
}

#[tokio::test(start_paused = true)]
async fn slow_stage_times_out() {
    let registry = StageRegistry::builder()
        .stage_with_timeout(Arc::new(Sleeper), 0.5, Duration::from_secs(2))
        .stage(Arc::new(Contains::new("fast", "")), 0.5)
        .pass_threshold(0.5)
        .build()
        .unwrap();
    let report = VerificationPipeline::new(Arc::new(registry))
        .verify(&request("x"))
        .await
        .unwrap();

    let slow = report.result("sleeper").unwrap();
    assert_eq!(slow.error.as_deref(), Some(TIMEOUT));
    assert_eq!(slow.score, Some(0.0));
    assert!(report.result("fast").unwrap().passed);
    assert!((report.overall_score - 0.5).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn stages_run_concurrently() {
    let registry = StageRegistry::builder()
        .stage_with_timeout(Arc::new(Nap { name: "left", secs: 3 }), 0.5, Duration::from_secs(10))
        .stage_with_timeout(Arc::new(Nap { name: "right", secs: 3 }), 0.5, Duration::from_secs(10))
        .pass_threshold(1.0)
        .build()
        .unwrap();
    let pipeline = VerificationPipeline::new(Arc::new(registry));

    let start = tokio::time::Instant::now();
    let report = pipeline.verify(&request("x")).await.unwrap();
    let elapsed = start.elapsed();

    assert!(report.verified);
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_secs(6), "stages ran serially: {elapsed:?}");
}

#[tokio::test]
async fn crashing_stages_are_recorded() {
    let registry = StageRegistry::builder()
        .stage(Arc::new(Panics), 0.25)
        .stage(Arc::new(Errors), 0.25)
        .stage(Arc::new(Contains::new("ok", "")), 0.5)
        .pass_threshold(0.5)
        .build()
        .unwrap();
    let report = VerificationPipeline::new(Arc::new(registry))
        .verify(&request("x"))
        .await
        .unwrap();

    assert_eq!(report.results.len(), 3);
    assert_eq!(
        report.result("panics").unwrap().error.as_deref(),
        Some("crashed: boom")
    );
    let errored = report.result("errors").unwrap().error.clone().unwrap();
    assert!(errored.starts_with("crashed: "));
    assert!(errored.contains("linter binary not found"));
    assert!(report.verified);
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exhausted_budget_escalates_with_history() {
    let (registry, verify_calls) = five_stage_registry(0.85);
    let feedback = Arc::new(FeedbackStore::in_memory());
    let corrector = ScriptedCorrector::new(vec![Step::Code("v2"), Step::Code("v3")]);

    let outcome = VerificationPipeline::new(registry)
        .with_corrector(corrector.clone())
        .with_feedback(feedback.clone())
        .with_settings(fast_settings())
        .run_session(&request("v1"), 3)
        .await
        .unwrap();

    assert_eq!(outcome.state, SessionState::Escalated);
    assert_eq!(outcome.report.attempt_number, 3);
    assert_eq!(outcome.report.correction_history.len(), 2);
    assert!(outcome.report.requires_human_review);
    assert!(!outcome.report.verified);
    assert_eq!(verify_calls.load(Ordering::SeqCst), 3);
    assert_eq!(corrector.calls(), 2);

    let ids: Vec<_> = outcome.attempts.iter().map(|r| r.id).collect();
    assert_eq!(&ids[..2], outcome.report.correction_history.as_slice());
    assert_eq!(feedback.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn corrector_timing_out_twice_escalates_early() {
    let (registry, verify_calls) = five_stage_registry(0.85);
    let corrector = ScriptedCorrector::new(vec![Step::Code("v2"), Step::Stall, Step::Stall]);

    let outcome = VerificationPipeline::new(registry)
        .with_corrector(corrector.clone())
        .with_settings(fast_settings())
        .run_session(&request("v1"), 3)
        .await
        .unwrap();

    assert_eq!(outcome.state, SessionState::Escalated);
    assert_eq!(outcome.report.attempt_number, 2);
    assert_eq!(verify_calls.load(Ordering::SeqCst), 2);
    assert_eq!(corrector.calls(), 3);
    assert!(outcome.report.requires_human_review);
    assert!(outcome
        .report
        .escalation_reason
        .as_deref()
        .unwrap()
        .contains("timed out"));
}

#[tokio::test]
async fn single_corrector_failure_is_retried() {
    let (registry, _) = five_stage_registry(0.85);
    let corrector = ScriptedCorrector::new(vec![
        Step::Fail(CorrectorError::Transport("reset".into())),
        Step::Code("fixed"),
    ]);

    let outcome = VerificationPipeline::new(registry)
        .with_corrector(corrector.clone())
        .with_settings(fast_settings())
        .run_session(&request("v1"), 3)
        .await
        .unwrap();

    assert!(outcome.verified());
    assert_eq!(outcome.attempt_count(), 2);
    assert_eq!(corrector.calls(), 2);
}

#[tokio::test]
async fn no_corrector_escalates_after_first_attempt() {
    let (registry, verify_calls) = five_stage_registry(0.85);
    let outcome = VerificationPipeline::new(registry)
        .run_session(&request("v1"), 3)
        .await
        .unwrap();
    assert_eq!(outcome.state, SessionState::Escalated);
    assert_eq!(outcome.report.attempt_number, 1);
    assert_eq!(verify_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn zero_budget_is_rejected() {
    let (registry, verify_calls) = five_stage_registry(0.85);
    let err = VerificationPipeline::new(registry)
        .run_session(&request("v1"), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, CodegateError::Configuration(_)));
    assert_eq!(verify_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn attempts_never_exceed_budget() {
    for budget in 1..=4u32 {
        let (registry, verify_calls) = five_stage_registry(0.85);
        let corrector =
            ScriptedCorrector::new(vec![Step::Code("a"), Step::Code("b"), Step::Code("c")]);
        let outcome = VerificationPipeline::new(registry)
            .with_corrector(corrector)
            .with_settings(fast_settings())
            .run_session(&request("v1"), budget)
            .await
            .unwrap();
        let calls = verify_calls.load(Ordering::SeqCst);
        assert!(calls <= budget);
        assert_eq!(outcome.report.attempt_number, calls);
        assert!(outcome.report.overall_score >= 0.0 && outcome.report.overall_score <= 1.0);
    }
}

#[tokio::test]
async fn prior_cases_reach_the_corrector() {
    let feedback = Arc::new(FeedbackStore::in_memory());

    let first = VerificationPipeline::new(five_stage_registry(0.85).0)
        .with_feedback(feedback.clone())
        .run_session(&request("first try"), 1)
        .await
        .unwrap();
    assert_eq!(first.state, SessionState::Escalated);

    let corrector = ScriptedCorrector::new(vec![Step::Code("fixed")]);
    VerificationPipeline::new(five_stage_registry(0.85).0)
        .with_corrector(corrector.clone())
        .with_feedback(feedback.clone())
        .with_settings(fast_settings())
        .run_session(&request("second try"), 2)
        .await
        .unwrap();

    let seen = corrector.seen.lock().unwrap();
    assert_eq!(seen[0].prior_cases.len(), 1);
    assert_eq!(seen[0].prior_cases[0].report_id, first.report.id);
    assert!(seen[0].prior_cases[0].exact_match);
    assert_eq!(feedback.len().await, 2);
}

#[tokio::test]
async fn unreachable_feedback_store_still_reports() {
    let feedback = Arc::new(FeedbackStore::new(Arc::new(UnavailableFeedbackLog::default())));
    let corrector = ScriptedCorrector::new(vec![Step::Code("fixed")]);

    let outcome = VerificationPipeline::new(five_stage_registry(0.85).0)
        .with_corrector(corrector.clone())
        .with_feedback(feedback)
        .with_settings(fast_settings())
        .run_session(&request("draft"), 3)
        .await
        .unwrap();

    assert_eq!(outcome.state, SessionState::Verified);
    assert_eq!(outcome.report.attempt_number, 2);
    assert_eq!(outcome.report.results.len(), 5);
    assert_eq!(outcome.report.correction_history.len(), 1);
    assert!(corrector.seen.lock().unwrap()[0].prior_cases.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stalled_feedback_store_does_not_hang_session() {
    let feedback = Arc::new(
        FeedbackStore::new(Arc::new(StalledLog)).with_timeout(Duration::from_secs(1)),
    );
    let corrector = ScriptedCorrector::new(vec![Step::Code("fixed")]);
    let pipeline = VerificationPipeline::new(five_stage_registry(0.85).0)
        .with_corrector(corrector.clone())
        .with_feedback(feedback)
        .with_settings(fast_settings());

    let outcome = tokio::time::timeout(
        Duration::from_secs(60),
        pipeline.run_session(&request("draft"), 3),
    )
    .await
    .expect("session hung on the feedback store")
    .unwrap();

    assert!(outcome.verified());
    assert_eq!(outcome.attempt_count(), 2);
    assert!(corrector.seen.lock().unwrap()[0].prior_cases.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_without_persisting() {
    let registry = StageRegistry::builder()
        .stage(Arc::new(Sleeper), 1.0)
        .pass_threshold(0.5)
        .build()
        .unwrap();
    let feedback = Arc::new(FeedbackStore::in_memory());
    let pipeline = VerificationPipeline::new(Arc::new(registry)).with_feedback(feedback.clone());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = pipeline
        .run_session_with_cancel(&request("x"), 3, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CodegateError::Cancelled));
    assert!(feedback.is_empty().await);
}
