//! Stage registry: the ordered, weighted stage set plus the pass threshold.
//!
//! Construction validates the configuration once; `run` fans the request out
//! to every stage concurrently and always returns one result per stage, in
//! registry order.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;
use crate::domain::{CheckResult, CodegateError, Result, VerificationRequest};
use crate::metrics::METRICS;
use crate::obs;
use crate::stage::Stage;

/// Tolerance for the weight-sum check.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Per-stage timeout when none is configured.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(120);

/// A stage with its weight and time budget.
#[derive(Clone)]
pub struct StageEntry {
    pub stage: Arc<dyn Stage>,
    pub weight: f64,
    pub timeout: Duration,
}

impl std::fmt::Debug for StageEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageEntry")
            .field("stage", &self.stage.name())
            .field("weight", &self.weight)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Builder for [`StageRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<StageEntry>,
    pass_threshold: Option<f64>,
    normalize_weights: bool,
}

impl RegistryBuilder {
    pub fn stage(self, stage: Arc<dyn Stage>, weight: f64) -> Self {
        self.stage_with_timeout(stage, weight, DEFAULT_STAGE_TIMEOUT)
    }

    pub fn stage_with_timeout(
        mut self,
        stage: Arc<dyn Stage>,
        weight: f64,
        timeout: Duration,
    ) -> Self {
        self.entries.push(StageEntry {
            stage,
            weight,
            timeout,
        });
        self
    }

    pub fn pass_threshold(mut self, threshold: f64) -> Self {
        self.pass_threshold = Some(threshold);
        self
    }

    /// Rescale weights to sum to 1.0 instead of rejecting other sums.
    pub fn normalize_weights(mut self, normalize: bool) -> Self {
        self.normalize_weights = normalize;
        self
    }

    pub fn build(self) -> Result<StageRegistry> {
        let threshold = self
            .pass_threshold
            .ok_or_else(|| CodegateError::config("pass_threshold is required"))?;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(CodegateError::config(format!(
                "pass_threshold must be within [0, 1], got {threshold}"
            )));
        }

        if self.entries.is_empty() {
            return Err(CodegateError::config("registry has no stages"));
        }

        let mut seen = HashSet::new();
        for entry in &self.entries {
            let name = entry.stage.name();
            if !seen.insert(name.to_string()) {
                return Err(CodegateError::config(format!("duplicate stage name: {name}")));
            }
            if !entry.weight.is_finite() || entry.weight <= 0.0 {
                return Err(CodegateError::config(format!(
                    "stage {name} has invalid weight {}",
                    entry.weight
                )));
            }
            if entry.timeout.is_zero() {
                return Err(CodegateError::config(format!("stage {name} has a zero timeout")));
            }
        }

        let mut entries = self.entries;
        let total: f64 = entries.iter().map(|e| e.weight).sum();
        if self.normalize_weights {
            for entry in &mut entries {
                entry.weight /= total;
            }
        } else if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(CodegateError::config(format!(
                "stage weights must sum to 1.0, got {total}"
            )));
        }

        Ok(StageRegistry {
            entries,
            aggregator: Aggregator::new(threshold),
        })
    }
}

/// Validated, immutable stage set.
#[derive(Debug)]
pub struct StageRegistry {
    entries: Vec<StageEntry>,
    aggregator: Aggregator,
}

impl StageRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn entries(&self) -> &[StageEntry] {
        &self.entries
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.stage.name()).collect()
    }

    pub fn pass_threshold(&self) -> f64 {
        self.aggregator.pass_threshold()
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Weight of each stage, in registry order.
    pub fn weights(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.weight).collect()
    }

    /// Run every stage against `request`.
    ///
    /// Blocking stages run first; if any fails, the remaining stages are
    /// recorded as skipped without being invoked. Returns
    /// [`CodegateError::Cancelled`] if `cancel` fires before all stages finish;
    /// in-flight stage tasks are aborted.
    pub async fn run(
        &self,
        request: &VerificationRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<CheckResult>> {
        let request = Arc::new(request.clone());
        let mut slots: Vec<Option<CheckResult>> = vec![None; self.entries.len()];

        let (blocking, rest): (Vec<usize>, Vec<usize>) =
            (0..self.entries.len()).partition(|&i| self.entries[i].stage.is_blocking());

        if !blocking.is_empty() {
            self.run_phase(&blocking, &request, cancel, &mut slots).await?;
        }

        let blocked = blocking
            .iter()
            .any(|&i| slots[i].as_ref().map_or(true, |r| !r.passed));

        if blocked {
            info!(skipped = rest.len(), "blocking stage failed; skipping remaining stages");
            for &i in &rest {
                slots[i] = Some(CheckResult::skipped(self.entries[i].stage.name()));
            }
        } else if !rest.is_empty() {
            self.run_phase(&rest, &request, cancel, &mut slots).await?;
        }

        Ok(slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.unwrap_or_else(|| {
                    CheckResult::crashed(self.entries[i].stage.name(), "task aborted")
                })
            })
            .collect())
    }

    async fn run_phase(
        &self,
        indices: &[usize],
        request: &Arc<VerificationRequest>,
        cancel: &CancellationToken,
        slots: &mut [Option<CheckResult>],
    ) -> Result<()> {
        let mut set = JoinSet::new();

        for &idx in indices {
            let entry = &self.entries[idx];
            let stage = Arc::clone(&entry.stage);
            let request = Arc::clone(request);
            let timeout = entry.timeout;

            set.spawn(async move {
                let name = stage.name().to_string();
                debug!(stage = %name, "dispatching stage");
                let outcome = tokio::time::timeout(
                    timeout,
                    AssertUnwindSafe(stage.check(&request)).catch_unwind(),
                )
                .await;
                (idx, settle(&name, stage.is_blocking(), outcome))
            });
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("verification cancelled; aborting in-flight stages");
                    set.abort_all();
                    return Err(CodegateError::Cancelled);
                }
                joined = set.join_next() => {
                    match joined {
                        Some(Ok((idx, result))) => {
                            obs::emit_stage_completed(
                                &result.stage_name,
                                result.passed,
                                result.score,
                                result.error.as_deref(),
                            );
                            slots[idx] = Some(result);
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "stage task failed to join");
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }
}

type StageOutcome = std::result::Result<
    std::result::Result<anyhow::Result<CheckResult>, Box<dyn std::any::Any + Send>>,
    tokio::time::error::Elapsed,
>;

/// Turn a raw stage outcome into exactly one result named after the stage.
fn settle(name: &str, blocking: bool, outcome: StageOutcome) -> CheckResult {
    let mut result = match outcome {
        Err(_) => {
            METRICS.inc_stage_timeouts();
            warn!(stage = %name, "stage timed out");
            CheckResult::timed_out(name)
        }
        Ok(Err(panic)) => {
            METRICS.inc_stage_crashes();
            let detail = panic_message(panic.as_ref());
            warn!(stage = %name, detail = %detail, "stage panicked");
            CheckResult::crashed(name, detail)
        }
        Ok(Ok(Err(e))) => {
            METRICS.inc_stage_crashes();
            warn!(stage = %name, error = %e, "stage returned an error");
            CheckResult::crashed(name, format!("{e:#}"))
        }
        Ok(Ok(Ok(result))) => result,
    };

    if result.stage_name != name {
        result.stage_name = name.to_string();
    }
    if blocking && !result.passed {
        result.blocking = true;
    }
    result
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Requirements;
    use async_trait::async_trait;

    struct Fixed {
        name: &'static str,
        passed: bool,
        blocking: bool,
    }

    #[async_trait]
    impl Stage for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn is_blocking(&self) -> bool {
            self.blocking
        }

        async fn check(&self, _request: &VerificationRequest) -> anyhow::Result<CheckResult> {
            Ok(if self.passed {
                CheckResult::pass(self.name)
            } else {
                CheckResult::fail(self.name, vec!["nope".into()])
            })
        }
    }

    fn fixed(name: &'static str, passed: bool) -> Arc<dyn Stage> {
        Arc::new(Fixed {
            name,
            passed,
            blocking: false,
        })
    }

    fn request() -> VerificationRequest {
        VerificationRequest::new("code", Requirements::new("json"))
    }

    #[test]
    fn threshold_is_required() {
        let err = StageRegistry::builder()
            .stage(fixed("a", true), 1.0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("pass_threshold"));
    }

    #[test]
    fn rejects_bad_configurations() {
        assert!(StageRegistry::builder().pass_threshold(0.5).build().is_err());

        assert!(StageRegistry::builder()
            .stage(fixed("a", true), 0.5)
            .stage(fixed("a", true), 0.5)
            .pass_threshold(0.5)
            .build()
            .is_err());

        assert!(StageRegistry::builder()
            .stage(fixed("a", true), 0.6)
            .stage(fixed("b", true), 0.3)
            .pass_threshold(0.5)
            .build()
            .is_err());

        assert!(StageRegistry::builder()
            .stage(fixed("a", true), 1.0)
            .pass_threshold(1.5)
            .build()
            .is_err());

        assert!(StageRegistry::builder()
            .stage(fixed("a", true), f64::NAN)
            .pass_threshold(0.5)
            .build()
            .is_err());

        assert!(StageRegistry::builder()
            .stage(fixed("a", true), 1.2)
            .stage(fixed("b", true), -0.2)
            .pass_threshold(0.5)
            .build()
            .is_err());
    }

    #[test]
    fn normalizes_when_asked() {
        let registry = StageRegistry::builder()
            .stage(fixed("a", true), 3.0)
            .stage(fixed("b", true), 1.0)
            .pass_threshold(0.5)
            .normalize_weights(true)
            .build()
            .unwrap();
        let w = registry.weights();
        assert!((w[0] - 0.75).abs() < 1e-12);
        assert!((w[1] - 0.25).abs() < 1e-12);
    }

    #[tokio::test]
    async fn results_follow_registry_order() {
        let registry = StageRegistry::builder()
            .stage(fixed("z", true), 0.5)
            .stage(fixed("a", false), 0.5)
            .pass_threshold(0.5)
            .build()
            .unwrap();
        let results = registry
            .run(&request(), &CancellationToken::new())
            .await
            .unwrap();
        let names: Vec<_> = results.iter().map(|r| r.stage_name.as_str()).collect();
        assert_eq!(names, vec!["z", "a"]);
    }

    #[tokio::test]
    async fn blocking_failure_skips_the_rest() {
        let registry = StageRegistry::builder()
            .stage(
                Arc::new(Fixed {
                    name: "syntax",
                    passed: false,
                    blocking: true,
                }),
                0.5,
            )
            .stage(fixed("pattern", true), 0.5)
            .pass_threshold(0.0)
            .build()
            .unwrap();
        let results = registry
            .run(&request(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(results[0].is_blocking_failure());
        assert!(results[1].is_skipped());
    }

    #[tokio::test]
    async fn pre_cancelled_token_aborts() {
        let registry = StageRegistry::builder()
            .stage(fixed("a", true), 1.0)
            .pass_threshold(0.5)
            .build()
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = registry.run(&request(), &cancel).await.unwrap_err();
        assert!(matches!(err, CodegateError::Cancelled));
    }

    #[test]
    fn panic_message_extracts_strings() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
    }
}
