//! Weighted score aggregation and the pass/fail verdict.

use serde::{Deserialize, Serialize};

use crate::domain::CheckResult;

/// Slack applied when comparing the aggregate against the threshold so that
/// float summation noise cannot flip a verdict.
pub const SCORE_EPSILON: f64 = 1e-9;

/// Aggregated verdict for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub overall_score: f64,
    pub verified: bool,
    pub blocked: bool,
}

/// Combines weighted stage results into one score.
#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    pass_threshold: f64,
}

impl Aggregator {
    pub fn new(pass_threshold: f64) -> Self {
        Self { pass_threshold }
    }

    pub fn pass_threshold(&self) -> f64 {
        self.pass_threshold
    }

    /// `overall = Σ weight · effective_score`, clamped to [0, 1].
    ///
    /// Weights are applied relative to their total, which the registry has
    /// already validated to be 1.0 within tolerance.
    pub fn aggregate<'a, I>(&self, weighted: I) -> Verdict
    where
        I: IntoIterator<Item = (&'a CheckResult, f64)>,
    {
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        let mut blocked = false;

        for (result, weight) in weighted {
            weighted_sum += weight * result.effective_score();
            total_weight += weight;
            blocked |= result.is_blocking_failure();
        }

        let overall_score = if total_weight > 0.0 {
            (weighted_sum / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };

        Verdict {
            overall_score,
            verified: !blocked && overall_score + SCORE_EPSILON >= self.pass_threshold,
            blocked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_passing_scores_one() {
        let results: Vec<_> = (0..5).map(|i| CheckResult::pass(format!("s{i}"))).collect();
        let weights = [0.2, 0.3, 0.3, 0.15, 0.05];
        let v = Aggregator::new(1.0).aggregate(results.iter().zip(weights));
        assert_eq!(v.overall_score, 1.0);
        assert!(v.verified);
    }

    #[test]
    fn four_of_five_below_threshold() {
        let mut results: Vec<_> = (0..4).map(|i| CheckResult::pass(format!("s{i}"))).collect();
        results.push(CheckResult::fail("s4", vec![]));
        let v = Aggregator::new(0.85).aggregate(results.iter().map(|r| (r, 0.2)));
        assert!((v.overall_score - 0.8).abs() < 1e-9);
        assert!(!v.verified);
    }

    #[test]
    fn blocking_failure_never_verifies() {
        let results = vec![
            CheckResult::blocking_failure("syntax", vec!["bad".into()]),
            CheckResult::pass("pattern"),
        ];
        let v = Aggregator::new(0.0).aggregate(results.iter().map(|r| (r, 0.5)));
        assert!(v.blocked);
        assert!(!v.verified);
    }

    #[test]
    fn unscored_results_use_passed() {
        let results = vec![
            CheckResult::new("security", true, None),
            CheckResult::new("lint", false, None),
        ];
        let v = Aggregator::new(0.5).aggregate(results.iter().map(|r| (r, 0.5)));
        assert!((v.overall_score - 0.5).abs() < 1e-12);
        assert!(v.verified);
    }

    #[test]
    fn empty_input_scores_zero() {
        let v = Aggregator::new(0.5).aggregate(std::iter::empty());
        assert_eq!(v.overall_score, 0.0);
        assert!(!v.verified);
    }
}
