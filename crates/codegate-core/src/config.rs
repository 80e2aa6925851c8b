//! Pipeline configuration loaded from TOML with environment overrides.
//!
//! ```toml
//! pass_threshold = 0.85
//! max_attempts = 3
//!
//! [corrector]
//! endpoint = "http://localhost:8080/correct"
//!
//! [[stages]]
//! kind = "syntax"
//! weight = 0.2
//! ```
//!
//! `pass_threshold` has no default and must be stated.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::corrector::CorrectionPolicy;
use crate::domain::{CodegateError, Result};
use crate::embedding::DEFAULT_EMBEDDING_DIMS;
use crate::feedback::DEFAULT_FEEDBACK_TIMEOUT;
use crate::pipeline::{PipelineSettings, DEFAULT_MAX_ATTEMPTS, DEFAULT_SIMILAR_CASES};
use crate::registry::{DEFAULT_STAGE_TIMEOUT, WEIGHT_TOLERANCE};

pub const ENV_PASS_THRESHOLD: &str = "CODEGATE_PASS_THRESHOLD";
pub const ENV_MAX_ATTEMPTS: &str = "CODEGATE_MAX_ATTEMPTS";
pub const ENV_CORRECTOR_URL: &str = "CODEGATE_CORRECTOR_URL";
pub const ENV_JUDGE_URL: &str = "CODEGATE_JUDGE_URL";

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_similar_cases() -> usize {
    DEFAULT_SIMILAR_CASES
}

fn default_true() -> bool {
    true
}

fn default_corrector_timeout() -> u64 {
    120
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_judge_timeout() -> u64 {
    60
}

fn default_embedding_dims() -> usize {
    DEFAULT_EMBEDDING_DIMS
}

fn default_feedback_timeout() -> u64 {
    DEFAULT_FEEDBACK_TIMEOUT.as_secs()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectorConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_corrector_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for CorrectorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_corrector_timeout(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl CorrectorConfig {
    pub fn policy(&self) -> CorrectionPolicy {
        CorrectionPolicy {
            timeout: Duration::from_secs(self.timeout_secs),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackBackend {
    #[default]
    Memory,
    Surreal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackConfig {
    #[serde(default)]
    pub backend: FeedbackBackend,
    /// SurrealDB URL (`mem://`, `surrealkv://path`, `ws://...`). When unset
    /// the backend resolves from `SURREALDB_*` variables.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embedding_dims")]
    pub embedding_dims: usize,
    /// Bound on each store call; a slower backend is treated as unreachable.
    #[serde(default = "default_feedback_timeout")]
    pub timeout_secs: u64,
}

impl FeedbackConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            backend: FeedbackBackend::default(),
            url: None,
            embedding_dims: default_embedding_dims(),
            timeout_secs: default_feedback_timeout(),
        }
    }
}

/// Endpoints and model names for judge-backed stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgesConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Model used for coverage and review tasks.
    #[serde(default)]
    pub model: Option<String>,
    /// One consensus voter per model name.
    #[serde(default)]
    pub consensus_models: Vec<String>,
    #[serde(default = "default_judge_timeout")]
    pub timeout_secs: u64,
}

impl Default for JudgesConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: None,
            consensus_models: Vec::new(),
            timeout_secs: default_judge_timeout(),
        }
    }
}

/// One `[[stages]]` entry. Keys other than the common ones are
/// stage-specific options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub kind: String,
    /// Defaults to `kind`; set it to register the same kind twice.
    #[serde(default)]
    pub name: Option<String>,
    pub weight: f64,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub options: toml::Table,
}

impl StageSpec {
    pub fn new(kind: impl Into<String>, weight: f64) -> Self {
        Self {
            kind: kind.into(),
            name: None,
            weight,
            timeout_secs: None,
            enabled: true,
            options: toml::Table::new(),
        }
    }

    pub fn stage_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_STAGE_TIMEOUT)
    }

    /// Decode the stage-specific options into `T`.
    pub fn options<T: DeserializeOwned>(&self) -> Result<T> {
        toml::Value::Table(self.options.clone())
            .try_into()
            .map_err(|e| {
                CodegateError::config(format!("stage {}: invalid options: {e}", self.stage_name()))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub pass_threshold: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_similar_cases")]
    pub similar_cases: usize,
    #[serde(default)]
    pub normalize_weights: bool,
    #[serde(default)]
    pub corrector: CorrectorConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
    #[serde(default)]
    pub judges: JudgesConfig,
    #[serde(default)]
    pub stages: Vec<StageSpec>,
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| CodegateError::config(format!("invalid config: {e}")))
    }

    /// Read, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        debug!(path = %path.display(), stages = config.stages.len(), "config loaded");
        Ok(config)
    }

    /// Apply `CODEGATE_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_PASS_THRESHOLD) {
            self.pass_threshold = v.trim().parse().map_err(|_| {
                CodegateError::config(format!("{ENV_PASS_THRESHOLD} is not a number: {v}"))
            })?;
        }
        if let Some(v) = lookup(ENV_MAX_ATTEMPTS) {
            self.max_attempts = v.trim().parse().map_err(|_| {
                CodegateError::config(format!("{ENV_MAX_ATTEMPTS} is not an integer: {v}"))
            })?;
        }
        if let Some(v) = lookup(ENV_CORRECTOR_URL) {
            self.corrector.endpoint = Some(v);
        }
        if let Some(v) = lookup(ENV_JUDGE_URL) {
            self.judges.endpoint = Some(v);
        }
        Ok(())
    }

    pub fn enabled_stages(&self) -> impl Iterator<Item = &StageSpec> {
        self.stages.iter().filter(|s| s.enabled)
    }

    /// Reject configurations the registry would reject, before any stage is
    /// built.
    pub fn validate(&self) -> Result<()> {
        if !self.pass_threshold.is_finite() || !(0.0..=1.0).contains(&self.pass_threshold) {
            return Err(CodegateError::config(format!(
                "pass_threshold must be within [0, 1], got {}",
                self.pass_threshold
            )));
        }
        if self.max_attempts == 0 {
            return Err(CodegateError::config("max_attempts must be at least 1"));
        }
        if self.feedback.timeout_secs == 0 {
            return Err(CodegateError::config("feedback timeout_secs must be at least 1"));
        }

        let mut names = HashSet::new();
        let mut total = 0.0;
        for spec in self.enabled_stages() {
            if !names.insert(spec.stage_name()) {
                return Err(CodegateError::config(format!(
                    "duplicate stage name: {}",
                    spec.stage_name()
                )));
            }
            if !spec.weight.is_finite() || spec.weight <= 0.0 {
                return Err(CodegateError::config(format!(
                    "stage {} has invalid weight {}",
                    spec.stage_name(),
                    spec.weight
                )));
            }
            if spec.timeout_secs == Some(0) {
                return Err(CodegateError::config(format!(
                    "stage {} has a zero timeout",
                    spec.stage_name()
                )));
            }
            total += spec.weight;
        }

        if names.is_empty() {
            return Err(CodegateError::config("no enabled stages"));
        }
        if !self.normalize_weights && (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(CodegateError::config(format!(
                "stage weights must sum to 1.0, got {total}"
            )));
        }
        Ok(())
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_attempts: self.max_attempts,
            similar_cases: self.similar_cases,
            correction: self.corrector.policy(),
        }
    }
}
