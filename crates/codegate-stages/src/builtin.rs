//! Built-in stage kinds and registry assembly from configuration.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use codegate_core::{
    CodegateError, Corrector, JudgesConfig, PipelineConfig, Result, Stage, StageRegistry,
    StageSpec,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::compliance::SpecComplianceStage;
use crate::consensus::ConsensusStage;
use crate::http::{HttpCorrector, HttpJudge};
use crate::lint::{CommandLinter, LintStage};
use crate::pattern::PatternStage;
use crate::review::PeerReviewStage;
use crate::runner::{CommandRunner, CommandSpec};
use crate::runtime::{CommandTestRunner, RuntimeTestStage};
use crate::security::{RuleSecurityScanner, RuleSpec, SecurityStage};
use crate::syntax::SyntaxStage;

/// Stage kinds selectable with `kind = "..."` in `[[stages]]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStage {
    Syntax,
    Pattern,
    Security,
    Lint,
    Runtime,
    SpecCompliance,
    PeerReview,
    Consensus,
}

impl BuiltinStage {
    pub const ALL: [BuiltinStage; 8] = [
        BuiltinStage::Syntax,
        BuiltinStage::Pattern,
        BuiltinStage::Security,
        BuiltinStage::Lint,
        BuiltinStage::Runtime,
        BuiltinStage::SpecCompliance,
        BuiltinStage::PeerReview,
        BuiltinStage::Consensus,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinStage::Syntax => "syntax",
            BuiltinStage::Pattern => "pattern",
            BuiltinStage::Security => "security",
            BuiltinStage::Lint => "lint",
            BuiltinStage::Runtime => "runtime",
            BuiltinStage::SpecCompliance => "spec_compliance",
            BuiltinStage::PeerReview => "peer_review",
            BuiltinStage::Consensus => "consensus",
        }
    }

    pub fn from_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == kind)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoOptions {}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommandOptions {
    /// Language -> command template.
    #[serde(default, alias = "parsers", alias = "harnesses")]
    commands: BTreeMap<String, CommandSpec>,
    /// Drop the built-in commands and use only `commands`.
    #[serde(default)]
    replace_defaults: bool,
    #[serde(default)]
    command_timeout_secs: Option<u64>,
}

impl CommandOptions {
    fn runner(&self) -> CommandRunner {
        self.command_timeout_secs
            .map(|s| CommandRunner::new(Duration::from_secs(s)))
            .unwrap_or_default()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SecurityOptions {
    #[serde(default)]
    extra_rules: Vec<RuleSpec>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ComplianceOptions {
    #[serde(default)]
    min_score: Option<f64>,
}

fn stage_error(spec: &StageSpec, e: impl std::fmt::Display) -> CodegateError {
    CodegateError::config(format!("stage {}: {e}", spec.stage_name()))
}

fn judge(
    spec: &StageSpec,
    judges: &JudgesConfig,
    model: Option<String>,
) -> Result<Arc<HttpJudge>> {
    let endpoint = judges.endpoint.as_deref().ok_or_else(|| {
        stage_error(spec, "requires [judges].endpoint (or CODEGATE_JUDGE_URL)")
    })?;
    let judge = HttpJudge::new(endpoint, model, Duration::from_secs(judges.timeout_secs))
        .map_err(|e| stage_error(spec, e))?;
    Ok(Arc::new(judge))
}

/// Build one stage from its `[[stages]]` entry.
pub fn build_stage(spec: &StageSpec, judges: &JudgesConfig) -> Result<Arc<dyn Stage>> {
    let kind = BuiltinStage::from_kind(&spec.kind)
        .ok_or_else(|| stage_error(spec, format!("unknown stage kind `{}`", spec.kind)))?;
    let name = spec.stage_name().to_string();

    let stage: Arc<dyn Stage> = match kind {
        BuiltinStage::Syntax => {
            let opts: CommandOptions = spec.options()?;
            let stage = opts
                .commands
                .iter()
                .fold(SyntaxStage::new(name), |s, (lang, cmd)| {
                    s.with_parser(lang.clone(), cmd.clone())
                });
            Arc::new(stage.with_runner(opts.runner()))
        }
        BuiltinStage::Pattern => {
            let _: NoOptions = spec.options()?;
            Arc::new(PatternStage::new(name))
        }
        BuiltinStage::Security => {
            let opts: SecurityOptions = spec.options()?;
            let mut scanner = RuleSecurityScanner::new().map_err(|e| stage_error(spec, e))?;
            for rule in opts.extra_rules {
                scanner = scanner.with_rule(rule).map_err(|e| stage_error(spec, e))?;
            }
            Arc::new(SecurityStage::new(name, Arc::new(scanner)))
        }
        BuiltinStage::Lint => {
            let opts: CommandOptions = spec.options()?;
            let base = if opts.replace_defaults {
                CommandLinter::empty()
            } else {
                CommandLinter::default()
            };
            let linter = opts
                .commands
                .iter()
                .fold(base, |l, (lang, cmd)| l.with_command(lang.clone(), cmd.clone()))
                .with_runner(opts.runner());
            Arc::new(LintStage::new(name, Arc::new(linter)))
        }
        BuiltinStage::Runtime => {
            let opts: CommandOptions = spec.options()?;
            let base = if opts.replace_defaults {
                CommandTestRunner::empty()
            } else {
                CommandTestRunner::default()
            };
            let runner = opts
                .commands
                .iter()
                .fold(base, |r, (lang, cmd)| r.with_harness(lang.clone(), cmd.clone()))
                .with_runner(opts.runner());
            Arc::new(RuntimeTestStage::new(name, Arc::new(runner)))
        }
        BuiltinStage::SpecCompliance => {
            let opts: ComplianceOptions = spec.options()?;
            let mut stage = SpecComplianceStage::new(name, judge(spec, judges, judges.model.clone())?);
            if let Some(min) = opts.min_score {
                if !(0.0..=1.0).contains(&min) {
                    return Err(stage_error(spec, format!("min_score must be within [0, 1], got {min}")));
                }
                stage = stage.with_min_score(min);
            }
            Arc::new(stage)
        }
        BuiltinStage::PeerReview => {
            let _: NoOptions = spec.options()?;
            Arc::new(PeerReviewStage::new(name, judge(spec, judges, judges.model.clone())?))
        }
        BuiltinStage::Consensus => {
            let _: NoOptions = spec.options()?;
            if judges.consensus_models.is_empty() {
                return Err(stage_error(spec, "requires [judges].consensus_models"));
            }
            let mut stage = ConsensusStage::new(name);
            for model in &judges.consensus_models {
                stage = stage.with_judge(model.clone(), judge(spec, judges, Some(model.clone()))?);
            }
            Arc::new(stage)
        }
    };
    Ok(stage)
}

/// Assemble the registry from the enabled `[[stages]]` entries.
pub fn build_registry(config: &PipelineConfig) -> Result<StageRegistry> {
    let mut builder = StageRegistry::builder()
        .pass_threshold(config.pass_threshold)
        .normalize_weights(config.normalize_weights);
    for spec in config.enabled_stages() {
        let stage = build_stage(spec, &config.judges)?;
        builder = builder.stage_with_timeout(stage, spec.weight, spec.timeout());
    }
    let registry = builder.build()?;
    info!(stages = ?registry.stage_names(), threshold = registry.pass_threshold(), "registry built");
    Ok(registry)
}

/// The configured corrector, if any.
pub fn build_corrector(config: &PipelineConfig) -> Result<Option<Arc<dyn Corrector>>> {
    let Some(endpoint) = config.corrector.endpoint.as_deref() else {
        return Ok(None);
    };
    let corrector = HttpCorrector::new(endpoint, Duration::from_secs(config.corrector.timeout_secs))
        .map_err(|e| CodegateError::config(format!("corrector: {e}")))?;
    Ok(Some(Arc::new(corrector)))
}
