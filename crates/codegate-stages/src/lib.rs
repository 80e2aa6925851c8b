//! Built-in verification stages for codegate.
//!
//! Each stage implements [`codegate_core::Stage`] and delegates the
//! expensive part to a collaborator: a subprocess (parsers, linters, test
//! harnesses), a regex rule set, or a model-backed [`Judge`] over HTTP.
//! [`build_registry`] assembles a validated registry from `[[stages]]`
//! configuration entries.

pub mod builtin;
pub mod collaborators;
pub mod compliance;
pub mod consensus;
pub mod http;
pub mod lint;
pub mod pattern;
pub mod review;
pub mod runner;
pub mod runtime;
pub mod security;
pub mod syntax;

pub use builtin::{build_corrector, build_registry, build_stage, BuiltinStage};
pub use collaborators::{
    CaseOutcome, Coverage, Judge, LintOutcome, Linter, Review, SecurityFinding, SecurityScanner,
    Severity, TestRunner,
};
pub use compliance::{line_similarity, SpecComplianceStage};
pub use consensus::ConsensusStage;
pub use http::{HttpCorrector, HttpJudge};
pub use lint::{CommandLinter, LintStage};
pub use pattern::PatternStage;
pub use review::PeerReviewStage;
pub use runner::{CommandOutput, CommandRunner, CommandSpec};
pub use runtime::{CommandTestRunner, RuntimeTestStage};
pub use security::{RuleSecurityScanner, RuleSpec, SecurityStage};
pub use syntax::{check_source, SyntaxError, SyntaxStage};
