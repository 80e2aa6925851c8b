//! codegate core library
//!
//! Verification of generated code: independent stages fan out over a
//! candidate, a weighted aggregate decides the verdict, and a bounded
//! correction loop asks an external corrector for fixes before escalating
//! to a human.
//!
//! ## Layer 1 - Domain
//!
//! - `Stage` / `StageRegistry`: weighted, concurrent verification strategies
//! - `Aggregator`: weighted score and verdict
//! - `VerificationPipeline`: single attempts and correction-loop sessions
//! - `FeedbackStore`: similar prior cases for correction requests
//! - `Reporter`: JSON and Markdown rendering

pub mod aggregator;
pub mod artifact;
pub mod config;
pub mod corrector;
pub mod domain;
pub mod embedding;
pub mod feedback;
pub mod metrics;
pub mod obs;
pub mod pipeline;
pub mod registry;
pub mod reporter;
pub mod stage;
pub mod telemetry;

pub use aggregator::{Aggregator, Verdict};
pub use artifact::{read_report_artifact, write_report_artifact};
pub use config::{
    CorrectorConfig, FeedbackBackend, FeedbackConfig, JudgesConfig, PipelineConfig, StageSpec,
};
pub use corrector::{
    correct_with_retry, CorrectionPolicy, CorrectionRequest, Corrector, CorrectorError, PriorCase,
};
pub use domain::{
    CheckResult, CodegateError, Report, Requirements, Result, Session, SessionState, TestCase,
    VerificationRequest,
};
pub use embedding::{Embedder, HashingEmbedder};
pub use feedback::{FeedbackRecord, FeedbackStore, SimilarCase};
pub use pipeline::{PipelineSettings, SessionOutcome, VerificationPipeline};
pub use registry::{RegistryBuilder, StageEntry, StageRegistry};
pub use reporter::{JsonReporter, MarkdownReporter, Reporter};
pub use stage::Stage;
pub use telemetry::init_tracing;

pub use feedback_state::{ContentDigest, FeedbackLog, MemoryFeedbackLog, SurrealFeedbackLog};
pub use tokio_util::sync::CancellationToken;
pub use uuid::Uuid;
