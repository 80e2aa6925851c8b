//! codegate - verification gate for generated code
//!
//! ## Commands
//!
//! - `verify`: run every configured stage once and print the report
//! - `session`: run the bounded correction loop
//! - `similar`: list prior cases similar to a request
//! - `config check`: validate a configuration file
//!
//! Exit status is 0 when the code is verified, 2 when it is not (or the
//! session escalated) and 1 on any error.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use codegate_core::reporter::status_label;
use codegate_core::{
    write_report_artifact, FeedbackBackend, FeedbackStore, HashingEmbedder, JsonReporter,
    MarkdownReporter, PipelineConfig, Report, Reporter, SurrealFeedbackLog, VerificationPipeline,
    VerificationRequest,
};
use codegate_stages::{build_corrector, build_registry};
use comfy_table::{presets, Cell, ContentArrangement, Table};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "codegate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Verification gate for generated code", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Markdown,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a candidate once
    Verify {
        /// Request file (JSON VerificationRequest)
        #[arg(short, long)]
        request: PathBuf,

        /// Pipeline configuration (TOML)
        #[arg(short, long, env = "CODEGATE_CONFIG", default_value = "codegate.toml")]
        config: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,

        /// Write report.json and report.digest under this directory
        #[arg(long)]
        artifacts_dir: Option<PathBuf>,

        /// Record the report in the feedback store
        #[arg(long)]
        record: bool,
    },

    /// Verify with correction until verified or escalated
    Session {
        #[arg(short, long)]
        request: PathBuf,

        #[arg(short, long, env = "CODEGATE_CONFIG", default_value = "codegate.toml")]
        config: PathBuf,

        /// Override `max_attempts` from the configuration
        #[arg(long)]
        max_attempts: Option<u32>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,

        #[arg(long)]
        artifacts_dir: Option<PathBuf>,
    },

    /// List prior cases similar to a request
    Similar {
        #[arg(short, long)]
        request: PathBuf,

        #[arg(short, long, env = "CODEGATE_CONFIG", default_value = "codegate.toml")]
        config: PathBuf,

        /// Number of cases to return
        #[arg(short, default_value = "3")]
        k: usize,
    },

    /// Configuration utilities
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a configuration file and build its registry
    Check {
        #[arg(short, long, env = "CODEGATE_CONFIG", default_value = "codegate.toml")]
        config: PathBuf,
    },
}

/// How a successful command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Verified,
    NotVerified,
    /// Commands without a verdict (`similar`, `config check`).
    Done,
}

impl Verdict {
    fn of(report: &Report) -> Self {
        if report.verified {
            Verdict::Verified
        } else {
            Verdict::NotVerified
        }
    }

    fn exit_code(self) -> ExitCode {
        match self {
            Verdict::Verified | Verdict::Done => ExitCode::SUCCESS,
            Verdict::NotVerified => ExitCode::from(2),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    codegate_core::init_tracing(cli.json, level);

    match run(cli.command).await {
        Ok(verdict) => verdict.exit_code(),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(command: Commands) -> Result<Verdict> {
    match command {
        Commands::Verify {
            request,
            config,
            format,
            artifacts_dir,
            record,
        } => cmd_verify(&request, &config, format, artifacts_dir.as_deref(), record).await,
        Commands::Session {
            request,
            config,
            max_attempts,
            format,
            artifacts_dir,
        } => cmd_session(&request, &config, max_attempts, format, artifacts_dir.as_deref()).await,
        Commands::Similar { request, config, k } => cmd_similar(&request, &config, k).await,
        Commands::Config { action } => match action {
            ConfigAction::Check { config } => cmd_config_check(&config),
        },
    }
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    PipelineConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))
}

fn load_request(path: &Path) -> Result<VerificationRequest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid request file {}", path.display()))
}

async fn open_feedback(config: &PipelineConfig) -> Result<Arc<FeedbackStore>> {
    let embedder = Arc::new(HashingEmbedder::new(config.feedback.embedding_dims));
    let store = match config.feedback.backend {
        FeedbackBackend::Memory => FeedbackStore::in_memory(),
        FeedbackBackend::Surreal => {
            let log = match &config.feedback.url {
                Some(url) => SurrealFeedbackLog::connect(url).await,
                None => SurrealFeedbackLog::from_env().await,
            }
            .context("Failed to connect to feedback store")?;
            FeedbackStore::new(Arc::new(log))
        }
    };
    Ok(Arc::new(
        store
            .with_embedder(embedder)
            .with_timeout(config.feedback.timeout()),
    ))
}

async fn build_pipeline(config: &PipelineConfig) -> Result<VerificationPipeline> {
    let registry = build_registry(config).context("Failed to build stage registry")?;
    let mut pipeline = VerificationPipeline::new(Arc::new(registry))
        .with_settings(config.settings())
        .with_feedback(open_feedback(config).await?);
    if let Some(corrector) = build_corrector(config)? {
        pipeline = pipeline.with_corrector(corrector);
    }
    Ok(pipeline)
}

fn render(report: &Report, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => JsonReporter.render(report),
        OutputFormat::Markdown => MarkdownReporter.render(report),
        OutputFormat::Table => render_table(report),
    }
}

fn stage_status(result: &codegate_core::CheckResult) -> &'static str {
    if result.is_skipped() {
        "skipped"
    } else if result.passed {
        "pass"
    } else if result.error.is_some() {
        "error"
    } else {
        "fail"
    }
}

fn render_table(report: &Report) -> String {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["STAGE", "STATUS", "SCORE", "FINDINGS"]);

    for result in &report.results {
        let mut notes: Vec<String> = result.error.iter().cloned().collect();
        notes.extend(result.findings.iter().cloned());
        table.add_row(vec![
            Cell::new(&result.stage_name),
            Cell::new(stage_status(result)),
            Cell::new(
                result
                    .score
                    .map_or_else(|| "-".to_string(), |s| format!("{s:.2}")),
            ),
            Cell::new(notes.join("\n")),
        ]);
    }

    let mut out = format!(
        "Status: {}\nScore: {:.3}\nAttempt: {}\nReport: {}\n",
        status_label(report),
        report.overall_score,
        report.attempt_number,
        report.id
    );
    if let Some(reason) = &report.escalation_reason {
        out.push_str(&format!("Escalation: {reason}\n"));
    }
    out.push('\n');
    out.push_str(&table.to_string());
    out
}

fn write_artifact(report: &Report, dir: Option<&Path>) -> Result<()> {
    if let Some(dir) = dir {
        let path = write_report_artifact(report, dir)
            .with_context(|| format!("Failed to write artifact under {}", dir.display()))?;
        info!(path = %path.display(), "report artifact written");
    }
    Ok(())
}

async fn cmd_verify(
    request_path: &Path,
    config_path: &Path,
    format: OutputFormat,
    artifacts_dir: Option<&Path>,
    record: bool,
) -> Result<Verdict> {
    let config = load_config(config_path)?;
    let request = load_request(request_path)?;
    let pipeline = build_pipeline(&config).await?;

    let report = pipeline
        .verify(&request)
        .await
        .context("Verification failed to run")?;

    if record {
        if let Some(feedback) = pipeline.feedback() {
            feedback
                .try_record(&report)
                .await
                .context("Failed to record report")?;
        }
    }
    write_artifact(&report, artifacts_dir)?;
    println!("{}", render(&report, format));
    Ok(Verdict::of(&report))
}

async fn cmd_session(
    request_path: &Path,
    config_path: &Path,
    max_attempts: Option<u32>,
    format: OutputFormat,
    artifacts_dir: Option<&Path>,
) -> Result<Verdict> {
    let config = load_config(config_path)?;
    let request = load_request(request_path)?;
    let pipeline = build_pipeline(&config).await?;

    let outcome = pipeline
        .run_session(&request, max_attempts.unwrap_or(config.max_attempts))
        .await
        .context("Session failed to run")?;

    for report in &outcome.attempts {
        write_artifact(report, artifacts_dir)?;
    }
    if format == OutputFormat::Table {
        println!("Session: {} ({:?})", outcome.session_id, outcome.state);
        for attempt in &outcome.attempts {
            println!(
                "  attempt {}: {:.3} {}",
                attempt.attempt_number,
                attempt.overall_score,
                status_label(attempt)
            );
        }
        println!();
    }
    println!("{}", render(&outcome.report, format));
    Ok(Verdict::of(&outcome.report))
}

async fn cmd_similar(request_path: &Path, config_path: &Path, k: usize) -> Result<Verdict> {
    let config = load_config(config_path)?;
    let request = load_request(request_path)?;
    let feedback = open_feedback(&config).await?;

    let cases = feedback.similar_cases(&request.requirements, k).await;
    if cases.is_empty() {
        println!("No similar cases found.");
        return Ok(Verdict::Done);
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["REPORT", "SIMILARITY", "EXACT", "STATUS", "SCORE"]);
    for case in &cases {
        let report = &case.record.report;
        table.add_row(vec![
            report.id.to_string(),
            format!("{:.3}", case.similarity),
            if case.exact_match { "yes" } else { "no" }.to_string(),
            status_label(report).to_string(),
            format!("{:.3}", report.overall_score),
        ]);
    }
    println!("{table}");
    Ok(Verdict::Done)
}

fn cmd_config_check(config_path: &Path) -> Result<Verdict> {
    let config = load_config(config_path)?;
    let registry = build_registry(&config).context("Failed to build stage registry")?;

    println!("Config OK: {}", config_path.display());
    println!("Pass threshold: {}", registry.pass_threshold());
    println!("Max attempts: {}", config.max_attempts);
    for entry in registry.entries() {
        println!(
            "  {} (weight {:.3}, timeout {}s{})",
            entry.stage.name(),
            entry.weight,
            entry.timeout.as_secs(),
            if entry.stage.is_blocking() { ", blocking" } else { "" }
        );
    }
    if config.corrector.endpoint.is_none() {
        println!("No corrector configured: sessions escalate after the first failed attempt");
    }
    Ok(Verdict::Done)
}
