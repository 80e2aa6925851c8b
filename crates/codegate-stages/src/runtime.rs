//! Runtime test stage: runs requirement-derived cases against the code.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use codegate_core::{CheckResult, Stage, TestCase, VerificationRequest};
use futures::future::join_all;
use tracing::debug;

use crate::collaborators::{CaseOutcome, TestRunner};
use crate::runner::{command_for, write_source, CommandRunner, CommandSpec};

/// Loads the module at `argv[1]` into a namespace, then executes the case
/// script read from stdin in that namespace.
const PYTHON_HARNESS: &str = "import sys\n\
ns = {'__name__': 'codegate_case'}\n\
exec(compile(open(sys.argv[1]).read(), sys.argv[1], 'exec'), ns)\n\
exec(compile(sys.stdin.read(), '<case>', 'exec'), ns)\n";

const NODE_HARNESS: &str = "const fs = require('fs');\
const src = fs.readFileSync(process.argv[1], 'utf8');\
const input = fs.readFileSync(0, 'utf8');\
eval(src + '\\n;\\n' + input);";

/// Runs each case as a fresh subprocess: `{file}` holds the candidate code,
/// the case input arrives on stdin, trimmed stdout is compared with the
/// expected value.
pub struct CommandTestRunner {
    harnesses: BTreeMap<String, CommandSpec>,
    runner: CommandRunner,
}

impl Default for CommandTestRunner {
    fn default() -> Self {
        let node = CommandSpec::new(["node", "-e", NODE_HARNESS, "{file}"]);
        let mut harnesses = BTreeMap::new();
        harnesses.insert(
            "python".to_string(),
            CommandSpec::new(["python3", "-c", PYTHON_HARNESS, "{file}"]),
        );
        harnesses.insert("javascript".to_string(), node);
        Self {
            harnesses,
            runner: CommandRunner::default(),
        }
    }
}

impl CommandTestRunner {
    pub fn empty() -> Self {
        Self {
            harnesses: BTreeMap::new(),
            runner: CommandRunner::default(),
        }
    }

    pub fn with_harness(mut self, language: impl Into<String>, command: CommandSpec) -> Self {
        self.harnesses
            .insert(language.into().to_ascii_lowercase(), command);
        self
    }

    pub fn with_runner(mut self, runner: CommandRunner) -> Self {
        self.runner = runner;
        self
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run_case(
        &self,
        code: &str,
        language: &str,
        case: &TestCase,
    ) -> anyhow::Result<CaseOutcome> {
        let harness = command_for(&self.harnesses, language)
            .ok_or_else(|| anyhow::anyhow!("no test harness for language `{language}`"))?;
        let file = write_source(code, language)?;
        let output = self
            .runner
            .run(harness, Some(file.path()), Some(&case.input))
            .await?;

        debug!(case = %case.name, exit_code = output.exit_code, duration_ms = output.duration_ms, "case finished");

        if output.timed_out {
            return Ok(CaseOutcome {
                name: case.name.clone(),
                passed: false,
                actual: None,
                error: Some(format!(
                    "timed out after {}s",
                    self.runner.timeout().as_secs_f64()
                )),
            });
        }
        if output.exit_code != 0 {
            let path = file.path().to_string_lossy().into_owned();
            let detail = output
                .stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no output")
                .replace(&path, "<source>");
            return Ok(CaseOutcome {
                name: case.name.clone(),
                passed: false,
                actual: None,
                error: Some(format!("exit code {}: {}", output.exit_code, detail.trim())),
            });
        }

        let actual = output.stdout.trim().to_string();
        Ok(CaseOutcome {
            name: case.name.clone(),
            passed: actual == case.expected.trim(),
            actual: Some(actual),
            error: None,
        })
    }
}

pub struct RuntimeTestStage {
    name: String,
    runner: Arc<dyn TestRunner>,
}

impl RuntimeTestStage {
    pub fn new(name: impl Into<String>, runner: Arc<dyn TestRunner>) -> Self {
        Self {
            name: name.into(),
            runner,
        }
    }
}

#[async_trait]
impl Stage for RuntimeTestStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, request: &VerificationRequest) -> anyhow::Result<CheckResult> {
        let cases = &request.requirements.test_cases;
        if cases.is_empty() {
            return Ok(CheckResult::pass(&self.name));
        }

        let language = request.requirements.language.as_str();
        let outcomes = join_all(
            cases
                .iter()
                .map(|case| self.runner.run_case(&request.code, language, case)),
        )
        .await;

        let mut passed = 0usize;
        let mut findings = Vec::new();
        for (case, outcome) in cases.iter().zip(outcomes) {
            match outcome {
                Ok(o) if o.passed => passed += 1,
                Ok(o) => findings.push(o.describe_failure(&case.expected)),
                Err(e) => findings.push(format!("case `{}` errored: {e}", case.name)),
            }
        }

        let score = passed as f64 / cases.len() as f64;
        Ok(CheckResult::new(&self.name, passed == cases.len(), Some(score)).with_findings(findings))
    }
}
