//! Lint stage and the command-backed linter.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use codegate_core::{CheckResult, Stage, VerificationRequest};

use crate::collaborators::{LintOutcome, Linter};
use crate::runner::{command_for, write_source, CommandRunner, CommandSpec};

/// Runs an external linter on a temp copy of the code.
///
/// Exit status zero means clean; output lines become diagnostics with the
/// temp path replaced by `<source>`.
pub struct CommandLinter {
    commands: BTreeMap<String, CommandSpec>,
    runner: CommandRunner,
}

impl Default for CommandLinter {
    fn default() -> Self {
        let eslint = CommandSpec::new(["eslint", "--format", "unix", "{file}"]);
        let mut commands = BTreeMap::new();
        commands.insert("javascript".to_string(), eslint.clone());
        commands.insert("typescript".to_string(), eslint.clone());
        commands.insert("vue".to_string(), eslint);
        commands.insert(
            "python".to_string(),
            CommandSpec::new(["pylint", "--output-format=text", "--score=n", "{file}"]),
        );
        Self {
            commands,
            runner: CommandRunner::default(),
        }
    }
}

impl CommandLinter {
    /// A linter with no commands configured.
    pub fn empty() -> Self {
        Self {
            commands: BTreeMap::new(),
            runner: CommandRunner::default(),
        }
    }

    pub fn with_command(mut self, language: impl Into<String>, command: CommandSpec) -> Self {
        self.commands
            .insert(language.into().to_ascii_lowercase(), command);
        self
    }

    pub fn with_runner(mut self, runner: CommandRunner) -> Self {
        self.runner = runner;
        self
    }
}

#[async_trait]
impl Linter for CommandLinter {
    async fn lint(&self, code: &str, language: &str) -> anyhow::Result<LintOutcome> {
        let Some(command) = command_for(&self.commands, language) else {
            return Ok(LintOutcome {
                clean: true,
                diagnostics: vec![format!("no linter configured for language `{language}`")],
            });
        };

        let file = write_source(code, language)?;
        let output = self.runner.run(command, Some(file.path()), None).await?;
        if output.timed_out {
            anyhow::bail!(
                "linter `{}` timed out",
                command.program().unwrap_or_default()
            );
        }

        let path = file.path().to_string_lossy().into_owned();
        Ok(LintOutcome {
            clean: output.success(),
            diagnostics: output
                .lines()
                .into_iter()
                .map(|l| l.replace(&path, "<source>"))
                .collect(),
        })
    }
}

pub struct LintStage {
    name: String,
    linter: Arc<dyn Linter>,
}

impl LintStage {
    pub fn new(name: impl Into<String>, linter: Arc<dyn Linter>) -> Self {
        Self {
            name: name.into(),
            linter,
        }
    }
}

#[async_trait]
impl Stage for LintStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, request: &VerificationRequest) -> anyhow::Result<CheckResult> {
        let outcome = self
            .linter
            .lint(&request.code, &request.requirements.language)
            .await?;
        let result = if outcome.clean {
            CheckResult::pass(&self.name)
        } else {
            CheckResult::fail(&self.name, Vec::new())
        };
        Ok(result.with_findings(outcome.diagnostics))
    }
}
