//! Subprocess execution for command-backed collaborators.
//!
//! Code under test is written to a temp file with the language's extension;
//! `{file}` in a command template is replaced by its path. Child processes
//! are spawned with `kill_on_drop`, so a timeout or a cancelled stage kills
//! them.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Placeholder replaced with the source file path.
pub const FILE_PLACEHOLDER: &str = "{file}";

/// A command template: program plus arguments, e.g.
/// `["node", "--check", "{file}"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandSpec(Vec<String>);

impl CommandSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(argv.into_iter().map(Into::into).collect())
    }

    pub fn argv(&self) -> &[String] {
        &self.0
    }

    pub fn program(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    fn resolve(&self, file: Option<&Path>) -> Vec<String> {
        let path = file.map(|p| p.to_string_lossy().into_owned());
        self.0
            .iter()
            .map(|arg| match &path {
                Some(p) => arg.replace(FILE_PLACEHOLDER, p),
                None => arg.clone(),
            })
            .collect()
    }
}

/// Captured result of one subprocess run.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    /// Non-empty output lines, stdout first.
    pub fn lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .chain(self.stderr.lines())
            .map(str::trim_end)
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Runs command templates with a timeout.
#[derive(Debug, Clone, Copy)]
pub struct CommandRunner {
    timeout: Duration,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `spec` with `{file}` bound to `file`, optionally feeding `stdin`.
    ///
    /// A timeout is reported through `CommandOutput::timed_out`; spawn
    /// failures (missing binary, empty command) are errors.
    pub async fn run(
        &self,
        spec: &CommandSpec,
        file: Option<&Path>,
        stdin: Option<&str>,
    ) -> anyhow::Result<CommandOutput> {
        let start = Instant::now();
        let argv = spec.resolve(file);
        let Some((exe, args)) = argv.split_first() else {
            anyhow::bail!("empty command");
        };

        debug!(program = %exe, args = ?args, "spawning command");

        let mut child = Command::new(exe)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn {exe}: {e}"))?;

        let pipe = child.stdin.take();
        let io = async move {
            // Feed stdin while stdout and stderr drain, so a chatty child
            // never blocks on a full pipe.
            let feed = async move {
                if let (Some(input), Some(mut pipe)) = (stdin, pipe) {
                    // A child that exits without reading stdin closes the pipe early.
                    if let Err(e) = pipe.write_all(input.as_bytes()).await {
                        debug!(error = %e, "stdin write failed");
                    }
                }
            };
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        match tokio::time::timeout(self.timeout, io).await {
            Ok(output) => {
                let output = output?;
                Ok(CommandOutput {
                    exit_code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    duration_ms: start.elapsed().as_millis() as u64,
                    timed_out: false,
                })
            }
            Err(_) => Ok(CommandOutput {
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("timed out after {}s", self.timeout.as_secs()),
                duration_ms: start.elapsed().as_millis() as u64,
                timed_out: true,
            }),
        }
    }
}

/// File extension for a language tag.
pub fn language_extension(language: &str) -> &'static str {
    match language.to_ascii_lowercase().as_str() {
        "vue" => "vue",
        "javascript" | "js" => "js",
        "typescript" | "ts" => "ts",
        "jsx" => "jsx",
        "tsx" => "tsx",
        "python" | "py" => "py",
        "rust" | "rs" => "rs",
        "go" => "go",
        "java" => "java",
        "c" => "c",
        "cpp" | "c++" => "cpp",
        "json" => "json",
        "css" => "css",
        _ => "txt",
    }
}

/// Write `code` to a temp file named after `language`.
pub fn write_source(code: &str, language: &str) -> anyhow::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("codegate-")
        .suffix(&format!(".{}", language_extension(language)))
        .tempfile()?;
    std::io::Write::write_all(&mut file, code.as_bytes())?;
    std::io::Write::flush(&mut file)?;
    Ok(file)
}

/// Look up the command for `language`, accepting common aliases.
pub fn command_for<'a>(
    commands: &'a std::collections::BTreeMap<String, CommandSpec>,
    language: &str,
) -> Option<&'a CommandSpec> {
    let lang = language.to_ascii_lowercase();
    commands.get(&lang).or_else(|| {
        let ext = language_extension(&lang);
        commands
            .iter()
            .find(|(k, _)| language_extension(k) == ext && ext != "txt")
            .map(|(_, v)| v)
    })
}
