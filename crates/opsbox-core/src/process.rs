//! External program execution.
//!
//! Every shell-out goes through [`CommandRunner`], so the lifecycle and
//! cleanup logic can run against real processes, a dry-run logger or a
//! scripted fake.

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{OpsError, Result};
use crate::interrupt::Interrupt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.chars().any(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Non-empty, trimmed stdout lines.
    pub fn lines(&self) -> Vec<&str> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect()
    }

    pub fn into_result(self, spec: &CommandSpec) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(OpsError::CommandFailed {
                command: spec.to_string(),
                status: self.status,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the command to completion and captures stdout/stderr.
    async fn capture(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Runs the command attached to the terminal and returns its exit status.
    async fn stream(&self, spec: &CommandSpec) -> Result<i32>;

    /// Whether `program` resolves on `PATH`.
    fn which(&self, program: &str) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn capture(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %spec, "Running command");
        let output = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| spawn_error(spec, err))?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn stream(&self, spec: &CommandSpec) -> Result<i32> {
        debug!(command = %spec, "Streaming command");
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .spawn()
            .map_err(|err| spawn_error(spec, err))?;

        let mut interrupted = Interrupt::global().listen();
        tokio::select! {
            status = child.wait() => Ok(status?.code().unwrap_or(-1)),
            _ = interrupted.triggered() => {
                if let Err(err) = child.kill().await {
                    warn!(command = %spec, error = %err, "Failed to stop interrupted command");
                }
                info!(command = %spec, "Interrupted");
                Ok(130)
            }
        }
    }

    fn which(&self, program: &str) -> bool {
        let Some(paths) = std::env::var_os("PATH") else {
            return false;
        };
        std::env::split_paths(&paths).any(|dir| is_executable(&dir.join(program)))
    }
}

fn spawn_error(spec: &CommandSpec, err: std::io::Error) -> OpsError {
    if err.kind() == std::io::ErrorKind::NotFound {
        OpsError::ToolMissing(spec.program.clone())
    } else {
        OpsError::Io(err)
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

/// Logs commands instead of running them. Every command "succeeds" with no
/// output, so read-only probes see an empty world.
#[derive(Debug, Default)]
pub struct DryRunRunner {
    calls: Mutex<Vec<CommandSpec>>,
}

impl DryRunRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn record(&self, spec: &CommandSpec) {
        info!(command = %spec, "dry-run");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }
    }
}

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn capture(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.record(spec);
        Ok(CommandOutput::ok(""))
    }

    async fn stream(&self, spec: &CommandSpec) -> Result<i32> {
        self.record(spec);
        Ok(0)
    }

    fn which(&self, _program: &str) -> bool {
        true
    }
}

struct Rule {
    prefix: String,
    queued: VecDeque<CommandOutput>,
    last: CommandOutput,
}

/// In-memory runner that records every command and replies from rules keyed
/// by a prefix of the rendered command line. The longest matching prefix
/// wins; queued replies are consumed in order and the last one repeats.
/// Unmatched commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    calls: Mutex<Vec<CommandSpec>>,
    rules: Mutex<Vec<Rule>>,
    missing: Vec<String>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, prefix: impl Into<String>, output: CommandOutput) -> Self {
        self.on_sequence(prefix, vec![output])
    }

    pub fn on_sequence(self, prefix: impl Into<String>, outputs: Vec<CommandOutput>) -> Self {
        let mut queued: VecDeque<CommandOutput> = outputs.into();
        let last = queued.back().cloned().unwrap_or_else(|| CommandOutput::ok(""));
        if queued.len() == 1 {
            queued.clear();
        }
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                prefix: prefix.into(),
                queued,
                last,
            });
        }
        self
    }

    pub fn without_program(mut self, program: impl Into<String>) -> Self {
        self.missing.push(program.into());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.iter().map(ToString::to_string).collect())
            .unwrap_or_default()
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(prefix))
            .collect()
    }

    fn reply(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        if self.missing.iter().any(|program| program == &spec.program) {
            return Err(OpsError::ToolMissing(spec.program.clone()));
        }

        let line = spec.to_string();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }

        let mut rules = match self.rules.lock() {
            Ok(rules) => rules,
            Err(_) => return Ok(CommandOutput::ok("")),
        };
        let best = rules
            .iter_mut()
            .filter(|rule| line.starts_with(&rule.prefix))
            .max_by_key(|rule| rule.prefix.len());

        Ok(match best {
            Some(rule) => rule.queued.pop_front().unwrap_or_else(|| rule.last.clone()),
            None => CommandOutput::ok(""),
        })
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn capture(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.reply(spec)
    }

    async fn stream(&self, spec: &CommandSpec) -> Result<i32> {
        self.reply(spec).map(|output| output.status)
    }

    fn which(&self, program: &str) -> bool {
        !self.missing.iter().any(|missing| missing == program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_whitespace_arguments() {
        let spec = CommandSpec::new("docker")
            .args(["exec", "pg", "psql", "-c"])
            .arg("SELECT 1;")
            .arg("");
        assert_eq!(spec.to_string(), "docker exec pg psql -c 'SELECT 1;' ''");
        assert!(spec.has_arg("psql"));
    }

    #[test]
    fn failed_output_becomes_command_error() {
        let spec = CommandSpec::new("docker").arg("info");
        let err = CommandOutput::failed(1, "permission denied\n")
            .into_result(&spec)
            .unwrap_err();
        match err {
            OpsError::CommandFailed {
                command,
                status,
                stderr,
            } => {
                assert_eq!(command, "docker info");
                assert_eq!(status, 1);
                assert_eq!(stderr, "permission denied");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn scripted_runner_prefers_longest_prefix_and_sequences() {
        let runner = ScriptedRunner::new()
            .on("docker ps", CommandOutput::ok("running\n"))
            .on("docker ps -a", CommandOutput::ok("all\n"))
            .on_sequence(
                "docker exec pg pg_isready",
                vec![CommandOutput::failed(2, ""), CommandOutput::ok("")],
            );

        let ps = CommandSpec::new("docker").arg("ps");
        let ps_all = CommandSpec::new("docker").args(["ps", "-a"]);
        let ready = CommandSpec::new("docker").args(["exec", "pg", "pg_isready"]);

        assert_eq!(runner.capture(&ps).await.unwrap().stdout, "running\n");
        assert_eq!(runner.capture(&ps_all).await.unwrap().stdout, "all\n");
        assert_eq!(runner.stream(&ready).await.unwrap(), 2);
        assert_eq!(runner.stream(&ready).await.unwrap(), 0);
        assert_eq!(runner.stream(&ready).await.unwrap(), 0);
        assert_eq!(runner.calls().len(), 5);
    }

    #[tokio::test]
    async fn scripted_runner_reports_missing_programs() {
        let runner = ScriptedRunner::new().without_program("docker");
        assert!(!runner.which("docker"));
        let err = runner
            .capture(&CommandSpec::new("docker").arg("info"))
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::ToolMissing(program) if program == "docker"));
    }

    #[tokio::test]
    async fn dry_run_records_without_running() {
        let runner = DryRunRunner::new();
        let spec = CommandSpec::new("definitely-not-a-real-binary").arg("--boom");
        assert_eq!(runner.stream(&spec).await.unwrap(), 0);
        assert_eq!(runner.calls(), vec![spec]);
    }
}
