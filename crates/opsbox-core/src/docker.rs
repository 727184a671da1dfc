//! Thin typed wrapper over the `docker` CLI.

use serde::Deserialize;
use tracing::debug;

use crate::error::{OpsError, Result};
use crate::process::{CommandOutput, CommandRunner, CommandSpec};

const NAMES_FORMAT: &str = "{{.Names}}";
const STATUS_TABLE_FORMAT: &str = "table {{.ID}}\t{{.Names}}\t{{.Image}}\t{{.Status}}\t{{.Ports}}";

/// Parameters for `docker run -d`.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub name: String,
    pub env: Vec<(String, String)>,
    pub ports: Vec<(u16, u16)>,
    pub volumes: Vec<(String, String)>,
    pub image: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogMode {
    /// Last 100 lines.
    #[default]
    Tail,
    All,
    Follow,
}

/// One row of `docker system df`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiskUsageRow {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "TotalCount")]
    pub total: String,
    #[serde(rename = "Active")]
    pub active: String,
    #[serde(rename = "Size")]
    pub size: String,
    #[serde(rename = "Reclaimable")]
    pub reclaimable: String,
}

/// One row of `docker images`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageRow {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Repository")]
    pub repository: String,
    #[serde(rename = "Tag")]
    pub tag: String,
    #[serde(rename = "CreatedAt")]
    pub created_at: String,
    #[serde(rename = "Size")]
    pub size: String,
}

impl ImageRow {
    pub fn reference(&self) -> String {
        if self.repository == "<none>" {
            self.id.clone()
        } else {
            format!("{}:{}", self.repository, self.tag)
        }
    }
}

pub struct Docker<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> Docker<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &'a dyn CommandRunner {
        self.runner
    }

    fn spec<I, S>(args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new("docker").args(args)
    }

    async fn capture<I, S>(&self, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner.capture(&Self::spec(args)).await
    }

    async fn checked<I, S>(&self, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = Self::spec(args);
        self.runner.capture(&spec).await?.into_result(&spec)
    }

    /// Fails unless the binary is on `PATH` and the daemon answers `docker info`.
    pub async fn ensure_available(&self) -> Result<()> {
        if !self.runner.which("docker") {
            return Err(OpsError::ToolMissing("docker".to_string()));
        }
        let info = self.capture(["info"]).await?;
        if !info.success() {
            return Err(OpsError::DockerUnavailable(info.stderr.trim().to_string()));
        }
        Ok(())
    }

    pub async fn container_names(&self, include_stopped: bool) -> Result<Vec<String>> {
        let output = if include_stopped {
            self.capture(["ps", "-a", "--format", NAMES_FORMAT]).await?
        } else {
            self.capture(["ps", "--format", NAMES_FORMAT]).await?
        };
        if !output.success() {
            debug!(stderr = %output.stderr.trim(), "docker ps failed");
            return Ok(Vec::new());
        }
        Ok(output.lines().into_iter().map(String::from).collect())
    }

    pub async fn container_exists(&self, name: &str) -> Result<bool> {
        Ok(self.container_names(true).await?.iter().any(|n| n == name))
    }

    pub async fn container_running(&self, name: &str) -> Result<bool> {
        Ok(self.container_names(false).await?.iter().any(|n| n == name))
    }

    pub async fn names_by_ancestor(&self, image: &str) -> Result<Vec<String>> {
        let filter = format!("ancestor={image}");
        let output = self
            .capture(["ps", "-a", "--format", NAMES_FORMAT, "--filter", filter.as_str()])
            .await?;
        Ok(output.lines().into_iter().map(String::from).collect())
    }

    pub async fn start(&self, name: &str) -> Result<CommandOutput> {
        self.capture(["start", name]).await
    }

    pub async fn stop(&self, name: &str) -> Result<CommandOutput> {
        self.capture(["stop", name]).await
    }

    pub async fn restart(&self, name: &str) -> Result<CommandOutput> {
        self.capture(["restart", name]).await
    }

    pub async fn remove_force(&self, name: &str) -> Result<CommandOutput> {
        self.capture(["rm", "-f", name]).await
    }

    pub async fn run(&self, spec: &RunSpec) -> Result<CommandOutput> {
        let mut args: Vec<String> = vec!["run".into(), "-d".into(), "--name".into(), spec.name.clone()];
        for (key, value) in &spec.env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        for (host, container) in &spec.ports {
            args.push("-p".into());
            args.push(format!("{host}:{container}"));
        }
        for (volume, target) in &spec.volumes {
            args.push("-v".into());
            args.push(format!("{volume}:{target}"));
        }
        args.push(spec.image.clone());
        self.capture(args).await
    }

    pub async fn exec_capture(&self, container: &str, command: &[&str]) -> Result<CommandOutput> {
        let mut args = vec!["exec", container];
        args.extend_from_slice(command);
        self.capture(args).await
    }

    pub async fn exec_stream(&self, container: &str, command: &[&str]) -> Result<i32> {
        let mut args = vec!["exec", container];
        args.extend_from_slice(command);
        self.runner.stream(&Self::spec(args)).await
    }

    pub async fn copy_into(&self, source: &str, container: &str, target: &str) -> Result<()> {
        let destination = format!("{container}:{target}");
        self.checked(["cp", source, destination.as_str()]).await?;
        Ok(())
    }

    pub async fn logs(&self, container: &str, mode: LogMode) -> Result<i32> {
        let spec = match mode {
            LogMode::Tail => Self::spec(["logs", "--tail", "100", container]),
            LogMode::All => Self::spec(["logs", container]),
            LogMode::Follow => Self::spec(["logs", "-f", container]),
        };
        self.runner.stream(&spec).await
    }

    pub async fn ps_table(&self, name: &str) -> Result<i32> {
        let filter = format!("name={name}");
        let spec = Self::spec(["ps", "--filter", filter.as_str(), "--format", STATUS_TABLE_FORMAT]);
        self.runner.stream(&spec).await
    }

    /// Port mappings as printed by `docker port`; empty when unavailable.
    pub async fn port(&self, container: &str) -> Result<String> {
        let output = self.capture(["port", container]).await?;
        Ok(if output.success() {
            output.stdout.trim().to_string()
        } else {
            String::new()
        })
    }

    pub async fn image_of(&self, container: &str) -> Result<Option<String>> {
        let output = self
            .capture(["inspect", "-f", "{{.Config.Image}}", container])
            .await?;
        Ok(output.success().then(|| output.stdout.trim().to_string()))
    }

    pub async fn log_path(&self, container: &str) -> Result<Option<String>> {
        let output = self
            .capture(["inspect", "--format", "{{.LogPath}}", container])
            .await?;
        let path = output.stdout.trim();
        Ok((output.success() && !path.is_empty()).then(|| path.to_string()))
    }

    pub async fn volume_names(&self) -> Result<Vec<String>> {
        let output = self.capture(["volume", "ls", "-q"]).await?;
        if !output.success() {
            return Ok(Vec::new());
        }
        Ok(output.lines().into_iter().map(String::from).collect())
    }

    pub async fn volume_remove(&self, name: &str) -> Result<CommandOutput> {
        self.capture(["volume", "rm", name]).await
    }

    pub async fn disk_usage(&self) -> Result<Vec<DiskUsageRow>> {
        let output = self.checked(["system", "df", "--format", "{{json .}}"]).await?;
        parse_json_lines(&output.stdout)
    }

    pub async fn images(&self) -> Result<Vec<ImageRow>> {
        let output = self.checked(["images", "--format", "{{json .}}"]).await?;
        parse_json_lines(&output.stdout)
    }

    pub async fn remove_image(&self, id: &str) -> Result<CommandOutput> {
        self.capture(["rmi", id]).await
    }
}

fn parse_json_lines<T: for<'de> Deserialize<'de>>(stdout: &str) -> Result<Vec<T>> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(OpsError::from))
        .collect()
}
