//! Lifecycle of one database container.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::RemoteDumpConfig;
use crate::docker::{Docker, LogMode, RunSpec};
use crate::error::{OpsError, Result};
use crate::postgres::dumps::{find_dump_files, human_size, resolve_dump_path};
use crate::postgres::profile::DatabaseProfile;
use crate::postgres::remote::RemoteDump;
use crate::process::CommandRunner;
use crate::prompt::{choose_number, confirm, confirm_typed, Prompter};

pub const CONTAINER_DUMP_PATH: &str = "/tmp/dbdump.db";
const DATA_DIR: &str = "/var/lib/postgresql/data";
const TABLE_COUNT_SQL: &str =
    "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = 'public';";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopped,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning,
    Started,
    Created { ready: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub dump: PathBuf,
    /// `pg_restore` exited without warnings.
    pub clean: bool,
    pub table_count: Option<u64>,
    pub dump_deleted: bool,
}

pub struct PostgresManager<'a> {
    profile: &'a DatabaseProfile,
    remote: &'a RemoteDumpConfig,
    docker: Docker<'a>,
    ready_attempts: u32,
    ready_interval: Duration,
    cwd: PathBuf,
    home: Option<PathBuf>,
}

impl<'a> PostgresManager<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        profile: &'a DatabaseProfile,
        remote: &'a RemoteDumpConfig,
    ) -> Self {
        Self {
            profile,
            remote,
            docker: Docker::new(runner),
            ready_attempts: 30,
            ready_interval: Duration::from_secs(2),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            home: std::env::var_os("HOME").map(PathBuf::from),
        }
    }

    pub fn with_readiness(mut self, attempts: u32, interval: Duration) -> Self {
        self.ready_attempts = attempts;
        self.ready_interval = interval;
        self
    }

    /// Directories used for dump discovery and relative path resolution.
    pub fn with_search_dirs(mut self, cwd: impl Into<PathBuf>, home: Option<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self.home = home;
        self
    }

    pub fn profile(&self) -> &DatabaseProfile {
        self.profile
    }

    fn name(&self) -> &str {
        &self.profile.container_name
    }

    pub async fn state(&self) -> Result<ContainerState> {
        if !self.docker.container_exists(self.name()).await? {
            Ok(ContainerState::Missing)
        } else if self.docker.container_running(self.name()).await? {
            Ok(ContainerState::Running)
        } else {
            Ok(ContainerState::Stopped)
        }
    }

    async fn require_running(&self) -> Result<()> {
        if self.docker.container_running(self.name()).await? {
            Ok(())
        } else {
            Err(OpsError::ContainerNotRunning(self.name().to_string()))
        }
    }

    pub async fn status(&self) -> Result<ContainerState> {
        let state = self.state().await?;
        match state {
            ContainerState::Running => {
                info!(container = self.name(), "Container is running");
                self.docker.ps_table(self.name()).await?;
            }
            ContainerState::Stopped => {
                warn!(container = self.name(), "Container exists but is not running")
            }
            ContainerState::Missing => warn!(container = self.name(), "Container does not exist"),
        }
        Ok(state)
    }

    pub async fn start(&self) -> Result<StartOutcome> {
        match self.state().await? {
            ContainerState::Running => {
                info!(container = self.name(), "Container is already running");
                Ok(StartOutcome::AlreadyRunning)
            }
            ContainerState::Stopped => {
                info!(container = self.name(), "Container exists but not running, starting it");
                self.docker.start(self.name()).await?;
                info!(container = self.name(), "Container started successfully");
                Ok(StartOutcome::Started)
            }
            ContainerState::Missing => {
                info!(container = self.name(), "Container does not exist, creating it");
                let spec = self.run_spec();
                let output = self.docker.run(&spec).await?;
                if !output.success() {
                    error!(container = self.name(), "Failed to create and start container");
                    return Err(OpsError::CommandFailed {
                        command: format!("docker run {}", spec.image),
                        status: output.status,
                        stderr: output.stderr.trim().to_string(),
                    });
                }
                info!(container = self.name(), "Container created and started successfully");
                let ready = match self.wait_ready().await {
                    Ok(()) => {
                        self.create_extensions().await?;
                        true
                    }
                    Err(OpsError::Timeout(msg)) => {
                        error!("{msg}");
                        false
                    }
                    Err(err) => return Err(err),
                };
                Ok(StartOutcome::Created { ready })
            }
        }
    }

    fn run_spec(&self) -> RunSpec {
        let p = self.profile;
        RunSpec {
            name: p.container_name.clone(),
            env: vec![
                ("POSTGRES_USER".to_string(), p.postgres_user.clone()),
                ("POSTGRES_PASSWORD".to_string(), p.postgres_password.clone()),
                ("POSTGRES_DB".to_string(), p.postgres_db.clone()),
            ],
            ports: vec![(p.postgres_port, 5432)],
            volumes: vec![(p.volume_name.clone(), DATA_DIR.to_string())],
            image: p.postgres_image.clone(),
        }
    }

    /// Returns `false` when the container was not running.
    pub async fn stop(&self) -> Result<bool> {
        if !self.docker.container_running(self.name()).await? {
            warn!(container = self.name(), "Container is not running");
            return Ok(false);
        }
        info!(container = self.name(), "Stopping container");
        self.docker.stop(self.name()).await?;
        info!(container = self.name(), "Container stopped successfully");
        Ok(true)
    }

    pub async fn restart(&self) -> Result<()> {
        info!(container = self.name(), "Restarting container");
        match self.state().await? {
            ContainerState::Running => {
                self.docker.restart(self.name()).await?;
                info!(container = self.name(), "Container restarted successfully");
            }
            ContainerState::Stopped => {
                self.docker.start(self.name()).await?;
                info!(container = self.name(), "Container started successfully");
            }
            ContainerState::Missing => {
                self.start().await?;
            }
        }
        Ok(())
    }

    /// Polls `pg_isready` until it succeeds or the attempts run out.
    pub async fn wait_ready(&self) -> Result<()> {
        info!(container = self.name(), "Waiting for PostgreSQL to start");
        for attempt in 1..=self.ready_attempts {
            let output = self
                .docker
                .exec_capture(self.name(), &["pg_isready", "-U", self.profile.postgres_user.as_str()])
                .await?;
            if output.success() {
                info!(container = self.name(), "PostgreSQL is ready");
                return Ok(());
            }
            debug!(attempt, max = self.ready_attempts, "PostgreSQL not ready yet");
            if attempt < self.ready_attempts {
                tokio::time::sleep(self.ready_interval).await;
            }
        }
        Err(OpsError::Timeout(format!(
            "PostgreSQL in '{}' failed to start in time",
            self.name()
        )))
    }

    pub async fn create_extensions(&self) -> Result<()> {
        info!(container = self.name(), "Creating required extensions");
        for extension in &self.profile.extensions {
            let sql = format!("CREATE EXTENSION IF NOT EXISTS {extension};");
            let output = self.docker.exec_capture(self.name(), &self.psql(&["-c", &sql])).await?;
            if !output.success() {
                warn!(extension = %extension, stderr = %output.stderr.trim(), "Could not create extension");
            }
        }
        info!("Extensions created");
        Ok(())
    }

    fn psql<'s>(&'s self, extra: &[&'s str]) -> Vec<&'s str> {
        let mut args = vec![
            "psql",
            "-U",
            self.profile.postgres_user.as_str(),
            "-d",
            self.profile.postgres_db.as_str(),
        ];
        args.extend_from_slice(extra);
        args
    }

    /// Streams `\dt` and returns the number of public tables when it could
    /// be counted.
    pub async fn list_tables(&self) -> Result<Option<u64>> {
        self.require_running().await?;
        info!(container = self.name(), "Listing database tables");
        self.docker.exec_stream(self.name(), &self.psql(&["-c", "\\dt"])).await?;

        let output = self
            .docker
            .exec_capture(self.name(), &self.psql(&["-t", "-c", TABLE_COUNT_SQL]))
            .await?;
        if !output.success() {
            return Ok(None);
        }
        let count = output.stdout.trim().parse::<u64>().ok();
        if let Some(count) = count.filter(|c| *c > 0) {
            info!(count, "Total tables in database: {count}");
        }
        Ok(count)
    }

    /// Interactive dump choice: discovered files, remote fetch or a typed
    /// path. `None` when the operator cancels.
    pub async fn select_dump(&self, prompter: &mut dyn Prompter) -> Result<Option<PathBuf>> {
        let dumps = find_dump_files(&self.profile.dump_file_prefix, &self.cwd, self.home.as_deref())?;

        if dumps.is_empty() {
            warn!(container = self.name(), "No dump files found");
            prompter.say("Options:");
            prompter.say("1) Fetch latest dump from remote server");
            prompter.say("2) Enter file path manually");
            prompter.say("3) Cancel");
            loop {
                match choose_number(prompter, "Select option (1-3): ", 3)? {
                    1 => return self.fetch_remote().await.map(Some),
                    2 => {
                        if let Some(path) = ask_path(prompter)? {
                            return Ok(Some(path));
                        }
                    }
                    _ => {
                        info!("Restore cancelled");
                        return Ok(None);
                    }
                }
            }
        }

        prompter.say("Available dump files:");
        for (index, dump) in dumps.iter().enumerate() {
            prompter.say(&format!(
                "{}) {} ({}, {})",
                index + 1,
                dump.file_name(),
                human_size(dump.size),
                dump.modified_date()
            ));
        }
        let fetch_option = dumps.len() + 1;
        let manual_option = dumps.len() + 2;
        prompter.say(&format!("{fetch_option}) Fetch latest dump from remote server"));
        prompter.say(&format!("{manual_option}) Enter file path manually"));

        loop {
            let choice = choose_number(
                prompter,
                &format!("Select dump file (1-{manual_option}): "),
                manual_option,
            )?;
            if choice <= dumps.len() {
                return Ok(Some(dumps[choice - 1].path.clone()));
            }
            if choice == fetch_option {
                return self.fetch_remote().await.map(Some);
            }
            if let Some(path) = ask_path(prompter)? {
                return Ok(Some(path));
            }
        }
    }

    pub async fn fetch_remote(&self) -> Result<PathBuf> {
        info!(profile = self.profile.label(), "Fetching latest dump from remote server");
        let now = chrono::Local::now().naive_local();
        RemoteDump::new(self.docker.runner(), self.remote)
            .fetch(self.profile, now)
            .await
    }

    /// Restores the database from `dump`, or from an interactively chosen
    /// dump when `None`. Returns `Ok(None)` when the operator cancels the
    /// selection.
    pub async fn restore(
        &self,
        dump: Option<&Path>,
        prompter: &mut dyn Prompter,
    ) -> Result<Option<RestoreOutcome>> {
        let chosen = match dump {
            Some(path) => path.to_path_buf(),
            None => match self.select_dump(prompter).await? {
                Some(path) => path,
                None => return Ok(None),
            },
        };
        let dump = resolve_dump_path(&chosen, &self.cwd, self.home.as_deref())?;
        info!(dump = %dump.display(), "Using database dump");

        self.restart().await?;
        self.wait_ready().await?;

        info!(container = self.name(), "Copying database dump to container");
        self.docker
            .copy_into(&dump.to_string_lossy(), self.name(), CONTAINER_DUMP_PATH)
            .await?;

        self.create_extensions().await?;

        info!(container = self.name(), "Restoring database (this may take some time)");
        let status = self
            .docker
            .exec_stream(
                self.name(),
                &[
                    "pg_restore",
                    "--clean",
                    "--no-owner",
                    "-U",
                    self.profile.postgres_user.as_str(),
                    "-d",
                    self.profile.postgres_db.as_str(),
                    "--verbose",
                    CONTAINER_DUMP_PATH,
                ],
            )
            .await?;
        let clean = status == 0;
        if clean {
            info!("Database restoration complete");
        } else {
            warn!(status, "Database restoration completed with some warnings or errors");
        }

        info!("Verifying restoration by listing tables");
        let table_count = match self.list_tables().await {
            Ok(count) => count,
            Err(err) => {
                error!(error = %err, "Could not list tables");
                None
            }
        };

        let question = format!("Do you want to delete the dump file '{}'?", dump.display());
        let dump_deleted = if confirm(prompter, &question, false)? {
            match std::fs::remove_file(&dump) {
                Ok(()) => {
                    info!(dump = %dump.display(), "Dump file deleted");
                    true
                }
                Err(err) => {
                    error!(dump = %dump.display(), error = %err, "Failed to delete dump file");
                    false
                }
            }
        } else {
            info!(dump = %dump.display(), "Dump file kept");
            false
        };

        Ok(Some(RestoreOutcome {
            dump,
            clean,
            table_count,
            dump_deleted,
        }))
    }

    pub async fn show_logs(&self, mode: LogMode) -> Result<()> {
        self.require_running().await?;
        match mode {
            LogMode::Tail => info!("Showing last 100 lines of logs"),
            LogMode::All => info!("Showing all logs"),
            LogMode::Follow => info!("Following logs in real-time (press Ctrl+C to stop)"),
        }
        self.docker.logs(self.name(), mode).await?;
        if mode == LogMode::Follow {
            info!("Stopped following logs");
        }
        Ok(())
    }

    /// Containers left over from earlier setups of this database, by name,
    /// published port or image.
    pub async fn legacy_containers(&self) -> Result<Vec<String>> {
        let Some(rule) = &self.profile.legacy_match else {
            return Ok(Vec::new());
        };
        let mut found: Vec<String> = Vec::new();
        let all = self.docker.container_names(true).await?;

        if let Some(fragment) = &rule.name_contains {
            found.extend(all.iter().filter(|name| name.contains(fragment.as_str())).cloned());
        }
        if let Some(port) = rule.port {
            let port = port.to_string();
            for name in &all {
                if self.docker.port(name).await?.contains(&port) {
                    found.push(name.clone());
                }
            }
        }
        if let Some(image) = &rule.image {
            found.extend(self.docker.names_by_ancestor(image).await?);
        }

        found.sort();
        found.dedup();
        Ok(found)
    }

    /// Lists legacy containers and, once confirmed, removes all of them
    /// except the profile's own container. Returns the removed names.
    pub async fn cleanup_old_containers(&self, prompter: &mut dyn Prompter) -> Result<Vec<String>> {
        let candidates = self.legacy_containers().await?;
        if candidates.is_empty() {
            debug!(profile = self.profile.label(), "No old containers found");
            return Ok(Vec::new());
        }

        prompter.say("Found the following old containers:");
        for name in &candidates {
            prompter.say(&format!("  - {name}"));
            if let Some(image) = self.docker.image_of(name).await? {
                prompter.say(&format!("    Image: {image}"));
            }
            let ports = self.docker.port(name).await?;
            if !ports.is_empty() {
                prompter.say(&format!("    Ports: {ports}"));
            }
        }

        if !confirm(prompter, "Do you want to remove all of them?", false)? {
            info!("Skipping container removal");
            return Ok(Vec::new());
        }

        let mut removed = Vec::new();
        for name in candidates.iter().filter(|name| *name != self.name()) {
            info!(container = %name, "Removing container");
            let output = self.docker.remove_force(name).await?;
            if output.success() {
                removed.push(name.clone());
            } else {
                error!(container = %name, stderr = %output.stderr.trim(), "Failed to remove container");
            }
        }
        Ok(removed)
    }

    /// Removes the container and its volume after two typed confirmations,
    /// then offers a restore. Returns `false` when the operator backed out.
    pub async fn reset(&self, prompter: &mut dyn Prompter) -> Result<bool> {
        warn!(container = self.name(), volume = %self.profile.volume_name, "Complete reset requested");
        prompter.say("This will:");
        prompter.say(&format!("  1. Stop and remove the container: {}", self.name()));
        prompter.say(&format!("  2. DELETE the volume: {}", self.profile.volume_name));
        prompter.say("  3. PERMANENTLY ERASE all database data");
        prompter.say("This action CANNOT be undone!");

        if !confirm_typed(
            prompter,
            "Are you sure you want to continue? Type 'yes' to confirm: ",
            "yes",
        )? {
            info!("Reset cancelled");
            return Ok(false);
        }
        if !confirm_typed(
            prompter,
            &format!("Type the container name '{}' to confirm: ", self.name()),
            self.name(),
        )? {
            error!("Container name does not match, reset cancelled");
            return Ok(false);
        }

        info!(container = self.name(), "Starting complete PostgreSQL reset");
        if self.docker.container_exists(self.name()).await? {
            self.docker.stop(self.name()).await?;
            self.docker.remove_force(self.name()).await?;
            info!(container = self.name(), "Container removed");
        } else {
            info!("No existing container found");
        }

        let volumes = self.docker.volume_names().await?;
        if volumes.iter().any(|v| v == &self.profile.volume_name) {
            self.docker.volume_remove(&self.profile.volume_name).await?;
            info!(volume = %self.profile.volume_name, "Volume removed");
        } else {
            info!("No existing volume found");
        }
        info!("PostgreSQL has been completely reset");

        if confirm(prompter, "Do you want to restore from a dump now?", false)? {
            self.restore(None, prompter).await?;
        } else {
            info!("Use `start` to create a fresh container or `restore` to load a dump later");
        }
        Ok(true)
    }
}

fn ask_path(prompter: &mut dyn Prompter) -> Result<Option<PathBuf>> {
    let answer = prompter.ask("Enter dump file path: ")?;
    if answer.is_empty() {
        error!("No dump file provided");
        return Ok(None);
    }
    Ok(Some(PathBuf::from(answer)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postgres::profile::{billsen, watchdog3};
    use crate::process::{CommandOutput, ScriptedRunner};
    use crate::prompt::ScriptedPrompter;

    fn manager<'a>(
        runner: &'a ScriptedRunner,
        profile: &'a DatabaseProfile,
        remote: &'a RemoteDumpConfig,
    ) -> PostgresManager<'a> {
        PostgresManager::new(runner, profile, remote).with_readiness(3, Duration::ZERO)
    }

    #[tokio::test]
    async fn start_creates_missing_container_and_extensions() {
        let runner = ScriptedRunner::new();
        let profile = watchdog3();
        let remote = RemoteDumpConfig::default();
        let outcome = manager(&runner, &profile, &remote).start().await.unwrap();

        assert_eq!(outcome, StartOutcome::Created { ready: true });
        let calls = runner.calls();
        assert!(calls.contains(&"docker run -d --name postgresql16 -e POSTGRES_USER=watchdog2 -e POSTGRES_PASSWORD=watchdog2 -e POSTGRES_DB=watchdog2 -p 10000:5432 -v pgdata16:/var/lib/postgresql/data timescale/timescaledb-ha:pg16-ts2.18".to_string()));
        assert_eq!(runner.calls_starting_with("docker exec postgresql16 psql").len(), 2);
    }

    #[tokio::test]
    async fn failed_creation_is_an_error() {
        let runner = ScriptedRunner::new().on("docker run", CommandOutput::failed(125, "port is already allocated"));
        let profile = watchdog3();
        let remote = RemoteDumpConfig::default();
        let err = manager(&runner, &profile, &remote).start().await.unwrap_err();
        assert!(matches!(err, OpsError::CommandFailed { status: 125, .. }));
    }

    #[tokio::test]
    async fn start_on_stopped_container_only_starts_it() {
        let runner = ScriptedRunner::new().on("docker ps -a", CommandOutput::ok("postgresql16\n"));
        let profile = watchdog3();
        let remote = RemoteDumpConfig::default();
        let outcome = manager(&runner, &profile, &remote).start().await.unwrap();
        assert_eq!(outcome, StartOutcome::Started);
        assert_eq!(runner.calls_starting_with("docker start postgresql16").len(), 1);
        assert!(runner.calls_starting_with("docker run").is_empty());
    }

    #[tokio::test]
    async fn wait_ready_gives_up_after_attempts() {
        let runner = ScriptedRunner::new().on("docker exec postgresql16 pg_isready", CommandOutput::failed(2, ""));
        let profile = watchdog3();
        let remote = RemoteDumpConfig::default();
        let err = manager(&runner, &profile, &remote).wait_ready().await.unwrap_err();
        assert!(matches!(err, OpsError::Timeout(_)));
        assert_eq!(runner.calls_starting_with("docker exec postgresql16 pg_isready").len(), 3);
    }

    #[tokio::test]
    async fn list_tables_requires_running_container() {
        let runner = ScriptedRunner::new();
        let profile = watchdog3();
        let remote = RemoteDumpConfig::default();
        let err = manager(&runner, &profile, &remote).list_tables().await.unwrap_err();
        assert!(matches!(err, OpsError::ContainerNotRunning(name) if name == "postgresql16"));
    }

    #[tokio::test]
    async fn list_tables_parses_count() {
        let runner = ScriptedRunner::new()
            .on("docker ps", CommandOutput::ok("postgresql16\n"))
            .on("docker exec postgresql16 psql -U watchdog2 -d watchdog2 -t", CommandOutput::ok("   42\n\n"));
        let profile = watchdog3();
        let remote = RemoteDumpConfig::default();
        let count = manager(&runner, &profile, &remote).list_tables().await.unwrap();
        assert_eq!(count, Some(42));
    }

    #[tokio::test]
    async fn legacy_containers_match_name_port_and_image() {
        let runner = ScriptedRunner::new()
            .on("docker ps -a --format {{.Names}}", CommandOutput::ok("billsen-db\nold-pg\nredis\nbillsen-old\n"))
            .on("docker port old-pg", CommandOutput::ok("5432/tcp -> 0.0.0.0:5433\n"))
            .on(
                "docker ps -a --format {{.Names}} --filter ancestor=postgres:16",
                CommandOutput::ok("pg16-scratch\nbillsen-db\n"),
            );
        let profile = billsen();
        let remote = RemoteDumpConfig::default();
        let found = manager(&runner, &profile, &remote).legacy_containers().await.unwrap();
        assert_eq!(found, vec!["billsen-db", "billsen-old", "old-pg", "pg16-scratch"]);
    }

    #[tokio::test]
    async fn cleanup_keeps_own_container() {
        let runner = ScriptedRunner::new()
            .on("docker ps -a --format {{.Names}}", CommandOutput::ok("billsen-db\nbillsen-old\n"))
            .on(
                "docker ps -a --format {{.Names}} --filter",
                CommandOutput::ok(""),
            );
        let profile = billsen();
        let remote = RemoteDumpConfig::default();
        let mut prompter = ScriptedPrompter::new(["y"]);
        let removed = manager(&runner, &profile, &remote)
            .cleanup_old_containers(&mut prompter)
            .await
            .unwrap();
        assert_eq!(removed, vec!["billsen-old"]);
        assert_eq!(runner.calls_starting_with("docker rm -f"), vec!["docker rm -f billsen-old"]);
    }

    #[tokio::test]
    async fn profiles_without_legacy_rule_skip_cleanup() {
        let runner = ScriptedRunner::new();
        let profile = watchdog3();
        let remote = RemoteDumpConfig::default();
        let mut prompter = ScriptedPrompter::default();
        let removed = manager(&runner, &profile, &remote)
            .cleanup_old_containers(&mut prompter)
            .await
            .unwrap();
        assert!(removed.is_empty());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn select_dump_can_cancel_when_nothing_found() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let profile = watchdog3();
        let remote = RemoteDumpConfig::default();
        let mut prompter = ScriptedPrompter::new(["3"]);
        let chosen = manager(&runner, &profile, &remote)
            .with_search_dirs(dir.path(), None)
            .select_dump(&mut prompter)
            .await
            .unwrap();
        assert_eq!(chosen, None);
        assert!(prompter.saw("1) Fetch latest dump from remote server"));
    }
}
