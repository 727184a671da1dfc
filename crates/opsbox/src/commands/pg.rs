use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand, ValueEnum};
use opsbox_core::docker::{Docker, LogMode};
use opsbox_core::config::PostgresSection;
use opsbox_core::postgres::{ContainerState, DatabaseProfile, PostgresManager, StartOutcome};
use opsbox_core::prompt::{choose_number, Prompter};
use opsbox_core::OpsError;
use tracing::{error, info, warn};

use crate::Context;

#[derive(Args, Debug)]
pub struct PgArgs {
    /// Database profile to manage (defaults to the configured default)
    #[arg(short, long)]
    profile: Option<String>,

    #[command(subcommand)]
    action: Option<PgAction>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum PgAction {
    /// Start the container, creating it when missing
    Start,
    /// Stop the running container
    Stop,
    /// Restart the container
    Restart,
    /// Show container status
    Status,
    /// Restore the database from a dump (chosen interactively when omitted)
    Restore { file: Option<PathBuf> },
    /// Fetch the latest dump from the remote server
    Fetch,
    /// Show container logs
    Logs {
        #[arg(long, value_enum, default_value_t = LogArg::Tail)]
        mode: LogArg,
    },
    /// List database tables
    Tables,
    /// Remove the container and its volume
    Reset,
    /// Remove containers left over from earlier setups
    Cleanup,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogArg {
    Tail,
    All,
    Follow,
}

impl From<LogArg> for LogMode {
    fn from(arg: LogArg) -> Self {
        match arg {
            LogArg::Tail => LogMode::Tail,
            LogArg::All => LogMode::All,
            LogArg::Follow => LogMode::Follow,
        }
    }
}

/// The main handler for all `opsbox pg` commands.
pub async fn handle_pg_command(args: PgArgs, ctx: &mut Context) -> Result<()> {
    Docker::new(ctx.runner.as_ref())
        .ensure_available()
        .await
        .context("Docker is required for database management")?;

    let Context {
        config,
        runner,
        prompter,
        ..
    } = ctx;

    let prompter: &mut dyn Prompter = &mut **prompter;
    match (args.action, &args.profile) {
        (Some(action), _) => {
            let key = args.profile.as_deref().unwrap_or(&config.postgres.default_profile);
            let profile = config.postgres.profile(key)?;
            let manager = PostgresManager::new(&**runner, profile, &config.remote);
            run_cli_action(&manager, action, prompter).await
        }
        (None, Some(key)) => {
            let manager = PostgresManager::new(&**runner, config.postgres.profile(key)?, &config.remote);
            offer_cleanup(&manager, prompter).await?;
            action_menu(&manager, prompter, "Exit").await?;
            Ok(())
        }
        (None, None) => loop {
            let Some(profile) = choose_database(&config.postgres, prompter)? else {
                return Ok(());
            };
            let manager = PostgresManager::new(&**runner, profile, &config.remote);
            offer_cleanup(&manager, prompter).await?;
            if action_menu(&manager, prompter, "Back to database selection").await? == MenuExit::Quit {
                return Ok(());
            }
        },
    }
}

/// Offers to remove leftover containers of the selected database before
/// anything else runs.
async fn offer_cleanup(manager: &PostgresManager<'_>, prompter: &mut dyn Prompter) -> Result<()> {
    let removed = manager.cleanup_old_containers(prompter).await?;
    if !removed.is_empty() {
        prompter.say(&format!("Removed {} old container(s)", removed.len()));
    }
    Ok(())
}

async fn run_cli_action(manager: &PostgresManager<'_>, action: PgAction, prompter: &mut dyn Prompter) -> Result<()> {
    if !matches!(action, PgAction::Cleanup) {
        offer_cleanup(manager, prompter).await?;
    }
    run_action(manager, action, prompter).await
}

async fn run_action(manager: &PostgresManager<'_>, action: PgAction, prompter: &mut dyn Prompter) -> Result<()> {
    match action {
        PgAction::Start => match manager.start().await? {
            StartOutcome::Created { ready: false } => {
                warn!("Container created but PostgreSQL did not become ready; extensions were not created")
            }
            outcome => info!(?outcome, "Start finished"),
        },
        PgAction::Stop => {
            manager.stop().await?;
        }
        PgAction::Restart => manager.restart().await?,
        PgAction::Status => {
            manager.status().await?;
        }
        PgAction::Restore { file } => match manager.restore(file.as_deref(), prompter).await? {
            Some(outcome) => {
                let tables = outcome
                    .table_count
                    .map_or_else(|| "unknown".to_string(), |c| c.to_string());
                prompter.say(&format!(
                    "Restored from {} ({} tables{})",
                    outcome.dump.display(),
                    tables,
                    if outcome.clean { "" } else { ", with warnings" }
                ));
            }
            None => info!("Restore cancelled"),
        },
        PgAction::Fetch => {
            let path = manager.fetch_remote().await?;
            prompter.say(&format!("Dump saved to {}", path.display()));
        }
        PgAction::Logs { mode } => manager.show_logs(mode.into()).await?,
        PgAction::Tables => {
            if let Some(count) = manager.list_tables().await? {
                prompter.say(&format!("Total tables in database: {count}"));
            }
        }
        PgAction::Reset => {
            manager.reset(prompter).await?;
        }
        PgAction::Cleanup => offer_cleanup(manager, prompter).await?,
    }
    Ok(())
}

/// `None` when the operator picks Exit or input ends.
fn choose_database<'c>(
    postgres: &'c PostgresSection,
    prompter: &mut dyn Prompter,
) -> Result<Option<&'c DatabaseProfile>> {
    let entries = postgres.menu_order();
    prompter.say("");
    prompter.say("PostgreSQL Database Manager");
    prompter.say("Select a database:");
    for (index, profile) in entries.iter().enumerate() {
        prompter.say(&format!(
            "{}) {} (container {}, port {})",
            index + 1,
            profile.label(),
            profile.container_name,
            profile.postgres_port
        ));
    }
    let exit = entries.len() + 1;
    prompter.say(&format!("{exit}) Exit"));

    match choose_number(prompter, &format!("Enter your choice (1-{exit}): "), exit) {
        Ok(choice) => Ok(entries.get(choice - 1).copied()),
        Err(OpsError::Cancelled) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuExit {
    Back,
    Quit,
}

const ACTIONS: &[&str] = &[
    "Start container",
    "Stop container",
    "Restart container",
    "Show status",
    "Restore from dump",
    "Fetch latest remote dump",
    "Show logs",
    "List tables",
    "Clean up old containers",
    "Reset database (delete all data)",
];

fn ask_log_mode(prompter: &mut dyn Prompter) -> Result<LogMode> {
    loop {
        let answer = prompter.ask("Log mode: tail (last 100 lines), all, follow [tail]: ")?;
        match answer.to_ascii_lowercase().as_str() {
            "" | "tail" => return Ok(LogMode::Tail),
            "all" => return Ok(LogMode::All),
            "follow" => return Ok(LogMode::Follow),
            _ => prompter.say("Please enter tail, all or follow"),
        }
    }
}

async fn action_menu(manager: &PostgresManager<'_>, prompter: &mut dyn Prompter, exit_label: &str) -> Result<MenuExit> {
    loop {
        let state = manager.state().await?;
        prompter.say("");
        prompter.say(&format!(
            "{} ({}): {}",
            manager.profile().label(),
            manager.profile().container_name,
            match state {
                ContainerState::Running => "running",
                ContainerState::Stopped => "stopped",
                ContainerState::Missing => "not created",
            }
        ));
        for (index, label) in ACTIONS.iter().enumerate() {
            prompter.say(&format!("{}) {label}", index + 1));
        }
        let exit = ACTIONS.len() + 1;
        prompter.say(&format!("{exit}) {exit_label}"));

        let choice = match choose_number(prompter, &format!("Enter your choice (1-{exit}): "), exit) {
            Ok(choice) => choice,
            Err(OpsError::Cancelled) => return Ok(MenuExit::Quit),
            Err(err) => return Err(err.into()),
        };
        let action = match choice {
            1 => PgAction::Start,
            2 => PgAction::Stop,
            3 => PgAction::Restart,
            4 => PgAction::Status,
            5 => PgAction::Restore { file: None },
            6 => PgAction::Fetch,
            7 => match ask_log_mode(prompter)? {
                LogMode::Tail => PgAction::Logs { mode: LogArg::Tail },
                LogMode::All => PgAction::Logs { mode: LogArg::All },
                LogMode::Follow => PgAction::Logs { mode: LogArg::Follow },
            },
            8 => PgAction::Tables,
            9 => PgAction::Cleanup,
            10 => PgAction::Reset,
            _ => return Ok(MenuExit::Back),
        };

        if let Err(err) = run_action(manager, action, prompter).await {
            match err.downcast_ref::<OpsError>() {
                Some(OpsError::Cancelled) => return Ok(MenuExit::Quit),
                _ => error!("{err:#}"),
            }
        }
    }
}
