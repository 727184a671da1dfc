// crates/opsbox/src/main.rs

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use opsbox_core::interrupt::Interrupt;
use opsbox_core::process::{CommandRunner, DryRunRunner, SystemRunner};
use opsbox_core::prompt::{AssumeYes, Prompter, TerminalPrompter};
use opsbox_core::OpsConfig;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

const INTERRUPTED_EXIT: i32 = 130;

mod commands;
use commands::cleanup::handle_cleanup_command;
use commands::hex::{handle_hex_command, HexArgs};
use commands::notify::{handle_notify_command, NotifyArgs};
use commands::pg::{handle_pg_command, PgArgs};
use commands::queue::{handle_queue_command, QueueArgs};
use commands::rota::{handle_rota_command, RotaSourceArgs};

/// Operator toolbox for database containers, device queues, Docker hygiene
/// and the janitor rota.
#[derive(Parser, Debug)]
#[command(name = "opsbox", version, about, long_about = None)]
struct Cli {
    /// TOML configuration file (defaults to $OPSBOX_CONFIG, then ./opsbox.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Print external commands and messages instead of running or sending them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Answer yes to every y/N confirmation
    #[arg(short = 'y', long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage PostgreSQL database containers
    Pg(PgArgs),
    /// Monitor device queues and send device commands
    Queue(QueueArgs),
    /// Report Docker disk usage and reclaim space
    Cleanup,
    /// Show this week's and next week's rota assignment
    Rota(RotaSourceArgs),
    /// Post the rota to Slack, once or weekly
    Notify(NotifyArgs),
    /// Annotate a device frame given as hex
    Hex(HexArgs),
}

/// Everything a command handler needs from the process environment.
pub struct Context {
    pub config: OpsConfig,
    pub runner: Box<dyn CommandRunner>,
    pub prompter: Box<dyn Prompter>,
    pub dry_run: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("opsbox=info,opsbox_core=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

/// Owns SIGINT for the whole run. Ctrl+C stops the armed monitor, log
/// follow or watcher; anywhere else (menus, prompts) it ends the process.
fn route_interrupts() {
    tokio::spawn(async {
        loop {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "Cannot listen for Ctrl+C");
                return;
            }
            if !Interrupt::global().deliver() {
                eprintln!("\nOperation cancelled by user");
                std::process::exit(INTERRUPTED_EXIT);
            }
        }
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
            let _ = err.print();
            return code;
        }
    };

    dotenvy::dotenv().ok();
    init_tracing(cli.log_json);
    route_interrupts();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = OpsConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    debug!(dry_run = cli.dry_run, assume_yes = cli.yes, "Configuration loaded");

    let runner: Box<dyn CommandRunner> = if cli.dry_run {
        Box::new(DryRunRunner::new())
    } else {
        Box::new(SystemRunner)
    };
    let prompter: Box<dyn Prompter> = if cli.yes {
        Box::new(AssumeYes)
    } else {
        Box::new(TerminalPrompter)
    };
    let mut ctx = Context {
        config,
        runner,
        prompter,
        dry_run: cli.dry_run,
    };

    match cli.command {
        Command::Pg(args) => handle_pg_command(args, &mut ctx).await,
        Command::Queue(args) => handle_queue_command(args, &mut ctx).await,
        Command::Cleanup => handle_cleanup_command(&mut ctx).await,
        Command::Rota(args) => handle_rota_command(args, &mut ctx).await,
        Command::Notify(args) => handle_notify_command(args, &mut ctx).await,
        Command::Hex(args) => handle_hex_command(args, &mut ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from(["opsbox", "pg", "restore", "dump.db", "--dry-run", "-y"]).unwrap();
        assert!(cli.dry_run);
        assert!(cli.yes);
        assert!(matches!(cli.command, Command::Pg(_)));
    }

    #[test]
    fn unknown_queue_filter_is_a_usage_error() {
        let err = Cli::try_parse_from(["opsbox", "queue", "queues", "--filter", "bogus"]).unwrap_err();
        assert!(err.use_stderr());
    }
}
