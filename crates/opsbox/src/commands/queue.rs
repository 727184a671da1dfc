use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use opsbox_core::broker::amqp::redact;
use opsbox_core::broker::commands::{lookup_command, SentCommand, COMMANDS, COMMAND_SETS};
use opsbox_core::broker::queues::is_imei;
use opsbox_core::broker::{
    send_command, send_command_set, AmqpBroker, ManagementApi, QueueConsole, QueueFilter,
};
use opsbox_core::prompt::{pause, Prompter};
use opsbox_core::OpsError;
use tracing::{error, info, warn};

use crate::Context;

const SET_PAUSE: Duration = Duration::from_secs(1);

#[derive(Args, Debug)]
pub struct QueueArgs {
    /// Device IMEI to focus on
    #[arg(short, long)]
    imei: Option<String>,

    /// Include the full JSON of displayed messages
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    action: Option<QueueAction>,
}

#[derive(Subcommand, Debug)]
pub enum QueueAction {
    /// Data queue and command queue overview
    Status,
    /// Show messages from the data queue without consuming them
    Peek {
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
    /// Consume and display data queue messages until Ctrl+C
    Monitor,
    /// Send one command to the device (requires --imei)
    Send {
        command: String,
        /// Command ID to use instead of a generated UUID
        #[arg(long)]
        id: Option<String>,
    },
    /// Send the duplicate server parameter queries (requires --imei)
    CheckDuplicateServer,
    /// List commands waiting in the device queue (requires --imei)
    Commands,
    /// Remove every command waiting in the device queue (requires --imei)
    Purge,
    /// Inspect a queue by exact name, or search by partial name
    Inspect { name: String },
    /// List queues on the broker
    Queues {
        #[arg(long, default_value_t = QueueFilter::All)]
        filter: QueueFilter,
    },
}

/// The main handler for all `opsbox queue` commands.
pub async fn handle_queue_command(args: QueueArgs, ctx: &mut Context) -> Result<()> {
    if let Some(imei) = args.imei.as_deref().filter(|i| !is_imei(i)) {
        warn!(imei, "IMEI is not 15 digits; using it as given");
    }

    let broker_config = &ctx.config.broker;
    let prompter = &mut *ctx.prompter;
    let broker = AmqpBroker::connect_with_prompt(&broker_config.url, broker_config.url_from_env, prompter)
        .await
        .context("could not connect to the message broker")?;
    let management = match ManagementApi::from_broker_url(broker.url(), broker_config.management_port) {
        Ok(api) => Some(api),
        Err(err) => {
            warn!(url = %redact(broker.url()), error = %err, "Management API unavailable");
            None
        }
    };
    let mut console = QueueConsole::new(&broker, broker_config)
        .with_management(management)
        .with_target(args.imei.clone());

    let result = match args.action {
        Some(action) => run_action(&console, action, args.json, prompter).await,
        None => main_menu(&mut console, args.json, prompter).await,
    };
    if let Err(err) = broker.close().await {
        warn!(error = %err, "Error closing broker connection");
    }
    result
}

fn require_imei(console: &QueueConsole<'_>) -> Result<String> {
    console
        .target()
        .map(str::to_string)
        .ok_or_else(|| OpsError::InvalidInput("this action needs --imei".to_string()).into())
}

fn report_sent(prompter: &mut dyn Prompter, sent: &SentCommand) {
    prompter.say(&format!(
        "Command '{}' sent to IMEI {}",
        sent.message.command, sent.imei
    ));
    prompter.say(&format!("   Command ID: {}", sent.message.command_id));
    prompter.say(&format!("   Messages in queue: {}", sent.queue_depth));
}

async fn run_action(
    console: &QueueConsole<'_>,
    action: QueueAction,
    show_json: bool,
    prompter: &mut dyn Prompter,
) -> Result<()> {
    match action {
        QueueAction::Status => {
            console.status_overview(prompter).await?;
        }
        QueueAction::Peek { limit } => {
            console.peek(prompter, limit.max(1), show_json).await?;
        }
        QueueAction::Monitor => {
            let shown = console.monitor(prompter, show_json).await?;
            info!(shown, "Monitoring stopped");
        }
        QueueAction::Send { command, id } => {
            let imei = require_imei(console)?;
            if lookup_command(command.trim()).is_none() {
                info!(command = %command, "Sending a command outside the built-in catalog");
            }
            let sent = send_command(console.broker(), &imei, &command, id).await?;
            report_sent(prompter, &sent);
        }
        QueueAction::CheckDuplicateServer => {
            let imei = require_imei(console)?;
            for set in COMMAND_SETS {
                for sent in send_command_set(console.broker(), &imei, set, SET_PAUSE).await? {
                    report_sent(prompter, &sent);
                }
            }
        }
        QueueAction::Commands => {
            let imei = require_imei(console)?;
            console.queue_status(prompter, &imei).await?;
            console.list_commands(prompter, &imei).await?;
        }
        QueueAction::Purge => {
            let imei = require_imei(console)?;
            console.purge(prompter, &imei).await?;
        }
        QueueAction::Inspect { name } => {
            console.inspect_or_search(prompter, &name).await?;
        }
        QueueAction::Queues { filter } => {
            console.list_queues(prompter, filter).await?;
        }
    }
    Ok(())
}

/// Reads one menu choice; `None` on end of input.
fn menu_choice(prompter: &mut dyn Prompter, question: &str) -> Result<Option<String>> {
    match prompter.ask(question) {
        Ok(answer) => Ok(Some(answer.to_ascii_lowercase())),
        Err(OpsError::Cancelled) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Runs an interactive action, reporting failures without leaving the menu.
async fn attempt(
    console: &QueueConsole<'_>,
    action: QueueAction,
    show_json: bool,
    prompter: &mut dyn Prompter,
) -> Result<()> {
    match run_action(console, action, show_json, prompter).await {
        Ok(()) => Ok(()),
        Err(err) => match err.downcast_ref::<OpsError>() {
            Some(OpsError::Cancelled) => Err(err),
            _ => {
                error!("{err:#}");
                Ok(())
            }
        },
    }
}

async fn main_menu(console: &mut QueueConsole<'_>, mut show_json: bool, prompter: &mut dyn Prompter) -> Result<()> {
    loop {
        prompter.say("");
        prompter.say(&"=".repeat(50));
        prompter.say("RABBITMQ DEVICE INTERFACE");
        prompter.say(&format!("Target IMEI: {}", console.target().unwrap_or("none")));
        prompter.say(&format!("Show JSON: {}", if show_json { "on" } else { "off" }));
        prompter.say(&"=".repeat(50));
        prompter.say("1. Status overview");
        prompter.say("2. Peek at data queue messages");
        prompter.say("3. Real-time monitor");
        prompter.say("4. Send device commands");
        prompter.say("5. Command queue operations");
        prompter.say("6. Queue operations");
        prompter.say("7. Set target IMEI");
        prompter.say("8. Toggle JSON output");
        prompter.say("0. Exit");

        let Some(choice) = menu_choice(prompter, "Enter your choice: ")? else {
            return Ok(());
        };
        match choice.as_str() {
            "1" => attempt(console, QueueAction::Status, show_json, prompter).await?,
            "2" => {
                let limit = prompter.ask("How many messages? [5]: ")?.parse().unwrap_or(5);
                attempt(console, QueueAction::Peek { limit }, show_json, prompter).await?;
            }
            "3" => attempt(console, QueueAction::Monitor, show_json, prompter).await?,
            "4" => commands_menu(console, prompter).await?,
            "5" => queue_ops_menu(console, show_json, prompter).await?,
            "6" => listing_menu(console, show_json, prompter).await?,
            "7" => {
                let imei = prompter.ask("Enter IMEI (empty to clear): ")?;
                if !imei.is_empty() && !is_imei(&imei) {
                    prompter.say("Warning: IMEI should be exactly 15 digits");
                }
                console.set_target(Some(imei));
            }
            "8" => show_json = !show_json,
            "0" | "q" => return Ok(()),
            _ => prompter.say("Invalid choice. Please try again."),
        }
    }
}

fn ensure_target(console: &mut QueueConsole<'_>, prompter: &mut dyn Prompter) -> Result<bool> {
    if console.target().is_none() {
        let imei = prompter.ask("Enter device IMEI: ")?;
        console.set_target(Some(imei));
    }
    Ok(console.target().is_some())
}

async fn commands_menu(console: &mut QueueConsole<'_>, prompter: &mut dyn Prompter) -> Result<()> {
    if !ensure_target(console, prompter)? {
        prompter.say("An IMEI is required to send commands");
        return Ok(());
    }
    loop {
        prompter.say("");
        prompter.say(&format!("SEND COMMANDS TO {}", console.target().unwrap_or_default()));
        for (index, command) in COMMANDS.iter().enumerate() {
            prompter.say(&format!("{}. {} ({})", index + 1, command.command, command.description));
        }
        let first_set = COMMANDS.len() + 1;
        for (offset, set) in COMMAND_SETS.iter().enumerate() {
            prompter.say(&format!("{}. {}", first_set + offset, set.name));
        }
        prompter.say("c. Custom command");
        prompter.say("0. Back");

        let Some(choice) = menu_choice(prompter, "Enter your choice: ")? else {
            return Ok(());
        };
        let action = match choice.as_str() {
            "0" | "b" => return Ok(()),
            "c" => {
                let command = prompter.ask("Enter command: ")?;
                QueueAction::Send { command, id: None }
            }
            other => match other.parse::<usize>() {
                Ok(n) if (1..=COMMANDS.len()).contains(&n) => QueueAction::Send {
                    command: COMMANDS[n - 1].command.to_string(),
                    id: None,
                },
                Ok(n) if n >= first_set && n < first_set + COMMAND_SETS.len() => {
                    QueueAction::CheckDuplicateServer
                }
                _ => {
                    prompter.say("Invalid choice. Please try again.");
                    continue;
                }
            },
        };
        attempt(console, action, false, prompter).await?;
    }
}

async fn queue_ops_menu(console: &mut QueueConsole<'_>, show_json: bool, prompter: &mut dyn Prompter) -> Result<()> {
    if !ensure_target(console, prompter)? {
        prompter.say("An IMEI is required for command queue operations");
        return Ok(());
    }
    loop {
        prompter.say("");
        prompter.say(&format!("COMMAND QUEUE OPERATIONS FOR {}", console.target().unwrap_or_default()));
        prompter.say("1. List pending commands");
        prompter.say("2. Purge command queue");
        prompter.say("0. Back");

        let Some(choice) = menu_choice(prompter, "Enter your choice: ")? else {
            return Ok(());
        };
        let action = match choice.as_str() {
            "1" => QueueAction::Commands,
            "2" => QueueAction::Purge,
            "0" | "b" => return Ok(()),
            _ => {
                prompter.say("Invalid choice. Please try again.");
                continue;
            }
        };
        attempt(console, action, show_json, prompter).await?;
        pause(prompter)?;
    }
}

async fn listing_menu(console: &QueueConsole<'_>, show_json: bool, prompter: &mut dyn Prompter) -> Result<()> {
    loop {
        prompter.say("");
        prompter.say("QUEUE OPERATIONS");
        prompter.say("1. List all queues");
        prompter.say("2. List active queues");
        prompter.say("3. List non-IMEI queues");
        prompter.say("4. List IMEI queues");
        prompter.say("5. Inspect or search a queue");
        prompter.say("0. Back");

        let Some(choice) = menu_choice(prompter, "Enter your choice: ")? else {
            return Ok(());
        };
        let action = match choice.as_str() {
            "1" => QueueAction::Queues { filter: QueueFilter::All },
            "2" => QueueAction::Queues { filter: QueueFilter::Active },
            "3" => QueueAction::Queues { filter: QueueFilter::NonImei },
            "4" => QueueAction::Queues { filter: QueueFilter::ImeiOnly },
            "5" => {
                let name = prompter.ask("Queue name or search term: ")?;
                QueueAction::Inspect { name }
            }
            "0" | "b" => return Ok(()),
            _ => {
                prompter.say("Invalid choice. Please try again.");
                continue;
            }
        };
        attempt(console, action, show_json, prompter).await?;
        pause(prompter)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsbox_core::broker::MemoryBroker;
    use opsbox_core::config::BrokerConfig;
    use opsbox_core::prompt::ScriptedPrompter;

    const IMEI: &str = "350317177240177";

    #[tokio::test]
    async fn send_without_imei_is_rejected() {
        let broker = MemoryBroker::new();
        let config = BrokerConfig::default();
        let console = QueueConsole::new(&broker, &config);
        let mut prompter = ScriptedPrompter::default();

        let err = run_action(
            &console,
            QueueAction::Send { command: "getinfo".into(), id: None },
            false,
            &mut prompter,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("--imei"));
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn command_menu_sends_catalog_entry() {
        let broker = MemoryBroker::new();
        let config = BrokerConfig::default();
        let mut console = QueueConsole::new(&broker, &config).with_target(Some(IMEI.into()));
        let mut prompter = ScriptedPrompter::new(["2", "0"]);

        commands_menu(&mut console, &mut prompter).await.unwrap();

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, IMEI);
        assert!(prompter.saw("Command 'getver' sent to IMEI 350317177240177"));
    }

    #[tokio::test]
    async fn main_menu_exits_on_end_of_input() {
        let broker = MemoryBroker::new();
        let config = BrokerConfig::default();
        let mut console = QueueConsole::new(&broker, &config);
        let mut prompter = ScriptedPrompter::new(["7", IMEI, "8"]);

        main_menu(&mut console, false, &mut prompter).await.unwrap();

        assert_eq!(console.target(), Some(IMEI));
        assert!(prompter.saw("Show JSON: on"));
    }
}
