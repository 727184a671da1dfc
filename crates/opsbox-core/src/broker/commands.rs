//! Device command catalog and sending.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::Broker;
use crate::error::{OpsError, Result};

pub const COMMAND_SOURCE: &str = "command_sender";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCommand {
    pub command: &'static str,
    pub description: &'static str,
}

pub const COMMANDS: &[DeviceCommand] = &[
    DeviceCommand { command: "getinfo", description: "Get Device Info" },
    DeviceCommand { command: "getver", description: "Get Device Version" },
    DeviceCommand { command: "getstatus", description: "Modem Status information" },
    DeviceCommand { command: "battery", description: "Get Battery Status" },
    DeviceCommand { command: "cpureset", description: "Resets device" },
];

/// Commands sent together, in order, to read back a piece of device
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSet {
    pub name: &'static str,
    pub commands: &'static [DeviceCommand],
}

pub const DUPLICATE_SERVER_CHECK: CommandSet = CommandSet {
    name: "Check duplicate server",
    commands: &[
        DeviceCommand { command: "getparam 2007", description: "Duplicate server ip" },
        DeviceCommand { command: "getparam 2008", description: "Duplicate server port" },
        DeviceCommand { command: "getparam 2010", description: "Duplicate server status" },
    ],
};

pub const COMMAND_SETS: &[CommandSet] = &[DUPLICATE_SERVER_CHECK];

pub fn lookup_command(command: &str) -> Option<&'static DeviceCommand> {
    COMMANDS.iter().find(|known| known.command == command)
}

/// Body published to a device's command queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub command_id: String,
    pub command: String,
    /// Unix seconds, as a string.
    pub timestamp: String,
    pub source: String,
}

impl CommandMessage {
    pub fn new(command: &str, command_id: Option<String>, at: DateTime<Utc>) -> Self {
        Self {
            command_id: command_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            command: command.to_string(),
            timestamp: at.timestamp().to_string(),
            source: COMMAND_SOURCE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCommand {
    pub imei: String,
    pub message: CommandMessage,
    /// Messages waiting in the device queue right after publishing.
    pub queue_depth: u32,
}

/// Declares the durable queue `<imei>` and publishes exactly one command
/// message to it.
pub async fn send_command(
    broker: &dyn Broker,
    imei: &str,
    command: &str,
    command_id: Option<String>,
) -> Result<SentCommand> {
    let imei = imei.trim();
    let command = command.trim();
    if imei.is_empty() {
        return Err(OpsError::InvalidInput("an IMEI is required to send commands".to_string()));
    }
    if command.is_empty() {
        return Err(OpsError::InvalidInput("no command entered".to_string()));
    }

    let message = CommandMessage::new(command, command_id, Utc::now());
    let body = serde_json::to_vec(&message)?;

    broker.declare_durable(imei).await?;
    broker.publish_json(imei, &body).await?;
    let queue_depth = broker
        .queue_stats(imei)
        .await?
        .map(|stats| stats.messages)
        .unwrap_or_default();

    info!(
        imei,
        command,
        command_id = %message.command_id,
        queue_depth,
        "Command sent"
    );
    Ok(SentCommand {
        imei: imei.to_string(),
        message,
        queue_depth,
    })
}

/// Sends every command of `set` in order, pausing between them.
pub async fn send_command_set(
    broker: &dyn Broker,
    imei: &str,
    set: &CommandSet,
    pause: Duration,
) -> Result<Vec<SentCommand>> {
    info!(imei, set = set.name, "Sending command set");
    let mut sent = Vec::with_capacity(set.commands.len());
    for (index, command) in set.commands.iter().enumerate() {
        if index > 0 && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        sent.push(send_command(broker, imei, command.command, None).await?);
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use chrono::TimeZone;

    const IMEI: &str = "350317177240177";

    #[test]
    fn message_serializes_with_string_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let message = CommandMessage::new("getver", Some("abc".into()), at);
        let json: serde_json::Value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "command_id": "abc",
                "command": "getver",
                "timestamp": "1704067200",
                "source": "command_sender"
            })
        );
    }

    #[test]
    fn generated_ids_are_uuids() {
        let message = CommandMessage::new("getinfo", None, Utc::now());
        assert!(Uuid::parse_str(&message.command_id).is_ok());
    }

    #[tokio::test]
    async fn send_declares_queue_and_publishes_once() {
        let broker = MemoryBroker::new();
        let sent = send_command(&broker, IMEI, "getinfo", None).await.unwrap();

        assert_eq!(sent.queue_depth, 1);
        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, IMEI);
        let body: CommandMessage = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(body.command, "getinfo");
        assert_eq!(body.source, COMMAND_SOURCE);
    }

    #[tokio::test]
    async fn blank_input_is_rejected() {
        let broker = MemoryBroker::new();
        assert!(matches!(
            send_command(&broker, " ", "getinfo", None).await,
            Err(OpsError::InvalidInput(_))
        ));
        assert!(matches!(
            send_command(&broker, IMEI, "", None).await,
            Err(OpsError::InvalidInput(_))
        ));
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn command_set_sends_in_order() {
        let broker = MemoryBroker::new();
        let sent = send_command_set(&broker, IMEI, &DUPLICATE_SERVER_CHECK, Duration::ZERO)
            .await
            .unwrap();
        let commands: Vec<&str> = sent.iter().map(|s| s.message.command.as_str()).collect();
        assert_eq!(commands, vec!["getparam 2007", "getparam 2008", "getparam 2010"]);
        assert_eq!(sent[2].queue_depth, 3);
    }
}
