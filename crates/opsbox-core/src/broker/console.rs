//! Operator views over the data queue, device command queues and the
//! broker's queue list. Report lines go through the [`Prompter`].

use chrono::{DateTime, Local};
use comfy_table::{presets::UTF8_FULL, Table};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::management::ManagementApi;
use super::messages::{analyze, or_na, preview, DeviceMessage, TypeBreakdown};
use super::queues::{discover, sort_by_activity, status_label, QueueFilter};
use super::{Broker, Delivery, QueueStats};
use crate::config::BrokerConfig;
use crate::error::{OpsError, Result};
use crate::interrupt::Interrupt;
use crate::prompt::{pause, Prompter};

const TYPE_SAMPLE: usize = 10;
const COMMAND_LIST_LIMIT: usize = 10;
const NEXT_COMMANDS: usize = 3;
const INSPECT_SAMPLE: usize = 3;
const TOP_DEVICES: usize = 5;

fn rule(width: usize) -> String {
    "=".repeat(width)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusOverview {
    pub messages: u32,
    pub consumers: u32,
    pub breakdown: TypeBreakdown,
}

pub struct QueueConsole<'a> {
    broker: &'a dyn Broker,
    management: Option<ManagementApi>,
    config: &'a BrokerConfig,
    target_imei: Option<String>,
}

impl<'a> QueueConsole<'a> {
    pub fn new(broker: &'a dyn Broker, config: &'a BrokerConfig) -> Self {
        Self {
            broker,
            management: None,
            config,
            target_imei: None,
        }
    }

    pub fn with_management(mut self, management: Option<ManagementApi>) -> Self {
        self.management = management;
        self
    }

    pub fn with_target(mut self, imei: Option<String>) -> Self {
        self.set_target(imei);
        self
    }

    pub fn set_target(&mut self, imei: Option<String>) {
        self.target_imei = imei.map(|i| i.trim().to_string()).filter(|i| !i.is_empty());
    }

    pub fn target(&self) -> Option<&str> {
        self.target_imei.as_deref()
    }

    pub fn broker(&self) -> &'a dyn Broker {
        self.broker
    }

    async fn require_stats(&self, queue: &str) -> Result<QueueStats> {
        self.broker
            .queue_stats(queue)
            .await?
            .ok_or_else(|| OpsError::NotFound(format!("queue '{queue}'")))
    }

    /// Fetches up to `max` messages without acknowledging them, hands each
    /// body to `visit` until it returns `false`, then requeues everything in
    /// reverse so the queue keeps its order.
    async fn scan<F>(&self, queue: &str, max: usize, mut visit: F) -> Result<usize>
    where
        F: FnMut(usize, &[u8]) -> bool,
    {
        let mut held: Vec<Delivery> = Vec::new();
        let mut outcome = Ok(());
        for _ in 0..max {
            match self.broker.get(queue).await {
                Ok(Some(delivery)) => {
                    let keep_going = visit(held.len(), &delivery.body);
                    held.push(delivery);
                    if !keep_going {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }
        for delivery in held.iter().rev() {
            if let Err(err) = self.broker.requeue(delivery.tag).await {
                debug!(tag = delivery.tag, error = %err, "Error requeuing message");
            }
        }
        outcome.map(|()| held.len())
    }

    async fn sample_bodies(&self, queue: &str, max: usize) -> Result<Vec<Vec<u8>>> {
        let mut bodies = Vec::new();
        self.scan(queue, max, |_, body| {
            bodies.push(body.to_vec());
            true
        })
        .await?;
        Ok(bodies)
    }

    /// Data queue overview plus the command queue of the target device, or
    /// the busiest watched devices when no device is targeted.
    pub async fn status_overview(&self, p: &mut dyn Prompter) -> Result<StatusOverview> {
        let queue = self.config.data_queue.as_str();
        let stats = self.require_stats(queue).await?;

        p.say(&rule(70));
        p.say("RABBITMQ STATUS OVERVIEW");
        p.say(&format!(
            "Target Device: {}",
            self.target().unwrap_or("ALL DEVICES")
        ));
        p.say(&rule(70));
        p.say("DATA QUEUE STATUS");
        p.say(&format!("   Queue Name: {queue}"));
        p.say(&format!("   Total Messages: {}", stats.messages));
        p.say(&format!("   Active Consumers: {}", stats.consumers));
        if stats.consumers == 0 && stats.messages > 0 {
            p.say("   Warning: No consumers processing messages");
        }

        let mut overview = StatusOverview {
            messages: stats.messages,
            consumers: stats.consumers,
            breakdown: TypeBreakdown::default(),
        };

        if stats.messages > 0 {
            let bodies = self.sample_bodies(queue, TYPE_SAMPLE).await?;
            let breakdown = analyze(bodies.iter().map(Vec::as_slice), self.target());

            if let Some(imei) = self.target() {
                if !breakdown.imeis.is_empty() {
                    let from_target = breakdown.imeis.get(imei).copied().unwrap_or_default();
                    p.say("TARGET DEVICE DATA:");
                    p.say(&format!("   Messages from {imei}: {from_target}"));
                }
            }

            p.say("MESSAGE BREAKDOWN:");
            for (kind, count) in &breakdown.types {
                p.say(&format!("   {kind}: {count} messages"));
            }

            p.say("QUEUE HEALTH:");
            match breakdown.count("DATA") {
                0 => p.say("   AVL Data Flow: No recent data messages"),
                n => p.say(&format!("   AVL Data Flow: Active ({n} messages)")),
            }
            if stats.consumers > 0 {
                p.say(&format!(
                    "   Message Processing: Active ({} consumers)",
                    stats.consumers
                ));
            } else {
                p.say("   Message Processing: No active consumers");
            }
            overview.breakdown = breakdown;
        } else {
            p.say("Queue is currently empty");
        }

        match self.target() {
            Some(imei) => self.command_queue_section(p, imei).await?,
            None => self.watched_devices_section(p).await?,
        }
        p.say(&rule(70));
        Ok(overview)
    }

    async fn command_queue_section(&self, p: &mut dyn Prompter, imei: &str) -> Result<()> {
        p.say("COMMAND QUEUE STATUS");
        p.say(&format!("   Device IMEI: {imei}"));
        let Some(stats) = self.broker.queue_stats(imei).await? else {
            p.say(&format!("   Command queue not accessible: queue '{imei}' does not exist"));
            return Ok(());
        };
        p.say(&format!("   Pending Commands: {}", stats.messages));
        p.say(&format!("   Active Consumers: {}", stats.consumers));
        if stats.consumers > 0 {
            p.say("   Device Status: ONLINE (consumer connected)");
        } else {
            p.say("   Device Status: OFFLINE (no consumer)");
        }

        if stats.messages == 0 {
            p.say("   Command Queue: Empty (no pending commands)");
            return Ok(());
        }
        if stats.consumers > 0 {
            p.say("   Command Processing: Commands queued, being processed");
        } else {
            p.say("   Command Processing: Commands waiting (device offline)");
        }

        p.say("NEXT COMMANDS TO PROCESS:");
        let max = (stats.messages as usize).min(NEXT_COMMANDS);
        let bodies = self.sample_bodies(imei, max).await?;
        for (index, body) in bodies.iter().enumerate() {
            for line in next_command_lines(index + 1, body) {
                p.say(&line);
            }
        }
        if stats.messages as usize > NEXT_COMMANDS {
            p.say(&format!(
                "   ... and {} more commands",
                stats.messages as usize - NEXT_COMMANDS
            ));
        }
        Ok(())
    }

    async fn watched_devices_section(&self, p: &mut dyn Prompter) -> Result<()> {
        p.say("COMMAND QUEUES OVERVIEW");
        p.say("   Status: No specific device selected (use --imei to focus on one device)");

        let mut devices = Vec::new();
        for imei in &self.config.watch_imeis {
            if let Some(stats) = self.broker.queue_stats(imei).await? {
                if stats.messages > 0 || stats.consumers > 0 {
                    devices.push(stats);
                }
            }
        }
        if devices.is_empty() {
            p.say("No active command queues found");
            return Ok(());
        }

        devices.sort_by(|a, b| (b.messages, b.consumers).cmp(&(a.messages, a.consumers)));
        let shown = devices.len().min(TOP_DEVICES);
        p.say(&format!("ACTIVE DEVICE QUEUES (showing top {shown}):"));
        for device in devices.iter().take(shown) {
            let status = if device.consumers > 0 { "ONLINE" } else { "OFFLINE" };
            p.say(&format!(
                "   {}: {} commands, {status}",
                device.name, device.messages
            ));
        }
        if devices.len() > TOP_DEVICES {
            p.say(&format!("   ... and {} more devices", devices.len() - TOP_DEVICES));
        }
        Ok(())
    }

    /// Shows up to `limit` data queue messages for the target device
    /// (scanning at most three times as many) and requeues everything.
    pub async fn peek(&self, p: &mut dyn Prompter, limit: usize, show_json: bool) -> Result<usize> {
        let queue = self.config.data_queue.as_str();
        let stats = self.require_stats(queue).await?;
        if stats.messages == 0 {
            p.say("No messages in queue to peek");
            return Ok(0);
        }

        let total = stats.messages as usize;
        p.say(&rule(60));
        p.say(&format!(
            "PEEKING AT MESSAGES (showing {} of {total})",
            limit.min(total)
        ));
        if let Some(imei) = self.target() {
            p.say(&format!("Filtering for IMEI: {imei}"));
        }
        p.say(&rule(60));

        let target = self.target();
        let mut shown = 0usize;
        let mut lines: Vec<String> = Vec::new();
        self.scan(queue, (limit * 3).min(total), |_, body| {
            let message = DeviceMessage::parse(body);
            if !message.matches_imei(target) {
                return true;
            }
            shown += 1;
            lines.extend(message.render(&shown.to_string(), show_json));
            lines.push("-".repeat(40));
            shown < limit
        })
        .await?;

        for line in &lines {
            p.say(line);
        }
        if let (Some(imei), 0) = (target, shown) {
            p.say(&format!("No messages found for IMEI: {imei}"));
        }
        p.say(&rule(60));
        Ok(shown)
    }

    /// Consumes the data queue, acknowledging every message and printing
    /// the ones for the target device, until Ctrl+C or the consumer ends.
    pub async fn monitor(&self, p: &mut dyn Prompter, show_json: bool) -> Result<usize> {
        let queue = self.config.data_queue.as_str();
        self.require_stats(queue).await?;
        p.say(&rule(60));
        p.say("REAL-TIME MONITORING");
        if let Some(imei) = self.target() {
            p.say(&format!("Filtering for IMEI: {imei}"));
        }
        p.say("Press Ctrl+C to stop monitoring");
        p.say(&rule(60));

        let result = self.consume(queue, p, show_json).await;
        if let Err(err) = self.broker.stop_consuming().await {
            warn!(queue, error = %err, "Failed to cancel monitor consumer");
        }
        result
    }

    async fn consume(&self, queue: &str, p: &mut dyn Prompter, show_json: bool) -> Result<usize> {
        let mut interrupted = Interrupt::global().listen();
        let mut displayed = 0usize;
        loop {
            let next = tokio::select! {
                next = self.broker.next_delivery(queue) => next?,
                _ = interrupted.triggered() => {
                    info!("Stopping real-time monitor");
                    break;
                }
            };
            let Some(delivery) = next else {
                debug!(queue, "Consumer ended");
                break;
            };
            let message = DeviceMessage::parse(&delivery.body);
            self.broker.ack(delivery.tag).await?;
            if !message.matches_imei(self.target()) {
                continue;
            }
            displayed += 1;
            p.say("NEW MESSAGE DETECTED!");
            for line in message.render("REALTIME", show_json) {
                p.say(&line);
            }
            p.say(&"-".repeat(40));
        }
        Ok(displayed)
    }

    pub async fn queue_status(&self, p: &mut dyn Prompter, imei: &str) -> Result<QueueStats> {
        let stats = self.require_stats(imei).await?;
        p.say(&rule(60));
        p.say(&format!("QUEUE STATUS FOR IMEI: {imei}"));
        p.say(&rule(60));
        p.say(&format!("Messages in queue: {}", stats.messages));
        p.say(&format!("Active consumers: {}", stats.consumers));
        p.say(&format!(
            "Device status: {}",
            if stats.consumers > 0 { "ONLINE" } else { "OFFLINE" }
        ));
        p.say(&rule(60));
        Ok(stats)
    }

    /// Lists the device's pending commands: all of them when there are at
    /// most ten, otherwise the last ten with their queue positions.
    pub async fn list_commands(&self, p: &mut dyn Prompter, imei: &str) -> Result<usize> {
        let stats = self.require_stats(imei).await?;
        if stats.messages == 0 {
            p.say(&format!("Command queue for IMEI {imei} is empty"));
            return Ok(0);
        }

        let bodies = self.sample_bodies(imei, stats.messages as usize).await?;
        let total = bodies.len();
        let show_all = total <= COMMAND_LIST_LIMIT;

        p.say(&rule(60));
        if show_all {
            p.say(&format!("ALL COMMANDS IN QUEUE FOR IMEI: {imei}"));
            p.say(&format!("Total commands: {total}"));
        } else {
            p.say(&format!("LAST {COMMAND_LIST_LIMIT} COMMANDS IN QUEUE FOR IMEI: {imei}"));
            p.say(&format!(
                "Total commands: {total} (showing last {COMMAND_LIST_LIMIT} only)"
            ));
            p.say("Purge the queue to clear old commands if needed");
        }
        p.say(&rule(60));

        let skip = total.saturating_sub(COMMAND_LIST_LIMIT);
        for (offset, body) in bodies.iter().enumerate().skip(skip) {
            let position = offset + 1;
            match serde_json::from_slice::<Value>(body) {
                Ok(value) => {
                    p.say(&format!(
                        "{position:2}. Command: {}",
                        value.get("command").and_then(Value::as_str).unwrap_or("Unknown")
                    ));
                    p.say(&format!("     ID: {}", or_na(&value, "command_id")));
                    p.say(&format!("     Timestamp: {}", or_na(&value, "timestamp")));
                    p.say(&format!("     Source: {}", or_na(&value, "source")));
                }
                Err(_) => p.say(&format!(
                    "{position:2}. Raw message: {}",
                    String::from_utf8_lossy(body)
                )),
            }
            p.say(&"-".repeat(40));
        }
        p.say(&rule(60));
        Ok(total.min(COMMAND_LIST_LIMIT))
    }

    /// Clears the device's command queue after confirmation. Returns
    /// `false` when the queue was already empty or the operator declined.
    pub async fn purge(&self, p: &mut dyn Prompter, imei: &str) -> Result<bool> {
        let stats = self.require_stats(imei).await?;
        if stats.messages == 0 {
            p.say(&format!("Command queue for IMEI {imei} is already empty"));
            return Ok(false);
        }

        p.say(&rule(60));
        p.say(&format!("PURGING COMMAND QUEUE FOR IMEI: {imei}"));
        p.say(&format!("Commands to remove: {}", stats.messages));
        p.say(&rule(60));

        let answer = p
            .ask(&format!(
                "Are you sure you want to delete {} commands? (yes/no): ",
                stats.messages
            ))?
            .to_ascii_lowercase();
        if answer != "yes" && answer != "y" {
            p.say("Queue purge cancelled");
            return Ok(false);
        }

        let removed = self.broker.purge(imei).await?;
        info!(imei, removed, "Queue purged");
        let remaining = self
            .broker
            .queue_stats(imei)
            .await?
            .map(|s| s.messages)
            .unwrap_or_default();
        p.say("Queue purged successfully");
        p.say(&format!("Remaining commands: {remaining}"));
        Ok(true)
    }

    pub async fn discover(&self) -> Result<Vec<QueueStats>> {
        let mut known = vec![self.config.data_queue.clone()];
        known.extend(self.config.known_queues.iter().cloned());
        let (queues, _) = discover(self.broker, self.management.as_ref(), &known).await?;
        Ok(queues)
    }

    pub async fn list_queues(&self, p: &mut dyn Prompter, filter: QueueFilter) -> Result<Vec<QueueStats>> {
        p.say(&rule(70));
        p.say(&format!("{} ON RABBITMQ SERVER", filter.title()));
        p.say(&rule(70));

        let discovered = self.discover().await?;
        if discovered.is_empty() {
            p.say("No queues found or accessible");
            p.say("Enable the RabbitMQ management plugin for full visibility");
            return Ok(Vec::new());
        }

        let mut queues: Vec<QueueStats> = discovered.into_iter().filter(|q| filter.matches(q)).collect();
        if queues.is_empty() {
            p.say(&format!("No queues found or accessible (filter: {filter})"));
            return Ok(queues);
        }
        sort_by_activity(&mut queues);

        p.say(&format!("Found {} queues:", queues.len()));
        p.say(&queue_table(&queues).to_string());

        let active = queues.iter().filter(|q| q.consumers > 0).count();
        let backlogged = queues.iter().filter(|q| q.messages > 0).count();
        let total: u64 = queues.iter().map(|q| u64::from(q.messages)).sum();
        p.say("SUMMARY:");
        p.say(&format!("   Active queues (with consumers): {active}"));
        p.say(&format!("   Queues with pending messages: {backlogged}"));
        p.say(&format!("   Total messages across all queues: {total}"));
        Ok(queues)
    }

    /// Details of one queue plus a requeued sample of its first messages.
    /// Returns `false` when the queue does not exist.
    pub async fn inspect(&self, p: &mut dyn Prompter, name: &str) -> Result<bool> {
        p.say(&rule(60));
        p.say(&format!("INSPECTING QUEUE: {name}"));
        p.say(&rule(60));
        let Some(stats) = self.broker.queue_stats(name).await? else {
            p.say(&format!("Queue '{name}' not found or not accessible"));
            return Ok(false);
        };

        p.say(&format!("Queue Name: {name}"));
        p.say(&format!("Messages in Queue: {}", stats.messages));
        p.say(&format!("Active Consumers: {}", stats.consumers));
        if stats.consumers > 0 {
            p.say("Status: ACTIVE (has consumers)");
        } else {
            p.say("Status: INACTIVE (no consumers)");
        }

        if stats.messages == 0 {
            p.say("Backlog: Empty queue");
        } else {
            p.say(&format!("Backlog: {} messages waiting", stats.messages));
            p.say(&format!("SAMPLE MESSAGES (first {INSPECT_SAMPLE}):"));
            let max = (stats.messages as usize).min(INSPECT_SAMPLE);
            let bodies = self.sample_bodies(name, max).await?;
            for (index, body) in bodies.iter().enumerate() {
                for line in sample_lines(index + 1, body) {
                    p.say(&line);
                }
                p.say(&"-".repeat(30));
            }
            if stats.messages as usize > INSPECT_SAMPLE {
                p.say(&format!(
                    "... and {} more messages",
                    stats.messages as usize - INSPECT_SAMPLE
                ));
            }
        }
        p.say(&rule(60));
        Ok(true)
    }

    /// Case-insensitive substring search over discovered queues. A single
    /// match is inspected directly; several matches let the operator pick
    /// one or all.
    pub async fn inspect_matching(&self, p: &mut dyn Prompter, term: &str) -> Result<bool> {
        let needle = term.to_lowercase();
        let mut matches: Vec<QueueStats> = self
            .discover()
            .await?
            .into_iter()
            .filter(|q| q.name.to_lowercase().contains(&needle))
            .collect();

        if matches.is_empty() {
            p.say(&format!("No queues found containing '{term}'"));
            return Ok(false);
        }
        matches.sort_by(|a, b| b.messages.cmp(&a.messages));

        if let [only] = matches.as_slice() {
            p.say(&format!("Found 1 matching queue: {}", only.name));
            return self.inspect(p, &only.name).await;
        }

        p.say(&format!("Found {} matching queues:", matches.len()));
        p.say(&numbered_table(&matches).to_string());
        p.say("a) Inspect all matching queues");
        p.say(&format!("1-{}) Inspect a specific queue", matches.len()));
        p.say("0) Cancel");

        let choice = p
            .ask(&format!("Enter your choice (0/a/1-{}): ", matches.len()))?
            .to_lowercase();
        match choice.as_str() {
            "0" => Ok(false),
            "a" => {
                for (index, queue) in matches.iter().enumerate() {
                    if index > 0 {
                        pause(p)?;
                    }
                    p.say(&format!("QUEUE {} of {}", index + 1, matches.len()));
                    self.inspect(p, &queue.name).await?;
                }
                Ok(true)
            }
            other => match other.parse::<usize>() {
                Ok(n) if (1..=matches.len()).contains(&n) => self.inspect(p, &matches[n - 1].name).await,
                _ => {
                    p.say(&format!("Invalid choice. Please enter 1-{}", matches.len()));
                    Ok(false)
                }
            },
        }
    }

    /// Exact name first, partial match otherwise.
    pub async fn inspect_or_search(&self, p: &mut dyn Prompter, term: &str) -> Result<bool> {
        let term = term.trim();
        if term.is_empty() {
            return Err(OpsError::InvalidInput("no search term provided".to_string()));
        }
        if self.broker.queue_stats(term).await?.is_some() {
            p.say(&format!("Found exact match: {term}"));
            return self.inspect(p, term).await;
        }
        p.say(&format!("No exact match for '{term}', searching for partial matches"));
        self.inspect_matching(p, term).await
    }
}

fn truncate_name(name: &str) -> String {
    if name.chars().count() > 29 {
        name.chars().take(29).collect()
    } else {
        name.to_string()
    }
}

fn queue_table(queues: &[QueueStats]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Queue Name", "Messages", "Consumers", "Status", "Durable"]);
    for queue in queues {
        table.add_row(vec![
            truncate_name(&queue.name),
            queue.messages.to_string(),
            queue.consumers.to_string(),
            status_label(queue).to_string(),
            if queue.durable { "Yes" } else { "No" }.to_string(),
        ]);
    }
    table
}

fn numbered_table(queues: &[QueueStats]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["#", "Queue Name", "Messages", "Consumers", "Status", "Durable"]);
    for (index, queue) in queues.iter().enumerate() {
        table.add_row(vec![
            (index + 1).to_string(),
            truncate_name(&queue.name),
            queue.messages.to_string(),
            queue.consumers.to_string(),
            status_label(queue).to_string(),
            if queue.durable { "Yes" } else { "No" }.to_string(),
        ]);
    }
    table
}

fn next_command_lines(position: usize, body: &[u8]) -> Vec<String> {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return vec![format!(
            "   {position}. Raw message: {}...",
            preview(&String::from_utf8_lossy(body), 50)
        )];
    };
    let command = or_na(&value, "command");
    let id = preview(&or_na(&value, "command_id"), 8);
    let mut lines = vec![format!("   {position}. {command}"), format!("      ID: {id}...")];
    if let Some(raw) = value.get("timestamp") {
        let ts = match raw {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match ts.parse::<i64>().ok().and_then(|secs| DateTime::from_timestamp(secs, 0)) {
            Some(at) => lines.push(format!(
                "      Queued: {}",
                at.with_timezone(&Local).format("%H:%M:%S")
            )),
            None => lines.push(format!("      Timestamp: {ts}")),
        }
    }
    lines
}

fn sample_lines(position: usize, body: &[u8]) -> Vec<String> {
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => {
            let mut lines = vec![format!(
                "{position}. Type: {}",
                value
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown")
            )];
            for (key, label) in [("imei", "IMEI"), ("command", "Command"), ("timestamp", "Timestamp")] {
                if value.get(key).is_some() {
                    lines.push(format!("   {label}: {}", or_na(&value, key)));
                }
            }
            lines.push(format!("   Size: {} bytes", body.len()));
            lines
        }
        Err(_) => vec![
            format!(
                "{position}. Raw message preview: {}...",
                preview(&String::from_utf8_lossy(body), 100)
            ),
            format!("   Size: {} bytes", body.len()),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::commands::CommandMessage;
    use crate::broker::MemoryBroker;
    use crate::prompt::ScriptedPrompter;
    use chrono::Utc;

    const IMEI: &str = "350317177240177";
    const OTHER: &str = "862771041414213";

    fn data(imei: &str) -> Vec<u8> {
        format!(r#"{{"type":"DATA","imei":"{imei}","message":{{"lat":1,"lon":2}}}}"#).into_bytes()
    }

    fn command(name: &str) -> Vec<u8> {
        serde_json::to_vec(&CommandMessage::new(name, None, Utc::now())).unwrap()
    }

    fn config() -> BrokerConfig {
        BrokerConfig::default()
    }

    #[tokio::test]
    async fn peek_filters_by_imei_and_requeues_everything() {
        let bodies = vec![data(OTHER), data(IMEI), b"raw".to_vec(), data(IMEI), data(IMEI)];
        let broker = MemoryBroker::new().with_queue("device_tcp_data", 1, bodies.clone());
        let config = config();
        let console = QueueConsole::new(&broker, &config).with_target(Some(IMEI.into()));
        let mut p = ScriptedPrompter::default();

        let shown = console.peek(&mut p, 2, false).await.unwrap();

        assert_eq!(shown, 2);
        assert!(p.saw("Filtering for IMEI: 350317177240177"));
        assert!(!p.saw(&format!("IMEI: {OTHER}")));
        assert_eq!(broker.messages("device_tcp_data"), bodies);
        assert_eq!(broker.unacked(), 0);
    }

    #[tokio::test]
    async fn overview_reports_backlog_without_consumers() {
        let broker = MemoryBroker::new()
            .with_queue("device_tcp_data", 0, vec![data(IMEI), data(OTHER)])
            .with_queue(IMEI, 1, vec![command("getinfo")]);
        let config = config();
        let console = QueueConsole::new(&broker, &config);
        let mut p = ScriptedPrompter::default();

        let overview = console.status_overview(&mut p).await.unwrap();

        assert_eq!(overview.messages, 2);
        assert_eq!(overview.breakdown.count("DATA"), 2);
        assert!(p.saw("Warning: No consumers processing messages"));
        assert!(p.saw("350317177240177: 1 commands, ONLINE"));
        assert_eq!(broker.messages("device_tcp_data").len(), 2);
    }

    #[tokio::test]
    async fn targeted_overview_previews_next_commands() {
        let broker = MemoryBroker::new()
            .with_queue("device_tcp_data", 1, Vec::<Vec<u8>>::new())
            .with_queue(IMEI, 0, vec![command("getinfo"), command("getver"), command("battery"), command("cpureset")]);
        let config = config();
        let console = QueueConsole::new(&broker, &config).with_target(Some(IMEI.into()));
        let mut p = ScriptedPrompter::default();

        console.status_overview(&mut p).await.unwrap();

        assert!(p.saw("Device Status: OFFLINE (no consumer)"));
        assert!(p.saw("   1. getinfo"));
        assert!(p.saw("   3. battery"));
        assert!(!p.saw("cpureset"));
        assert!(p.saw("... and 1 more commands"));
        assert_eq!(broker.messages(IMEI).len(), 4);
    }

    #[tokio::test]
    async fn long_command_lists_show_last_ten_with_positions() {
        let commands: Vec<Vec<u8>> = (1..=12).map(|i| command(&format!("cmd{i}"))).collect();
        let broker = MemoryBroker::new().with_queue(IMEI, 0, commands.clone());
        let config = config();
        let console = QueueConsole::new(&broker, &config);
        let mut p = ScriptedPrompter::default();

        let shown = console.list_commands(&mut p, IMEI).await.unwrap();

        assert_eq!(shown, 10);
        assert!(p.saw("Total commands: 12 (showing last 10 only)"));
        assert!(!p.saw("Command: cmd2"));
        assert!(p.saw(" 3. Command: cmd3"));
        assert!(p.saw("12. Command: cmd12"));
        assert_eq!(broker.messages(IMEI), commands);
    }

    #[tokio::test]
    async fn purge_requires_confirmation() {
        let broker = MemoryBroker::new().with_queue(IMEI, 0, vec![command("getinfo")]);
        let config = config();
        let console = QueueConsole::new(&broker, &config);

        let mut declined = ScriptedPrompter::new(["no"]);
        assert!(!console.purge(&mut declined, IMEI).await.unwrap());
        assert_eq!(broker.messages(IMEI).len(), 1);

        let mut accepted = ScriptedPrompter::new(["yes"]);
        assert!(console.purge(&mut accepted, IMEI).await.unwrap());
        assert!(accepted.saw("Remaining commands: 0"));
        assert!(broker.messages(IMEI).is_empty());
    }

    #[tokio::test]
    async fn monitor_acks_everything_and_shows_matches() {
        let broker = MemoryBroker::new().with_queue("device_tcp_data", 0, vec![data(OTHER), data(IMEI), b"raw".to_vec()]);
        let config = config();
        let console = QueueConsole::new(&broker, &config).with_target(Some(IMEI.into()));
        let mut p = ScriptedPrompter::default();

        let displayed = console.monitor(&mut p, false).await.unwrap();

        assert_eq!(displayed, 1);
        assert!(broker.messages("device_tcp_data").is_empty());
        assert_eq!(broker.unacked(), 0);
    }

    #[tokio::test]
    async fn monitor_detaches_its_consumer() {
        let broker = MemoryBroker::new().with_queue("device_tcp_data", 0, vec![data(IMEI)]);
        let config = config();
        let console = QueueConsole::new(&broker, &config);
        let mut p = ScriptedPrompter::default();

        console.monitor(&mut p, false).await.unwrap();
        assert_eq!(broker.consuming(), None);

        broker.publish_json("device_tcp_data", &data(OTHER)).await.unwrap();
        let mut overview = ScriptedPrompter::default();
        let status = console.status_overview(&mut overview).await.unwrap();
        assert_eq!(status.consumers, 0);
        assert_eq!(status.messages, 1);
        assert!(overview.saw("Warning: No consumers processing messages"));
    }

    #[tokio::test]
    async fn search_picks_single_partial_match() {
        let broker = MemoryBroker::new()
            .with_queue("device_tcp_data", 0, vec![data(IMEI)])
            .with_queue("audit_log", 0, Vec::<Vec<u8>>::new());
        let config = config();
        let console = QueueConsole::new(&broker, &config);
        let mut p = ScriptedPrompter::default();

        assert!(console.inspect_or_search(&mut p, "TCP").await.unwrap());
        assert!(p.saw("No exact match for 'TCP'"));
        assert!(p.saw("INSPECTING QUEUE: device_tcp_data"));
        assert!(p.saw("   IMEI: 350317177240177"));
        assert_eq!(broker.messages("device_tcp_data").len(), 1);
    }

    #[tokio::test]
    async fn queue_listing_applies_filter() {
        let broker = MemoryBroker::new()
            .with_queue("device_tcp_data", 2, vec![data(IMEI)])
            .with_queue("audit_log", 0, Vec::<Vec<u8>>::new());
        let config = config();
        let console = QueueConsole::new(&broker, &config);
        let mut p = ScriptedPrompter::default();

        let queues = console.list_queues(&mut p, QueueFilter::Active).await.unwrap();
        assert_eq!(queues.len(), 1);
        assert_eq!(queues[0].name, "device_tcp_data");
        assert!(p.saw("BUSY"));
        assert!(p.saw("Total messages across all queues: 1"));
    }
}
