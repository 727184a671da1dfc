//! [`Broker`] over a live AMQP connection.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions,
    QueueDeclareOptions, QueuePurgeOptions,
};
use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::{Broker, Delivery, QueueStats};
use crate::error::{OpsError, Result};
use crate::prompt::Prompter;

const PERSISTENT: u8 = 2;

pub struct AmqpBroker {
    url: String,
    connection: Connection,
    channel: Mutex<Channel>,
    consumer: Mutex<Option<(String, Consumer)>>,
}

impl AmqpBroker {
    pub async fn connect(url: &str) -> Result<Self> {
        info!(url = %redact(url), "Connecting to broker");
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        info!("Connected to broker");
        Ok(Self {
            url: url.to_string(),
            connection,
            channel: Mutex::new(channel),
            consumer: Mutex::new(None),
        })
    }

    /// Connects to `url`, offering the operator a new URL after each
    /// failure. Quitting returns the last connection error.
    pub async fn connect_with_prompt(url: &str, from_env: bool, prompter: &mut dyn Prompter) -> Result<Self> {
        let mut url = url.to_string();
        loop {
            let err = match Self::connect(&url).await {
                Ok(broker) => return Ok(broker),
                Err(err) => err,
            };
            error!(url = %redact(&url), error = %err, "Failed to connect to broker");
            if from_env {
                prompter.say("The URL came from RABBITMQ_BROKER_URL; check that it is correct.");
            }
            prompter.say("1. Enter a new RabbitMQ URL");
            prompter.say("q. Quit");
            loop {
                match prompter.ask("Choice (1/q): ")?.to_ascii_lowercase().as_str() {
                    "1" => {
                        let entered = prompter.ask("RabbitMQ URL: ")?;
                        if entered.is_empty() {
                            prompter.say("No URL entered");
                            continue;
                        }
                        url = entered;
                        break;
                    }
                    "q" => return Err(err),
                    _ => prompter.say("Invalid choice. Please enter 1 or q"),
                }
            }
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn close(&self) -> Result<()> {
        if self.connection.status().connected() {
            self.connection.close(200, "Bye").await?;
            info!("Broker connection closed");
        }
        Ok(())
    }

    /// The shared channel, reopened when the server closed it (a failed
    /// passive declare does that).
    async fn channel(&self) -> Result<Channel> {
        let mut channel = self.channel.lock().await;
        if !channel.status().connected() {
            debug!("Channel closed, recreating");
            *channel = self.connection.create_channel().await?;
        }
        Ok(channel.clone())
    }

    fn stats(queue: &lapin::Queue, durable: bool) -> QueueStats {
        QueueStats {
            name: queue.name().as_str().to_string(),
            messages: queue.message_count(),
            consumers: queue.consumer_count(),
            durable,
            auto_delete: false,
        }
    }
}

fn is_not_found(err: &lapin::Error) -> bool {
    matches!(
        err,
        lapin::Error::ProtocolError(amqp)
            if matches!(amqp.kind(), AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND))
    )
}

/// Broker URL with the password masked, for logs.
pub fn redact(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            if parsed.set_password(Some("****")).is_ok() {
                parsed.to_string()
            } else {
                url.to_string()
            }
        }
        _ => url.to_string(),
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn queue_stats(&self, queue: &str) -> Result<Option<QueueStats>> {
        let channel = self.channel().await?;
        let options = QueueDeclareOptions {
            passive: true,
            ..QueueDeclareOptions::default()
        };
        match channel.queue_declare(queue, options, FieldTable::default()).await {
            Ok(declared) => Ok(Some(Self::stats(&declared, true))),
            Err(err) if is_not_found(&err) => {
                debug!(queue, "Queue does not exist");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn declare_durable(&self, queue: &str) -> Result<QueueStats> {
        let channel = self.channel().await?;
        let options = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };
        let declared = channel
            .queue_declare(queue, options, FieldTable::default())
            .await?;
        Ok(Self::stats(&declared, true))
    }

    async fn publish_json(&self, queue: &str, body: &[u8]) -> Result<()> {
        let channel = self.channel().await?;
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type("application/json".into());
        channel
            .basic_publish("", queue, BasicPublishOptions::default(), body, properties)
            .await?
            .await?;
        Ok(())
    }

    async fn get(&self, queue: &str) -> Result<Option<Delivery>> {
        let channel = self.channel().await?;
        let message = channel
            .basic_get(queue, BasicGetOptions { no_ack: false })
            .await?;
        Ok(message.map(|message| Delivery {
            tag: message.delivery.delivery_tag,
            body: message.delivery.data,
        }))
    }

    async fn ack(&self, tag: u64) -> Result<()> {
        let channel = self.channel().await?;
        channel.basic_ack(tag, BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn requeue(&self, tag: u64) -> Result<()> {
        let channel = self.channel().await?;
        let options = BasicNackOptions {
            multiple: false,
            requeue: true,
        };
        channel.basic_nack(tag, options).await?;
        Ok(())
    }

    async fn purge(&self, queue: &str) -> Result<u32> {
        let channel = self.channel().await?;
        Ok(channel
            .queue_purge(queue, QueuePurgeOptions::default())
            .await?)
    }

    async fn next_delivery(&self, queue: &str) -> Result<Option<Delivery>> {
        let mut slot = self.consumer.lock().await;
        if slot.as_ref().map(|(name, _)| name.as_str()) != Some(queue) {
            let channel = self.channel().await?;
            let consumer = channel
                .basic_consume(
                    queue,
                    "opsbox-monitor",
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await?;
            *slot = Some((queue.to_string(), consumer));
        }
        let Some((_, consumer)) = slot.as_mut() else {
            return Err(OpsError::InvalidInput("consumer not initialised".to_string()));
        };
        match consumer.next().await {
            Some(delivery) => {
                let delivery = delivery?;
                Ok(Some(Delivery {
                    tag: delivery.delivery_tag,
                    body: delivery.data,
                }))
            }
            None => {
                *slot = None;
                Ok(None)
            }
        }
    }

    async fn stop_consuming(&self) -> Result<()> {
        let Some((queue, consumer)) = self.consumer.lock().await.take() else {
            return Ok(());
        };
        let mut channel = self.channel.lock().await;
        if channel.status().connected() {
            channel
                .basic_cancel(consumer.tag().as_str(), BasicCancelOptions::default())
                .await?;
            // Closing the channel returns prefetched, unacknowledged
            // deliveries to the queue.
            channel.close(200, "consumer stopped").await?;
        }
        *channel = self.connection.create_channel().await?;
        debug!(queue = %queue, "Monitor consumer cancelled");
        Ok(())
    }
}
