use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Broker, Delivery, QueueStats};
use crate::error::{OpsError, Result};

#[derive(Debug, Default)]
struct MemoryQueue {
    messages: VecDeque<Vec<u8>>,
    consumers: u32,
    durable: bool,
}

#[derive(Debug, Default)]
struct State {
    queues: BTreeMap<String, MemoryQueue>,
    unacked: HashMap<u64, (String, Vec<u8>)>,
    published: Vec<(String, Vec<u8>)>,
    /// Queue with an active consumer and the tags it delivered.
    consumer: Option<(String, Vec<u64>)>,
}

/// In-process broker with RabbitMQ's default-exchange semantics: messages
/// published to an undeclared queue are dropped, requeued messages go back
/// to the head of their queue.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    state: Mutex<State>,
    next_tag: AtomicU64,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue<I, B>(self, name: &str, consumers: u32, messages: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        if let Ok(mut state) = self.state.lock() {
            let queue = state.queues.entry(name.to_string()).or_default();
            queue.consumers = consumers;
            queue.durable = true;
            queue.messages.extend(messages.into_iter().map(Into::into));
        }
        self
    }

    /// Bodies currently waiting in `queue`, head first.
    pub fn messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.queues.get(queue).map(|q| q.messages.iter().cloned().collect()))
            .unwrap_or_default()
    }

    /// Every publish as `(routing key, body)`.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.state
            .lock()
            .map(|state| state.published.clone())
            .unwrap_or_default()
    }

    /// Queue the consumer started by `next_delivery` is attached to.
    pub fn consuming(&self) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.consumer.as_ref().map(|(queue, _)| queue.clone()))
    }

    pub fn unacked(&self) -> usize {
        self.state.lock().map(|state| state.unacked.len()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| OpsError::InvalidInput("memory broker state poisoned".to_string()))
    }

    fn stats(name: &str, queue: &MemoryQueue) -> QueueStats {
        QueueStats {
            name: name.to_string(),
            messages: queue.messages.len() as u32,
            consumers: queue.consumers,
            durable: queue.durable,
            auto_delete: false,
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn queue_stats(&self, queue: &str) -> Result<Option<QueueStats>> {
        let state = self.lock()?;
        Ok(state.queues.get(queue).map(|q| Self::stats(queue, q)))
    }

    async fn declare_durable(&self, queue: &str) -> Result<QueueStats> {
        let mut state = self.lock()?;
        let entry = state.queues.entry(queue.to_string()).or_default();
        entry.durable = true;
        Ok(Self::stats(queue, entry))
    }

    async fn publish_json(&self, queue: &str, body: &[u8]) -> Result<()> {
        let mut state = self.lock()?;
        state.published.push((queue.to_string(), body.to_vec()));
        if let Some(target) = state.queues.get_mut(queue) {
            target.messages.push_back(body.to_vec());
        }
        Ok(())
    }

    async fn get(&self, queue: &str) -> Result<Option<Delivery>> {
        let mut state = self.lock()?;
        let Some(body) = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| OpsError::NotFound(format!("queue '{queue}'")))?
            .messages
            .pop_front()
        else {
            return Ok(None);
        };
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        state.unacked.insert(tag, (queue.to_string(), body.clone()));
        Ok(Some(Delivery { tag, body }))
    }

    async fn ack(&self, tag: u64) -> Result<()> {
        let mut state = self.lock()?;
        state
            .unacked
            .remove(&tag)
            .map(|_| ())
            .ok_or_else(|| OpsError::NotFound(format!("delivery tag {tag}")))
    }

    async fn requeue(&self, tag: u64) -> Result<()> {
        let mut state = self.lock()?;
        let (queue, body) = state
            .unacked
            .remove(&tag)
            .ok_or_else(|| OpsError::NotFound(format!("delivery tag {tag}")))?;
        if let Some(target) = state.queues.get_mut(&queue) {
            target.messages.push_front(body);
        }
        Ok(())
    }

    async fn purge(&self, queue: &str) -> Result<u32> {
        let mut state = self.lock()?;
        let target = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| OpsError::NotFound(format!("queue '{queue}'")))?;
        let removed = target.messages.len() as u32;
        target.messages.clear();
        Ok(removed)
    }

    async fn next_delivery(&self, queue: &str) -> Result<Option<Delivery>> {
        {
            let attached = self.lock()?.consumer.as_ref().map(|(name, _)| name.clone());
            if attached.as_deref() != Some(queue) {
                if attached.is_some() {
                    self.stop_consuming().await?;
                }
                let mut state = self.lock()?;
                let target = state
                    .queues
                    .get_mut(queue)
                    .ok_or_else(|| OpsError::NotFound(format!("queue '{queue}'")))?;
                target.consumers += 1;
                state.consumer = Some((queue.to_string(), Vec::new()));
            }
        }
        let delivery = self.get(queue).await?;
        if let Some(delivery) = &delivery {
            if let Some((_, tags)) = self.lock()?.consumer.as_mut() {
                tags.push(delivery.tag);
            }
        }
        Ok(delivery)
    }

    async fn stop_consuming(&self) -> Result<()> {
        let mut state = self.lock()?;
        let Some((queue, tags)) = state.consumer.take() else {
            return Ok(());
        };
        let mut pending: Vec<Vec<u8>> = tags
            .iter()
            .filter_map(|tag| state.unacked.remove(tag).map(|(_, body)| body))
            .collect();
        if let Some(target) = state.queues.get_mut(&queue) {
            target.consumers = target.consumers.saturating_sub(1);
            while let Some(body) = pending.pop() {
                target.messages.push_front(body);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reverse_requeue_restores_order() {
        let broker = MemoryBroker::new().with_queue("q", 0, ["a", "b", "c"]);
        let first = broker.get("q").await.unwrap().unwrap();
        let second = broker.get("q").await.unwrap().unwrap();
        broker.requeue(second.tag).await.unwrap();
        broker.requeue(first.tag).await.unwrap();

        assert_eq!(broker.messages("q"), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(broker.unacked(), 0);
    }

    #[tokio::test]
    async fn publishing_to_undeclared_queue_is_dropped() {
        let broker = MemoryBroker::new();
        broker.publish_json("nowhere", b"{}").await.unwrap();
        assert!(broker.queue_stats("nowhere").await.unwrap().is_none());
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test]
    async fn stopping_the_consumer_detaches_and_returns_unacked() {
        let broker = MemoryBroker::new().with_queue("q", 0, ["a", "b"]);
        let first = broker.next_delivery("q").await.unwrap().unwrap();
        assert_eq!(broker.consuming().as_deref(), Some("q"));
        assert_eq!(broker.queue_stats("q").await.unwrap().unwrap().consumers, 1);

        broker.stop_consuming().await.unwrap();
        assert_eq!(broker.consuming(), None);
        assert_eq!(broker.queue_stats("q").await.unwrap().unwrap().consumers, 0);
        assert_eq!(broker.messages("q"), vec![first.body, b"b".to_vec()]);
        assert_eq!(broker.unacked(), 0);
    }
}
