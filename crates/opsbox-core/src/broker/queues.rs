//! Queue discovery, filtering and ordering.

use std::fmt;
use std::str::FromStr;

use tracing::{debug, info, warn};

use super::management::ManagementApi;
use super::{Broker, QueueStats};
use crate::error::Result;

/// Device command queues are named after the 15-digit IMEI.
pub fn is_imei(name: &str) -> bool {
    name.len() == 15 && name.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueFilter {
    #[default]
    All,
    Active,
    NonImei,
    ImeiOnly,
}

impl QueueFilter {
    pub fn matches(self, queue: &QueueStats) -> bool {
        match self {
            QueueFilter::All => true,
            QueueFilter::Active => queue.messages > 0 || queue.consumers > 0,
            QueueFilter::NonImei => !is_imei(&queue.name),
            QueueFilter::ImeiOnly => is_imei(&queue.name),
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            QueueFilter::All => "ALL QUEUES",
            QueueFilter::Active => "ACTIVE QUEUES (with messages or consumers)",
            QueueFilter::NonImei => "NON-IMEI QUEUES (excluding 15-digit IMEI queues)",
            QueueFilter::ImeiOnly => "IMEI QUEUES (only 15-digit IMEI queues)",
        }
    }
}

impl FromStr for QueueFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(QueueFilter::All),
            "active" => Ok(QueueFilter::Active),
            "non-imei" => Ok(QueueFilter::NonImei),
            "imei-only" | "imei" => Ok(QueueFilter::ImeiOnly),
            other => Err(format!(
                "unknown queue filter '{other}' (expected all, active, non-imei or imei-only)"
            )),
        }
    }
}

impl fmt::Display for QueueFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueueFilter::All => "all",
            QueueFilter::Active => "active",
            QueueFilter::NonImei => "non-imei",
            QueueFilter::ImeiOnly => "imei-only",
        })
    }
}

/// Queues with consumers first, then those with messages, then by message
/// count and consumer count, all descending.
pub fn sort_by_activity(queues: &mut [QueueStats]) {
    queues.sort_by(|a, b| {
        let key = |q: &QueueStats| (q.consumers > 0, q.messages > 0, q.messages, q.consumers);
        key(b).cmp(&key(a))
    });
}

pub fn status_label(queue: &QueueStats) -> &'static str {
    match (queue.consumers > 0, queue.messages > 0) {
        (true, true) => "BUSY",
        (true, false) => "ACTIVE",
        (false, true) => "BACKLOG",
        (false, false) => "IDLE",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverySource {
    ManagementApi,
    KnownQueues,
}

/// Every queue the management API reports, or failing that the known
/// queues that answer a passive declare.
pub async fn discover(
    broker: &dyn Broker,
    management: Option<&ManagementApi>,
    known: &[String],
) -> Result<(Vec<QueueStats>, DiscoverySource)> {
    if let Some(api) = management {
        match api.queues().await {
            Ok(queues) => {
                info!(count = queues.len(), "Management API available");
                return Ok((queues, DiscoverySource::ManagementApi));
            }
            Err(err) => debug!(error = %err, "Management API not available"),
        }
    }

    info!("Management API not available, probing known queues");
    let mut found = Vec::new();
    for name in known {
        if found.iter().any(|q: &QueueStats| &q.name == name) {
            continue;
        }
        if let Some(stats) = broker.queue_stats(name).await? {
            found.push(stats);
        }
    }
    if found.is_empty() {
        warn!("No queues discovered; enable the management plugin for full visibility");
    } else {
        warn!(count = found.len(), "Fallback discovery may not show every queue");
    }
    Ok((found, DiscoverySource::KnownQueues))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;

    fn q(name: &str, messages: u32, consumers: u32) -> QueueStats {
        QueueStats {
            name: name.into(),
            messages,
            consumers,
            durable: true,
            auto_delete: false,
        }
    }

    #[test]
    fn imei_is_exactly_fifteen_digits() {
        assert!(is_imei("350317177240177"));
        assert!(!is_imei("35031717724017"));
        assert!(!is_imei("3503171772401770"));
        assert!(!is_imei("35031717724017a"));
    }

    #[test]
    fn filters_parse_and_match() {
        let filter: QueueFilter = "non-imei".parse().unwrap();
        assert!(filter.matches(&q("device_tcp_data", 0, 0)));
        assert!(!filter.matches(&q("350317177240177", 0, 0)));
        assert!(!QueueFilter::Active.matches(&q("idle", 0, 0)));
        assert!(QueueFilter::Active.matches(&q("busy", 0, 1)));
        assert!("bogus".parse::<QueueFilter>().is_err());
    }

    #[test]
    fn sort_prefers_consumers_then_messages() {
        let mut queues = vec![
            q("idle", 0, 0),
            q("backlog-big", 50, 0),
            q("active", 0, 1),
            q("busy", 3, 2),
            q("backlog-small", 5, 0),
        ];
        sort_by_activity(&mut queues);
        let names: Vec<&str> = queues.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["busy", "active", "backlog-big", "backlog-small", "idle"]);
        assert_eq!(status_label(&queues[0]), "BUSY");
        assert_eq!(status_label(&queues[2]), "BACKLOG");
        assert_eq!(status_label(&queues[4]), "IDLE");
    }

    #[tokio::test]
    async fn fallback_probes_known_queues() {
        let broker = MemoryBroker::new()
            .with_queue("device_tcp_data", 1, ["{}"])
            .with_queue("audit_log", 0, Vec::<Vec<u8>>::new());
        let known: Vec<String> = ["device_tcp_data", "audit_log", "missing", "audit_log"]
            .into_iter()
            .map(String::from)
            .collect();
        let (queues, source) = discover(&broker, None, &known).await.unwrap();
        assert_eq!(source, DiscoverySource::KnownQueues);
        assert_eq!(queues.len(), 2);
        assert_eq!(queues[0].messages, 1);
    }
}
