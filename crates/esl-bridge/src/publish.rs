//! Publish gateway
//!
//! The router hands derived messages to a [`Publisher`] and moves on:
//! publishing never blocks and never reports failure back. [`PubSubHub`]
//! is the in-process implementation, one broadcast channel per pub/sub
//! channel name, created when the first subscriber arrives.

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

const AGENT_CHANNEL_PREFIX: &str = "monitor_agent_";
const AGENTS_CHANNEL_PREFIX: &str = "monitor_agents_";
const AGENT_GROUP_PREFIX_LEN: usize = 5;

/// Fire-and-forget sink for `(channel, payload)` pairs
pub trait Publisher: Send + Sync {
    fn publish(&self, channel: &str, payload: Value);

    /// Drop per-channel resources nobody listens to. Returns how many were dropped.
    fn prune_idle(&self) -> usize {
        0
    }
}

/// Per-agent call state channel, keyed by the raw agent id
pub fn agent_channel(agent_id: &str) -> String {
    format!("{}{}", AGENT_CHANNEL_PREFIX, agent_id)
}

/// Queue-info channel shared by agents with the same five-character prefix
pub fn agents_channel(agent: &str) -> String {
    let prefix: String = agent.chars().take(AGENT_GROUP_PREFIX_LEN).collect();
    format!("{}{}", AGENTS_CHANNEL_PREFIX, prefix)
}

/// Channel names may be given Bayeux-style with a leading slash
pub fn normalize_channel(channel: &str) -> &str {
    channel.trim_start_matches('/')
}

/// A message delivered to channel subscribers
#[derive(Debug, Clone)]
pub struct HubMessage {
    pub channel: Arc<str>,
    pub payload: Arc<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub channels: usize,
    pub subscribers: usize,
    pub published: u64,
    /// Sum over messages of the subscribers each one reached
    pub delivered: u64,
}

pub struct PubSubHub {
    channels: DashMap<String, broadcast::Sender<HubMessage>>,
    capacity: usize,
    published: AtomicU64,
    delivered: AtomicU64,
}

impl PubSubHub {
    /// `capacity` is the per-channel backlog before slow subscribers lag
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<HubMessage> {
        let channel = normalize_channel(channel);
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(normalize_channel(channel))
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            channels: self.channels.len(),
            subscribers: self.channels.iter().map(|e| e.value().receiver_count()).sum(),
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
        }
    }
}

impl Publisher for PubSubHub {
    fn publish(&self, channel: &str, payload: Value) {
        let channel = normalize_channel(channel);
        self.published.fetch_add(1, Ordering::Relaxed);

        let Some(tx) = self.channels.get(channel) else {
            debug!(channel, "No subscribers, message dropped");
            return;
        };

        let message = HubMessage {
            channel: Arc::from(channel),
            payload: Arc::new(payload),
        };
        match tx.send(message) {
            Ok(receivers) => {
                self.delivered.fetch_add(receivers as u64, Ordering::Relaxed);
                debug!(channel, receivers, "Published message");
            }
            Err(_) => debug!(channel, "Subscribers gone, message dropped"),
        }
    }

    fn prune_idle(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, tx| tx.receiver_count() > 0);
        before - self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_names() {
        assert_eq!(agent_channel("42"), "monitor_agent_42");
        assert_eq!(agents_channel("1000123"), "monitor_agents_10001");
        assert_eq!(agents_channel("123"), "monitor_agents_123");
        assert_eq!(normalize_channel("/monitor_agent_42"), "monitor_agent_42");
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let hub = PubSubHub::new(16);
        let mut first = hub.subscribe("/monitor_agent_42");
        let mut second = hub.subscribe("monitor_agent_42");
        assert_eq!(hub.subscriber_count("monitor_agent_42"), 2);

        hub.publish("monitor_agent_42", json!({"state": "started"}));

        for rx in [&mut first, &mut second] {
            let message = rx.recv().await.unwrap();
            assert_eq!(&*message.channel, "monitor_agent_42");
            assert_eq!(message.payload["state"], "started");
        }

        let stats = hub.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.channels, 1);
        assert_eq!(stats.subscribers, 2);
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let hub = PubSubHub::new(16);
        hub.publish("monitor_agent_7", json!({}));

        assert_eq!(hub.channel_count(), 0);
        assert_eq!(hub.stats().published, 1);
        assert_eq!(hub.stats().delivered, 0);
    }

    #[test]
    fn test_prune_idle_channels() {
        let hub = PubSubHub::new(16);
        let kept = hub.subscribe("monitor_agent_1");
        drop(hub.subscribe("monitor_agent_2"));

        assert_eq!(hub.prune_idle(), 1);
        assert_eq!(hub.channel_count(), 1);
        assert_eq!(hub.subscriber_count("monitor_agent_1"), 1);
        drop(kept);
    }
}
