//! Topic-based fan-out of live pipeline output.
//!
//! The pipeline publishes; live-channel connections subscribe. Each topic is
//! a `tokio::sync::broadcast` channel, so a slow subscriber lags on its own
//! receiver and never blocks ingestion.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::metrics::MetricsSnapshot;
use crate::types::{Block, Event};

/// A message pushed to live subscribers, serialized as `{"type": …, "data": …}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum LiveMessage {
    RecentEvents(Vec<Event>),
    NewEvent(Event),
    NewBlock(Block),
    MetricsUpdate(MetricsSnapshot),
}

/// A fan-out topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// New blocks and metrics updates.
    Global,
    /// New events for one (normalized) contract address.
    Contract(String),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Contract(addr) => write!(f, "contract:{addr}"),
        }
    }
}

/// Per-topic broadcast registry.
pub struct LiveHub {
    capacity: usize,
    global: broadcast::Sender<LiveMessage>,
    contracts: Mutex<HashMap<String, broadcast::Sender<LiveMessage>>>,
}

impl LiveHub {
    pub fn new(capacity: usize) -> Self {
        let (global, _) = broadcast::channel(capacity.max(1));
        Self {
            capacity: capacity.max(1),
            global,
            contracts: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to a topic. Dropping the receiver unsubscribes.
    pub fn subscribe(&self, topic: &Topic) -> broadcast::Receiver<LiveMessage> {
        match topic {
            Topic::Global => self.global.subscribe(),
            Topic::Contract(addr) => self
                .contracts
                .lock()
                .unwrap()
                .entry(addr.clone())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe(),
        }
    }

    /// Publish to a topic; returns how many subscribers received it.
    ///
    /// Contract topics with no remaining subscribers are dropped here.
    pub fn publish(&self, topic: &Topic, message: LiveMessage) -> usize {
        match topic {
            Topic::Global => self.global.send(message).unwrap_or(0),
            Topic::Contract(addr) => {
                let mut contracts = self.contracts.lock().unwrap();
                let Some(sender) = contracts.get(addr) else {
                    return 0;
                };
                match sender.send(message) {
                    Ok(n) => n,
                    Err(_) => {
                        contracts.remove(addr);
                        0
                    }
                }
            }
        }
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        match topic {
            Topic::Global => self.global.receiver_count(),
            Topic::Contract(addr) => self
                .contracts
                .lock()
                .unwrap()
                .get(addr)
                .map(|s| s.receiver_count())
                .unwrap_or(0),
        }
    }
}

impl Default for LiveHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn block(n: u64) -> Block {
        Block {
            block_number: n,
            timestamp: Utc::now(),
            transaction_count: 0,
            gas_used: 0,
            gas_limit: 30_000_000,
        }
    }

    fn event(addr: &str) -> Event {
        Event {
            id: Some(1),
            contract_address: addr.into(),
            event_name: "Transfer".into(),
            block_number: 1,
            transaction_hash: None,
            args: vec![],
            gas_used: None,
            timestamp: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn contract_topics_are_isolated() {
        let hub = LiveHub::new(16);
        let a = Topic::Contract("0xaaa".into());
        let b = Topic::Contract("0xbbb".into());
        let mut rx_a = hub.subscribe(&a);
        let mut rx_b = hub.subscribe(&b);

        assert_eq!(hub.publish(&a, LiveMessage::NewEvent(event("0xaaa"))), 1);

        match rx_a.recv().await.unwrap() {
            LiveMessage::NewEvent(e) => assert_eq!(e.contract_address, "0xaaa"),
            other => panic!("unexpected message {other:?}"),
        }
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_receivers_unsubscribe() {
        let hub = LiveHub::new(16);
        let topic = Topic::Contract("0xaaa".into());
        let rx = hub.subscribe(&topic);
        assert_eq!(hub.subscriber_count(&topic), 1);
        drop(rx);
        assert_eq!(hub.publish(&topic, LiveMessage::NewEvent(event("0xaaa"))), 0);
        assert_eq!(hub.subscriber_count(&topic), 0);
    }

    #[test]
    fn publish_without_subscribers_is_harmless() {
        let hub = LiveHub::new(4);
        assert_eq!(hub.publish(&Topic::Global, LiveMessage::NewBlock(block(1))), 0);
        assert_eq!(
            hub.publish(&Topic::Contract("0xccc".into()), LiveMessage::NewEvent(event("0xccc"))),
            0
        );
    }

    #[test]
    fn messages_serialize_with_type_tag() {
        let json = serde_json::to_value(LiveMessage::NewBlock(block(42))).unwrap();
        assert_eq!(json["type"], "new-block");
        assert_eq!(json["data"]["blockNumber"], 42);

        let json = serde_json::to_value(LiveMessage::RecentEvents(vec![])).unwrap();
        assert_eq!(json["type"], "recent-events");
        assert_eq!(Topic::Contract("0xabc".into()).to_string(), "contract:0xabc");
    }
}
