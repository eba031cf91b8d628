//! In-process channel fan-out.
//!
//! Independent of the queue mechanism: used by the broker for its own
//! lifecycle events and by arbitrary application channels. Delivery is
//! at-most-once and non-durable; a subscriber that connects after a
//! publish never sees the message.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::time::now_ms;

/// Published message envelope.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub id: String,
    pub channel: String,
    pub published_at: u64,
    pub payload: Value,
    pub metadata: Value,
}

pub struct PubSub {
    channels: RwLock<HashMap<String, Vec<UnboundedSender<Envelope>>>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Publish to a channel. Returns the message id and the number of
    /// subscribers it was delivered to. Closed receivers are pruned here.
    pub fn publish(&self, channel: &str, payload: Value, metadata: Value) -> (String, usize) {
        let envelope = Envelope {
            id: Uuid::now_v7().to_string(),
            channel: channel.to_string(),
            published_at: now_ms(),
            payload,
            metadata,
        };
        let id = envelope.id.clone();

        let mut channels = self.channels.write();
        let Some(subscribers) = channels.get_mut(channel) else {
            return (id, 0);
        };

        subscribers.retain(|tx| tx.send(envelope.clone()).is_ok());
        let delivered = subscribers.len();
        if subscribers.is_empty() {
            channels.remove(channel);
        }
        (id, delivered)
    }

    /// Register a subscriber; messages published before this call are
    /// never delivered.
    pub fn subscribe(&self, channel: &str) -> UnboundedReceiver<Envelope> {
        let (tx, rx) = unbounded_channel();
        self.channels
            .write()
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Drop every subscriber on a channel. Returns how many were dropped.
    pub fn unsubscribe(&self, channel: &str) -> usize {
        self.channels
            .write()
            .remove(channel)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .get(channel)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    pub fn channels(&self) -> Vec<String> {
        self.channels.read().keys().cloned().collect()
    }

    /// Drop all subscriptions. Used at broker shutdown.
    pub fn clear(&self) {
        self.channels.write().clear();
    }
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new()
    }
}
