//! Per-actor fan-out of connection-channel messages.
//!
//! Each actor key with at least one live WebSocket gets its own
//! `tokio::sync::broadcast` channel. Senders with no receivers left are
//! dropped on the next publish to that key.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use holdfast_core::channel::{ChannelMessage, Publisher};
use holdfast_core::types::ActorKey;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
pub struct ChannelHub {
    senders: Mutex<HashMap<ActorKey, broadcast::Sender<ChannelMessage>>>,
}

impl ChannelHub {
    pub fn subscribe(&self, key: &ActorKey) -> broadcast::Receiver<ChannelMessage> {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, key: &ActorKey) -> usize {
        let senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders.get(key).map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Publisher for ChannelHub {
    fn publish(&self, actor: &ActorKey, message: &ChannelMessage) {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = senders.get(actor) else {
            return;
        };
        if tx.send(message.clone()).is_err() {
            senders.remove(actor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(id: &str) -> ActorKey {
        ActorKey::new("approval", id).unwrap()
    }

    fn update(status: &str) -> ChannelMessage {
        ChannelMessage::StateUpdate {
            state: json!({ "status": status }),
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber_of_that_actor_only() {
        let hub = ChannelHub::default();
        let mut a1 = hub.subscribe(&key("a"));
        let mut a2 = hub.subscribe(&key("a"));
        let mut b = hub.subscribe(&key("b"));

        hub.publish(&key("a"), &update("running"));

        assert_eq!(a1.recv().await.unwrap(), update("running"));
        assert_eq!(a2.recv().await.unwrap(), update("running"));
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let hub = ChannelHub::default();
        hub.publish(&key("nobody"), &update("idle"));
        assert_eq!(hub.subscriber_count(&key("nobody")), 0);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let hub = ChannelHub::default();
        let rx = hub.subscribe(&key("a"));
        assert_eq!(hub.subscriber_count(&key("a")), 1);
        drop(rx);
        hub.publish(&key("a"), &update("idle"));
        assert_eq!(hub.subscriber_count(&key("a")), 0);
    }
}
