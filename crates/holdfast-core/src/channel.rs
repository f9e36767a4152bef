//! Messages pushed to connection subscribers, and the sink that delivers them.

use serde::{Deserialize, Serialize};

use crate::types::ActorKey;

/// Server → subscriber message on an actor's connection channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
    /// The actor's observable state changed.
    StateUpdate { state: serde_json::Value },
    /// A command from this subscriber was rejected.
    Error { message: String },
}

/// Fan-out of channel messages to every subscriber of an actor.
///
/// The host calls `publish` after each serialized invocation, in the order
/// the actor emitted the messages.
pub trait Publisher: Send + Sync {
    fn publish(&self, actor: &ActorKey, message: &ChannelMessage);
}

/// Drops everything. Used when no connection layer is attached (CLI, tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish(&self, _actor: &ActorKey, _message: &ChannelMessage) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_matches_subscriber_protocol() {
        let update = ChannelMessage::StateUpdate {
            state: serde_json::json!({"status": "pending_review"}),
        };
        let v = serde_json::to_value(&update).unwrap();
        assert_eq!(v["type"], "state_update");
        assert_eq!(v["state"]["status"], "pending_review");

        let err = ChannelMessage::Error {
            message: "no review is pending".into(),
        };
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["message"], "no review is pending");
    }
}
