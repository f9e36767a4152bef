use std::path::Path;
use std::sync::Arc;

use holdfast_core::ActorHost;

use crate::channels::ChannelHub;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub host: Arc<ActorHost>,
    pub hub: Arc<ChannelHub>,
}

impl AppState {
    /// Wrap a host, routing everything it broadcasts into a fresh hub.
    pub fn new(host: ActorHost) -> Self {
        let hub = Arc::new(ChannelHub::default());
        let host = host.with_publisher(hub.clone());
        Self {
            host: Arc::new(host),
            hub,
        }
    }

    pub fn open(root: &Path) -> anyhow::Result<Self> {
        Ok(Self::new(ActorHost::open(root)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdfast_core::channel::ChannelMessage;
    use holdfast_core::types::ActorKey;
    use serde_json::json;

    #[test]
    fn host_broadcasts_reach_hub_subscribers() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = AppState::open(dir.path()).unwrap();
        let key = ActorKey::new("approval", "order-1").unwrap();
        let mut rx = state.hub.subscribe(&key);

        state
            .host
            .call(&key, "submit", json!({ "data": { "amount": 100 } }))
            .unwrap();

        match rx.try_recv().unwrap() {
            ChannelMessage::StateUpdate { state } => assert_eq!(state["status"], "pending_review"),
            other => panic!("unexpected message {other:?}"),
        }
    }
}
