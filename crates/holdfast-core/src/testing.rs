//! Shared fixtures for unit tests.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tempfile::TempDir;

use crate::actor::ActorContext;
use crate::channel::{ChannelMessage, Publisher};
use crate::config::Config;
use crate::scheduler::TaskDb;
use crate::store::StateDb;
use crate::token::TokenSigner;
use crate::types::ActorKey;

pub(crate) struct Fixture {
    _dir: TempDir,
    pub store: StateDb,
    pub tasks: TaskDb,
    pub signer: TokenSigner,
    pub config: Config,
    pub key: ActorKey,
}

impl Fixture {
    pub fn new(kind: &str, id: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let store = StateDb::open(&dir.path().join("state.redb")).unwrap();
        let tasks = TaskDb::open(&dir.path().join("tasks.redb")).unwrap();
        Self {
            _dir: dir,
            store,
            tasks,
            signer: TokenSigner::new(b"fixture-secret".to_vec()),
            config: Config::default(),
            key: ActorKey::new(kind, id).unwrap(),
        }
    }

    pub fn ctx(&self) -> ActorContext<'_> {
        self.ctx_at(Utc::now())
    }

    pub fn ctx_at(&self, now: DateTime<Utc>) -> ActorContext<'_> {
        ActorContext::new(
            &self.key,
            &self.store,
            &self.tasks,
            &self.signer,
            &self.config,
            now,
        )
    }
}

/// Captures everything published, for assertions.
#[derive(Default)]
pub(crate) struct RecordingPublisher {
    pub messages: Mutex<Vec<(ActorKey, ChannelMessage)>>,
}

impl RecordingPublisher {
    pub fn take(&self) -> Vec<(ActorKey, ChannelMessage)> {
        std::mem::take(&mut *self.messages.lock().unwrap())
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, actor: &ActorKey, message: &ChannelMessage) {
        self.messages
            .lock()
            .unwrap()
            .push((actor.clone(), message.clone()));
    }
}
