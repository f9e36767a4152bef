//! The actor interface, the per-invocation context, and the kind registry.
//!
//! Actors hold no state of their own between invocations: the host builds a
//! fresh instance from the registry for every call, message or task firing,
//! and all durable state goes through `ActorContext::load` / `commit`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::channel::ChannelMessage;
use crate::config::Config;
use crate::error::{HoldfastError, Result};
use crate::scheduler::TaskDb;
use crate::store::{Row, StateDb};
use crate::token::TokenSigner;
use crate::types::ActorKey;

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

pub trait Actor: Send {
    /// One-time setup. Runs through the migration guard the first time the
    /// actor wakes; a failure here locks the actor permanently.
    fn initialize(&mut self, _ctx: &mut ActorContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// An inbound call routed to this actor.
    fn handle_call(&mut self, ctx: &mut ActorContext<'_>, method: &str, payload: Value)
        -> Result<Value>;

    /// A message arriving on the actor's connection channel.
    fn handle_message(&mut self, ctx: &mut ActorContext<'_>, _message: Value) -> Result<()> {
        Err(HoldfastError::Validation(format!(
            "actor kind '{}' does not accept messages",
            ctx.key().kind()
        )))
    }

    /// A scheduled task firing.
    fn handle_task(&mut self, ctx: &mut ActorContext<'_>, method: &str, _payload: Value)
        -> Result<()> {
        Err(HoldfastError::UnknownMethod {
            kind: ctx.key().kind().to_string(),
            method: method.to_string(),
        })
    }
}

/// Decode a call payload, reporting shape problems as `Validation`.
pub fn parse_payload<T: DeserializeOwned>(payload: Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|e| HoldfastError::Validation(e.to_string()))
}

// ---------------------------------------------------------------------------
// ActorContext
// ---------------------------------------------------------------------------

/// Everything one invocation may touch, scoped to a single actor key.
pub struct ActorContext<'a> {
    key: &'a ActorKey,
    store: &'a StateDb,
    tasks: &'a TaskDb,
    signer: &'a TokenSigner,
    config: &'a Config,
    now: DateTime<Utc>,
    outbox: Vec<ChannelMessage>,
}

impl<'a> ActorContext<'a> {
    pub(crate) fn new(
        key: &'a ActorKey,
        store: &'a StateDb,
        tasks: &'a TaskDb,
        signer: &'a TokenSigner,
        config: &'a Config,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            store,
            tasks,
            signer,
            config,
            now,
            outbox: Vec::new(),
        }
    }

    pub fn key(&self) -> &ActorKey {
        self.key
    }

    /// The instant this invocation is running at.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    pub fn signer(&self) -> &TokenSigner {
        self.signer
    }

    /// Read a state slot, `None` if never committed.
    pub fn load_opt<T: DeserializeOwned>(&self, slot: &str) -> Result<Option<T>> {
        self.store.get(self.key, slot)
    }

    /// Read a state slot, `T::default()` if never committed.
    pub fn load<T: DeserializeOwned + Default>(&self, slot: &str) -> Result<T> {
        Ok(self.load_opt(slot)?.unwrap_or_default())
    }

    /// Replace a state slot with `value`.
    pub fn commit<T: Serialize>(&mut self, slot: &str, value: T) -> Result<()> {
        self.store.set(self.key, slot, &value)
    }

    /// Read-modify-write of a state slot in one transaction.
    pub fn update<T, F>(&mut self, slot: &str, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> Result<T>,
    {
        self.store.update(self.key, slot, f)
    }

    pub fn append(&mut self, table: &str, data: Value) -> Result<u64> {
        self.store.append(self.key, table, data)
    }

    pub fn rows(&self, table: &str) -> Result<Vec<Row>> {
        self.store.rows(self.key, table)
    }

    /// Ask the durable scheduler to run `method` on this actor after `delay_seconds`.
    pub fn schedule(&mut self, delay_seconds: u64, method: &str, payload: Value) -> Result<Uuid> {
        self.tasks
            .schedule(self.key, delay_seconds, method, payload, self.now)
    }

    /// Cancel one of this actor's tasks. `true` iff it had not fired yet.
    ///
    /// Ids belonging to another actor are treated as unknown.
    pub fn cancel(&mut self, task_id: Uuid) -> Result<bool> {
        match self.tasks.get(task_id)? {
            Some(task) if &task.actor == self.key => self.tasks.cancel(task_id),
            _ => Ok(false),
        }
    }

    /// Queue a message for every subscriber of this actor.
    pub fn broadcast(&mut self, message: ChannelMessage) {
        self.outbox.push(message);
    }

    pub(crate) fn take_outbox(&mut self) -> Vec<ChannelMessage> {
        std::mem::take(&mut self.outbox)
    }
}

// ---------------------------------------------------------------------------
// ActorRegistry
// ---------------------------------------------------------------------------

pub type ActorFactory = fn(&ActorKey) -> Box<dyn Actor>;

/// Kind tag → constructor lookup used by the host to dispatch.
#[derive(Clone, Default)]
pub struct ActorRegistry {
    factories: HashMap<String, ActorFactory>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every actor kind shipped in `crate::actors`.
    pub fn builtin() -> Self {
        crate::actors::register_builtin(Self::new())
    }

    pub fn register(mut self, kind: impl Into<String>, factory: ActorFactory) -> Self {
        self.factories.insert(kind.into(), factory);
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn create(&self, key: &ActorKey) -> Result<Box<dyn Actor>> {
        self.factories
            .get(key.kind())
            .map(|factory| factory(key))
            .ok_or_else(|| HoldfastError::UnknownActorKind(key.kind().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use serde_json::json;

    struct Echo;

    impl Actor for Echo {
        fn handle_call(
            &mut self,
            _ctx: &mut ActorContext<'_>,
            _method: &str,
            payload: Value,
        ) -> Result<Value> {
            Ok(payload)
        }
    }

    fn echo(_key: &ActorKey) -> Box<dyn Actor> {
        Box::new(Echo)
    }

    #[test]
    fn registry_creates_registered_kinds_only() {
        let registry = ActorRegistry::new().register("echo", echo);
        assert!(registry.contains("echo"));
        assert!(registry.create(&ActorKey::new("echo", "a").unwrap()).is_ok());
        assert!(matches!(
            registry.create(&ActorKey::new("ghost", "a").unwrap()),
            Err(HoldfastError::UnknownActorKind(_))
        ));
    }

    #[test]
    fn builtin_registry_lists_all_kinds() {
        assert_eq!(
            ActorRegistry::builtin().kinds(),
            vec!["approval", "follow_up", "retry"]
        );
    }

    #[test]
    fn default_message_handler_rejects() {
        let fx = Fixture::new("echo", "a");
        let mut ctx = fx.ctx();
        let err = Echo.handle_message(&mut ctx, json!({})).unwrap_err();
        assert!(matches!(err, HoldfastError::Validation(_)));
    }

    #[test]
    fn load_defaults_and_commit_roundtrip() {
        let fx = Fixture::new("echo", "a");
        let mut ctx = fx.ctx();
        let n: u32 = ctx.load("n").unwrap();
        assert_eq!(n, 0);
        ctx.commit("n", 41u32 + 1).unwrap();
        assert_eq!(ctx.load::<u32>("n").unwrap(), 42);
    }

    #[test]
    fn cancel_ignores_other_actors_tasks() {
        let fx = Fixture::new("echo", "a");
        let other = ActorKey::new("echo", "b").unwrap();
        let foreign = fx
            .tasks
            .schedule(&other, 60, "x", json!({}), Utc::now())
            .unwrap();

        let mut ctx = fx.ctx();
        assert!(!ctx.cancel(foreign).unwrap());
        assert!(fx.tasks.get(foreign).unwrap().unwrap().is_pending());
    }

    #[test]
    fn parse_payload_reports_validation() {
        #[derive(serde::Deserialize, Debug)]
        struct Body {
            #[allow(dead_code)]
            amount: u32,
        }
        let err = parse_payload::<Body>(json!({"amount": "lots"})).unwrap_err();
        assert!(matches!(err, HoldfastError::Validation(_)));
    }
}
