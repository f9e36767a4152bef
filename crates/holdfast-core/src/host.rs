//! The actor host. Every call, message and task firing goes through here.
//!
//! For each invocation the host:
//! 1. takes the per-identity lock (one invocation per actor key at a time),
//! 2. builds a fresh actor from the registry,
//! 3. runs the migration guard (`initialize` then `assert_operational`),
//! 4. dispatches to the actor,
//! 5. publishes whatever the actor broadcast, even if it then failed.
//!
//! Different actor keys never share a lock and run in parallel.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::actor::{Actor, ActorContext, ActorRegistry};
use crate::channel::{NullPublisher, Publisher};
use crate::config::Config;
use crate::error::{HoldfastError, Result};
use crate::migration::{self, MigrationStatus};
use crate::review::{self, HumanReviewSession};
use crate::scheduler::{ScheduledTask, TaskDb, TaskStatus};
use crate::single_flight::{self, SingleFlightState};
use crate::store::StateDb;
use crate::token::{InterventionClaims, TokenSigner};
use crate::types::ActorKey;
use crate::{io, paths};

/// Inspection snapshot of one actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorStatus {
    pub actor: ActorKey,
    pub migration: MigrationStatus,
    pub single_flight: SingleFlightState,
    pub review: HumanReviewSession,
    pub tasks: Vec<ScheduledTask>,
}

/// Result of one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Handlers that ran to completion.
    pub fired: u32,
    /// Due tasks that were no longer pending by the time their lock was taken.
    pub skipped: u32,
    /// Handlers that returned an error or were refused by the guard.
    pub failed: u32,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.fired == 0 && self.skipped == 0 && self.failed == 0
    }
}

enum FireOutcome {
    Fired,
    Skipped,
    Failed,
}

pub struct ActorHost {
    config: Config,
    store: StateDb,
    tasks: TaskDb,
    signer: TokenSigner,
    registry: ActorRegistry,
    publisher: Arc<dyn Publisher>,
    locks: Mutex<HashMap<ActorKey, Arc<Mutex<()>>>>,
}

impl ActorHost {
    /// Open the host for a project root: config, both databases and the
    /// signing key, with the built-in actor kinds registered.
    pub fn open(root: &Path) -> Result<Self> {
        io::ensure_dir(&paths::holdfast_dir(root))?;
        let config = Config::load(root)?;
        for warning in config.validate() {
            tracing::warn!(message = %warning.message, "config");
        }
        let store = StateDb::open(&paths::state_db_path(root))?;
        let tasks = TaskDb::open(&paths::tasks_db_path(root))?;
        let signer = TokenSigner::load_or_create(root)?;
        Ok(Self::new(config, store, tasks, signer))
    }

    pub fn new(config: Config, store: StateDb, tasks: TaskDb, signer: TokenSigner) -> Self {
        Self {
            config,
            store,
            tasks,
            signer,
            registry: ActorRegistry::builtin(),
            publisher: Arc::new(NullPublisher),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_registry(mut self, registry: ActorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tasks(&self) -> &TaskDb {
        &self.tasks
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    pub fn registry(&self) -> &ActorRegistry {
        &self.registry
    }

    /// Validate an address and check its kind is registered.
    pub fn actor_key(&self, kind: &str, id: &str) -> Result<ActorKey> {
        let key = ActorKey::new(kind, id)?;
        if !self.registry.contains(key.kind()) {
            return Err(HoldfastError::UnknownActorKind(key.kind().to_string()));
        }
        Ok(key)
    }

    // -----------------------------------------------------------------------
    // Invocation
    // -----------------------------------------------------------------------

    /// Run `f` while holding the identity lock for `key`.
    ///
    /// Lock entries live only while someone holds or waits on them: the last
    /// user out removes the entry, so idle actors leave nothing behind.
    fn with_identity_lock<R>(&self, key: &ActorKey, f: impl FnOnce() -> R) -> R {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(key.clone()).or_default().clone()
        };
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        // Clones are only taken under the map lock, so a count of one seen
        // here means no other invocation holds or waits on this entry.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
        result
    }

    /// Run `f` against a fresh actor behind the migration guard.
    /// The caller must hold the identity lock for `key`.
    fn invoke_locked<R, F>(&self, key: &ActorKey, now: DateTime<Utc>, f: F) -> Result<R>
    where
        F: FnOnce(&mut dyn Actor, &mut ActorContext<'_>) -> Result<R>,
    {
        let mut actor = self.registry.create(key)?;
        let mut ctx = ActorContext::new(
            key,
            &self.store,
            &self.tasks,
            &self.signer,
            &self.config,
            now,
        );

        let result = migration::initialize(&mut ctx, |c| actor.initialize(c))
            .and_then(|_| migration::assert_operational(&ctx))
            .and_then(|()| f(actor.as_mut(), &mut ctx));

        for message in ctx.take_outbox() {
            self.publisher.publish(key, &message);
        }
        result
    }

    fn invoke<R, F>(&self, key: &ActorKey, now: DateTime<Utc>, f: F) -> Result<R>
    where
        F: FnOnce(&mut dyn Actor, &mut ActorContext<'_>) -> Result<R>,
    {
        self.with_identity_lock(key, || self.invoke_locked(key, now, f))
    }

    /// Dispatch an inbound call.
    pub fn call(&self, key: &ActorKey, method: &str, payload: Value) -> Result<Value> {
        self.call_at(key, method, payload, Utc::now())
    }

    pub fn call_at(
        &self,
        key: &ActorKey,
        method: &str,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Result<Value> {
        tracing::debug!(actor = %key, method, "call");
        self.invoke(key, now, |actor, ctx| actor.handle_call(ctx, method, payload))
    }

    /// Open a connection channel: wakes the actor through the guard and
    /// returns its current snapshot.
    pub fn connect(&self, key: &ActorKey) -> Result<ActorStatus> {
        self.invoke(key, Utc::now(), |_, ctx| self.snapshot(ctx))
    }

    /// Deliver a raw connection-channel message.
    ///
    /// Every message is a reviewer command and must be authorized. A `token`
    /// field in the frame takes precedence over `channel_token`, the token the
    /// connection was opened with.
    pub fn deliver_message(
        &self,
        key: &ActorKey,
        text: &str,
        channel_token: Option<&str>,
    ) -> Result<()> {
        let mut message: Value = serde_json::from_str(text)
            .map_err(|e| HoldfastError::Validation(format!("message is not valid JSON: {e}")))?;
        let frame_token = match message.as_object_mut().and_then(|m| m.remove("token")) {
            Some(Value::String(token)) => Some(token),
            _ => None,
        };
        let token = frame_token
            .as_deref()
            .or(channel_token)
            .ok_or_else(|| HoldfastError::TokenInvalid("intervention token required".into()))?;
        self.intervene(key, token, message)
    }

    /// Deliver a command that carries an intervention token.
    ///
    /// The signature is checked up front; whether the token belongs to the
    /// review pending right now is checked under the identity lock.
    pub fn intervene(&self, key: &ActorKey, token: &str, command: Value) -> Result<()> {
        let now = Utc::now();
        let claims = self.verify_token(key, token, now)?;
        self.invoke(key, now, |actor, ctx| {
            review::authorize(ctx, &claims).inspect_err(|e| {
                tracing::warn!(actor = %key, error = %e, "intervention token rejected");
            })?;
            tracing::info!(actor = %key, issued_at = claims.issued_at, "intervention accepted");
            actor.handle_message(ctx, command)
        })
    }

    pub fn verify_token(
        &self,
        key: &ActorKey,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<InterventionClaims> {
        self.signer.verify(token, key, now).inspect_err(|e| {
            tracing::warn!(actor = %key, error = %e, "intervention token rejected");
        })
    }

    /// Read-only view for operators. Skips the guard so a locked actor can
    /// still be inspected.
    pub fn status(&self, key: &ActorKey) -> Result<ActorStatus> {
        let ctx = ActorContext::new(
            key,
            &self.store,
            &self.tasks,
            &self.signer,
            &self.config,
            Utc::now(),
        );
        self.snapshot(&ctx)
    }

    fn snapshot(&self, ctx: &ActorContext<'_>) -> Result<ActorStatus> {
        Ok(ActorStatus {
            actor: ctx.key().clone(),
            migration: migration::status(ctx)?,
            single_flight: single_flight::state(ctx)?,
            review: review::session(ctx)?,
            tasks: self.tasks.list_for_actor(ctx.key())?,
        })
    }

    // -----------------------------------------------------------------------
    // Scheduler
    // -----------------------------------------------------------------------

    /// Fail tasks left `running` by a previous process.
    pub fn recover(&self) -> Result<u32> {
        let max_age = Duration::from_secs(self.config.scheduler.recovery_max_age_seconds);
        let recovered = self.tasks.startup_recovery(max_age)?;
        if recovered > 0 {
            tracing::warn!(recovered, "failed tasks interrupted by restart");
        }
        Ok(recovered)
    }

    /// Fire every pending task due by `now`, oldest first.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();
        for task in self.tasks.range_due(now)? {
            match self.fire(task.id, &task.actor, now)? {
                FireOutcome::Fired => report.fired += 1,
                FireOutcome::Skipped => report.skipped += 1,
                FireOutcome::Failed => report.failed += 1,
            }
        }
        if !report.is_empty() {
            tracing::debug!(
                fired = report.fired,
                skipped = report.skipped,
                failed = report.failed,
                "tick"
            );
        }
        Ok(report)
    }

    /// Fire one task under its actor's lock.
    ///
    /// The task is re-read after the lock is taken: a cancel that won the
    /// lock first leaves it `cancelled` and it is skipped. Once marked
    /// `running` here, a cancel can no longer succeed.
    fn fire(&self, id: Uuid, actor: &ActorKey, now: DateTime<Utc>) -> Result<FireOutcome> {
        self.with_identity_lock(actor, || self.fire_locked(id, now))
    }

    fn fire_locked(&self, id: Uuid, now: DateTime<Utc>) -> Result<FireOutcome> {
        let task = match self.tasks.get(id)? {
            Some(task) if task.is_pending() => task,
            _ => return Ok(FireOutcome::Skipped),
        };
        self.tasks.set_status(id, TaskStatus::Running)?;

        let method = task.method.as_str();
        let result = self.invoke_locked(&task.actor, now, |a, ctx| {
            a.handle_task(ctx, method, task.payload.clone())
        });
        match result {
            Ok(()) => {
                self.tasks.set_status(id, TaskStatus::Completed)?;
                Ok(FireOutcome::Fired)
            }
            Err(e) => {
                tracing::warn!(task = %id, actor = %task.actor, method, error = %e, "task failed");
                self.tasks.set_status(
                    id,
                    TaskStatus::Failed {
                        reason: e.to_string(),
                    },
                )?;
                Ok(FireOutcome::Failed)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
