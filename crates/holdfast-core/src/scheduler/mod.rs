//! Durable scheduler.
//!
//! Provides `ScheduledTask`, `TaskStatus`, and `TaskDb`: "invoke method M on
//! actor A with payload P no earlier than T". The host's tick loop queries
//! `TaskDb` for due tasks and dispatches each one to its actor.

pub mod db;
pub mod task;

pub use db::TaskDb;
pub use task::{ScheduledTask, TaskStatus};
