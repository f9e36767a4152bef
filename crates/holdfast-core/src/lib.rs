pub mod actor;
pub mod actors;
pub mod channel;
pub mod config;
pub mod error;
pub mod host;
pub mod io;
pub mod migration;
pub mod paths;
pub mod retry;
pub mod review;
pub mod scheduler;
pub mod single_flight;
pub mod store;
pub mod token;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::{HoldfastError, Result};
pub use host::{ActorHost, ActorStatus, TickReport};
