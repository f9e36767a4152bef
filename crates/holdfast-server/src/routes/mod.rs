pub mod actors;
pub mod connect;
pub mod intervene;
pub mod tasks;
