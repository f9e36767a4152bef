pub mod call;
pub mod init;
pub mod serve;
pub mod status;
pub mod tasks;
pub mod tick;
pub mod token;
