pub mod config;
pub mod error;
pub mod llm;
pub mod notify;
pub mod platform;
pub mod queue;
pub mod server;
pub mod shutdown;
pub mod tracker;
pub mod workflow;
pub mod workspace;
