//! Orchestrator, configuration, and wiring for the refit assistant.

pub mod agent;
pub mod bootstrap;
pub mod config;

pub use agent::Orchestrator;
pub use agent::error::AgentError;
pub use config::Config;
