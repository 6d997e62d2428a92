//! brokerwatch Server
//!
//! Hosts both brokerwatch cores in one process: the consumer orchestrator
//! from `brokerwatch-agent` and the maintenance scheduler from
//! `brokerwatch-retention`, sharing one SQLite metadata store.
//!
//! The `brokerwatch` binary runs an [`Engine`] configured from the
//! environment until Ctrl+C. Applications that link a broker client build
//! the engine themselves and pass the client to [`Engine::new`].

pub mod config;
pub mod engine;
pub mod error;

pub use config::EngineConfig;
pub use engine::{Engine, HealthSnapshot};
pub use error::{EngineError, Result};
