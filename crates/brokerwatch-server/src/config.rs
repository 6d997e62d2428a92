//! Engine Configuration
//!
//! Groups the orchestrator and maintenance settings with the host-level ones.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `BROKERWATCH_DB` | `./data/brokerwatch.db` |
//! | `BROKERWATCH_EVENT_CAPACITY` | 1024 |
//!
//! plus everything read by [`OrchestratorConfig::from_env`] and
//! [`MaintenanceConfig::from_env`].

use brokerwatch_agent::events::DEFAULT_EVENT_CAPACITY;
use brokerwatch_agent::OrchestratorConfig;
use brokerwatch_retention::MaintenanceConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Buffered monitor events per subscriber before it starts lagging
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            event_capacity: default_event_capacity(),
            orchestrator: OrchestratorConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

fn default_database_path() -> String {
    "./data/brokerwatch.db".to_string()
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_path = lookup("BROKERWATCH_DB")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(default_database_path);
        let event_capacity = lookup("BROKERWATCH_EVENT_CAPACITY")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|c| *c > 0)
            .unwrap_or_else(default_event_capacity);

        Self {
            database_path,
            event_capacity,
            orchestrator: OrchestratorConfig::from_lookup(&lookup),
            maintenance: MaintenanceConfig::from_lookup(&lookup),
        }
    }
}
