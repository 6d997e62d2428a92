//! Maintenance Configuration
//!
//! | Variable | Default |
//! |----------|---------|
//! | `BROKERWATCH_ARCHIVE_BATCH_SIZE` | 1000 |
//! | `BROKERWATCH_ARCHIVE_INTERVAL_SECS` | 3600 |
//! | `BROKERWATCH_PURGE_INTERVAL_SECS` | 86400 |
//! | `BROKERWATCH_STATS_INTERVAL_SECS` | 3600 |
//! | `BROKERWATCH_STATS_CLEANUP_INTERVAL_SECS` | 86400 |

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Hot rows moved per archive transaction
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,

    #[serde(default = "default_archive_interval_ms")]
    pub archive_interval_ms: u64,

    #[serde(default = "default_purge_interval_ms")]
    pub purge_interval_ms: u64,

    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,

    #[serde(default = "default_stats_cleanup_interval_ms")]
    pub stats_cleanup_interval_ms: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            archive_interval_ms: default_archive_interval_ms(),
            purge_interval_ms: default_purge_interval_ms(),
            stats_interval_ms: default_stats_interval_ms(),
            stats_cleanup_interval_ms: default_stats_cleanup_interval_ms(),
        }
    }
}

fn default_batch_size() -> i64 {
    1000
}

fn default_archive_interval_ms() -> u64 {
    3_600_000 // hourly
}

fn default_purge_interval_ms() -> u64 {
    86_400_000 // daily
}

fn default_stats_interval_ms() -> u64 {
    3_600_000
}

fn default_stats_cleanup_interval_ms() -> u64 {
    86_400_000
}

impl MaintenanceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |name: &str| lookup(name).and_then(|s| s.trim().parse::<u64>().ok());
        let mut config = Self::default();

        if let Some(size) = number("BROKERWATCH_ARCHIVE_BATCH_SIZE") {
            config.batch_size = size.clamp(1, i64::MAX as u64) as i64;
        }
        if let Some(secs) = number("BROKERWATCH_ARCHIVE_INTERVAL_SECS") {
            config.archive_interval_ms = secs * 1000;
        }
        if let Some(secs) = number("BROKERWATCH_PURGE_INTERVAL_SECS") {
            config.purge_interval_ms = secs * 1000;
        }
        if let Some(secs) = number("BROKERWATCH_STATS_INTERVAL_SECS") {
            config.stats_interval_ms = secs * 1000;
        }
        if let Some(secs) = number("BROKERWATCH_STATS_CLEANUP_INTERVAL_SECS") {
            config.stats_cleanup_interval_ms = secs * 1000;
        }

        config
    }

    /// Batch size, never below one.
    pub fn batch_size(&self) -> i64 {
        self.batch_size.max(1)
    }

    pub fn archive_interval(&self) -> Duration {
        Duration::from_millis(self.archive_interval_ms.max(1))
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_millis(self.purge_interval_ms.max(1))
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms.max(1))
    }

    pub fn stats_cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.stats_cleanup_interval_ms.max(1))
    }
}
