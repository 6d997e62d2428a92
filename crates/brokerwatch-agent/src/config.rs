//! Orchestrator Configuration
//!
//! Durations are stored as integer milliseconds so the struct deserializes
//! from plain config files. Environment variables use seconds, except the
//! poll timeout.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `BROKERWATCH_RECONCILE_INTERVAL_SECS` | 10 |
//! | `BROKERWATCH_METRICS_INTERVAL_SECS` | 5 |
//! | `BROKERWATCH_POLL_TIMEOUT_MS` | 1000 |
//! | `BROKERWATCH_ERROR_BACKOFF_SECS` | 5 |
//! | `BROKERWATCH_MAX_CONSECUTIVE_ERRORS` | 5 |
//! | `BROKERWATCH_GROUP_PREFIX` | `brokerwatch` |

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::classifier::DEFAULT_MAX_MESSAGE_LEN;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// How often the monitored set is reconciled against running workers
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,

    /// How often throughput snapshots are broadcast
    #[serde(default = "default_metrics_interval_ms")]
    pub metrics_interval_ms: u64,

    /// Upper bound of a single poll
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Sleep after a failed iteration
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,

    /// Consecutive iteration failures after which a worker exits
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// Cap on logged broker error messages
    #[serde(default = "default_max_error_message_len")]
    pub max_error_message_len: usize,

    /// Consumer groups are named `<prefix>-<topic id>`
    #[serde(default = "default_group_prefix")]
    pub group_prefix: String,

    /// Sliding window of the throughput tracker
    #[serde(default = "default_throughput_window_ms")]
    pub throughput_window_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_ms: default_reconcile_interval_ms(),
            metrics_interval_ms: default_metrics_interval_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            max_consecutive_errors: default_max_consecutive_errors(),
            max_error_message_len: default_max_error_message_len(),
            group_prefix: default_group_prefix(),
            throughput_window_ms: default_throughput_window_ms(),
        }
    }
}

fn default_reconcile_interval_ms() -> u64 {
    10_000
}

fn default_metrics_interval_ms() -> u64 {
    5_000
}

fn default_poll_timeout_ms() -> u64 {
    1_000
}

fn default_error_backoff_ms() -> u64 {
    5_000
}

fn default_max_consecutive_errors() -> u32 {
    5
}

fn default_max_error_message_len() -> usize {
    DEFAULT_MAX_MESSAGE_LEN
}

fn default_group_prefix() -> String {
    "brokerwatch".to_string()
}

fn default_throughput_window_ms() -> u64 {
    60_000
}

impl OrchestratorConfig {
    /// Defaults overridden by `BROKERWATCH_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns. Unparseable values
    /// are ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |name: &str| lookup(name).and_then(|s| s.trim().parse::<u64>().ok());
        let mut config = Self::default();

        if let Some(secs) = number("BROKERWATCH_RECONCILE_INTERVAL_SECS") {
            config.reconcile_interval_ms = secs * 1000;
        }
        if let Some(secs) = number("BROKERWATCH_METRICS_INTERVAL_SECS") {
            config.metrics_interval_ms = secs * 1000;
        }
        if let Some(ms) = number("BROKERWATCH_POLL_TIMEOUT_MS") {
            config.poll_timeout_ms = ms;
        }
        if let Some(secs) = number("BROKERWATCH_ERROR_BACKOFF_SECS") {
            config.error_backoff_ms = secs * 1000;
        }
        if let Some(max) = number("BROKERWATCH_MAX_CONSECUTIVE_ERRORS") {
            config.max_consecutive_errors = max.clamp(1, u32::MAX as u64) as u32;
        }
        if let Some(prefix) = lookup("BROKERWATCH_GROUP_PREFIX") {
            let prefix = prefix.trim();
            if !prefix.is_empty() {
                config.group_prefix = prefix.to_string();
            }
        }

        config
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms.max(1))
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms.max(1))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn throughput_window(&self) -> Duration {
        Duration::from_millis(self.throughput_window_ms)
    }

    /// Consumer group used for a topic's subscription.
    pub fn group_id(&self, topic_id: i64) -> String {
        format!("{}-{}", self.group_prefix, topic_id)
    }
}
