//! brokerwatch Retention - Tiering, Purging and Usage Statistics
//!
//! Moves ingested messages out of hot storage according to scoped retention
//! policies, purges expired archives, folds hot messages into hourly usage
//! buckets and records every maintenance run as a job log.
//!
//! ## Lifecycle of a Message
//!
//! ```text
//! ┌──────────────┐  older than hot retention   ┌─────────────────┐  older than archive retention
//! │ hot_messages │ ──────── or over cap ──────► │ archived_messages│ ─────────────► purged
//! └──────┬───────┘                             └─────────────────┘
//!        │ previous hour
//!        ▼
//! ┌──────────────┐  older than stats retention
//! │ hourly_stats │ ─────────────► deleted
//! └──────────────┘
//! ```
//!
//! ## Main Components
//!
//! - **PolicyResolver**: topic → connection → global → built-in default
//! - **JobRunner**: at most one STARTED job per type, always finalized
//! - **ArchivalEngine**: retention and capacity archiving, manual archiving,
//!   reset, bookmarks, restore
//! - **PurgeEngine**: deletes archives past the global archive retention
//! - **StatsAggregator**: rebuilds hourly buckets, deletes expired ones
//! - **MaintenanceScheduler**: runs the four job types on their intervals
//!
//! Archiving and deleting are separate operations. A policy with archiving
//! disabled leaves its topic's hot rows alone; only purge and reset delete.

pub mod archival;
pub mod config;
pub mod error;
pub mod job;
pub mod purge;
pub mod resolver;
pub mod scheduler;
pub mod stats;

pub use archival::{ArchivalEngine, ResetSummary};
pub use config::MaintenanceConfig;
pub use error::{Result, RetentionError};
pub use job::{JobHandle, JobRunner};
pub use purge::PurgeEngine;
pub use resolver::{default_policy, PolicyResolver};
pub use scheduler::MaintenanceScheduler;
pub use stats::{build_hour_bucket, StatsAggregator};

pub(crate) const MINUTE_MS: i64 = 60_000;
pub(crate) const HOUR_MS: i64 = 3_600_000;
pub(crate) const DAY_MS: i64 = 86_400_000;

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
