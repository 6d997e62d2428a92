//! brokerwatch Observability
//!
//! Prometheus metrics for the consumer orchestrator and the retention engine.
//!
//! # Usage
//!
//! ```no_run
//! use brokerwatch_observability::{exporter, metrics};
//!
//! // Register every metric with the global registry
//! metrics::init();
//!
//! // Render the text exposition format
//! let body = exporter::gather_text().unwrap();
//! ```

pub mod exporter;
pub mod metrics;

pub use metrics::{init as init_metrics, REGISTRY};

/// Initialize all observability components
pub fn init() {
    metrics::init();
}
