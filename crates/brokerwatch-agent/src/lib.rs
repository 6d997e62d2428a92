//! brokerwatch Agent - Consumer Lifecycle Orchestration
//!
//! Keeps one broker-consuming worker alive per monitored topic, survives
//! transient broker errors and reports throughput.
//!
//! ## Components
//!
//! - **ConsumerOrchestrator**: reconciles the monitored set against running workers
//! - **ConsumerWorker**: one task per topic, polls and hands records to the sink
//! - **WorkerRegistry**: topic id → worker entry, the only cross-task state
//! - **Error classifier**: pure mapping of broker failures to categories
//! - **ThroughputTracker**: sliding-window rates per topic
//! - **Sinks**: message persistence and monitor events
//!
//! ## Seams
//!
//! The broker wire protocol, the topic directory, message persistence and the
//! push transport are traits ([`BrokerClient`], [`TopicDirectory`],
//! [`MessageSink`], [`EventSink`]). Store-backed and broadcast-channel
//! implementations are provided; the broker client is supplied by the host.

pub mod broker;
pub mod classifier;
pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod registry;
pub mod sink;
pub mod throughput;
pub mod worker;

pub use broker::{BrokerClient, BrokerError, BrokerRecord, BrokerResult, Subscription, TopicDescription};
pub use classifier::{classify, ClassifiedError, ErrorCategory};
pub use config::OrchestratorConfig;
pub use directory::{StoreTopicDirectory, TopicDirectory};
pub use error::{AgentError, Result};
pub use events::{BroadcastEventSink, EventSink, MonitorEvent, NoopEventSink};
pub use orchestrator::{ConsumerOrchestrator, ReconcileSummary};
pub use registry::WorkerStatus;
pub use sink::{classify_message, MessageSink, StoreMessageSink};
pub use throughput::{ThroughputConfig, ThroughputTracker, TopicThroughput};
pub use worker::WorkerState;
