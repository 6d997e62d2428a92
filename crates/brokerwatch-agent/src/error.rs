//! Error types for brokerwatch Agent

use thiserror::Error;

use crate::broker::BrokerError;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Orchestrator is shut down")]
    ShutDown,

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] brokerwatch_metadata::MetadataError),
}
