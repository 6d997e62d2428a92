//! Error types for the brokerwatch engine host

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Metadata error: {0}")]
    Metadata(#[from] brokerwatch_metadata::MetadataError),

    #[error("Retention error: {0}")]
    Retention(#[from] brokerwatch_retention::RetentionError),

    #[error("Agent error: {0}")]
    Agent(#[from] brokerwatch_agent::AgentError),

    #[error("Metrics error: {0}")]
    Metrics(String),
}
