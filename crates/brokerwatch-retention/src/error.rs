//! Error types for brokerwatch Retention
//!
//! Operational failures inside a job never surface here: they finalize the
//! job log as FAILED instead. These errors are for usage mistakes (unknown
//! ids) and for storage failures outside a job.

use brokerwatch_metadata::MetadataError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RetentionError>;

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("Topic not found: {0}")]
    TopicNotFound(i64),

    #[error("Message not found: {0}")]
    MessageNotFound(i64),

    #[error("Metadata error: {0}")]
    Metadata(MetadataError),
}

impl From<MetadataError> for RetentionError {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::TopicNotFound(id) => RetentionError::TopicNotFound(id),
            MetadataError::MessageNotFound(id) => RetentionError::MessageNotFound(id),
            other => RetentionError::Metadata(other),
        }
    }
}
