//! Error types for interview-queue operations.
//!
//! Defines the error taxonomy shared by the queue subsystems:
//! - Log store transport and consumer-group failures
//! - Envelope wire decoding
//! - Enqueue failures surfaced to callers
//! - Downstream collaborator and push-delivery failures
//! - Per-message processing failures caught at the dispatch boundary

use thiserror::Error;

/// Errors raised by a log store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Log store connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Consumer group '{group}' does not exist on stream '{stream}'")]
    NoGroup { stream: String, group: String },

    #[error("Invalid record id '{0}'")]
    InvalidRecordId(String),

    #[error("Unexpected reply from log store: {0}")]
    UnexpectedReply(String),
}

impl StoreError {
    /// Returns whether the error reports a missing consumer group.
    pub fn is_missing_group(&self) -> bool {
        match self {
            StoreError::NoGroup { .. } => true,
            StoreError::Redis(e) => e.code() == Some("NOGROUP"),
            _ => false,
        }
    }
}

/// Errors that occur while decoding an envelope from stream record fields.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Missing envelope field '{0}'")]
    MissingField(&'static str),

    #[error("Invalid priority '{0}': must be 'high', 'medium' or 'low'")]
    InvalidPriority(String),

    #[error("Invalid retry count '{0}'")]
    InvalidRetryCount(String),

    #[error("Invalid message id '{0}'")]
    InvalidMessageId(String),

    #[error("Invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("Payload is not a JSON object: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Errors surfaced synchronously by the enqueuers.
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("Failed to append to stream '{stream}': {source}")]
    Transport {
        stream: String,
        #[source]
        source: StoreError,
    },

    #[error("Failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned by downstream collaborators (chat, session, embedding).
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{service} call failed: {message}")]
    Failed {
        service: &'static str,
        message: String,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
}

impl CollaboratorError {
    pub fn failed(service: &'static str, message: impl Into<String>) -> Self {
        CollaboratorError::Failed {
            service,
            message: message.into(),
        }
    }
}

/// Errors returned by the push-delivery primitive.
///
/// An absent live connection is not an error; the channel reports it by
/// returning `Ok(false)`.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("Push to '{key}' failed: {message}")]
    SendFailed { key: String, message: String },

    #[error("Failed to encode push message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors raised while processing a single message.
///
/// These are caught at the per-message dispatch boundary and never escape a
/// polling loop.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Missing or invalid field '{field}' for topic '{topic}'")]
    Validation { topic: String, field: &'static str },

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Unknown topic '{0}'")]
    UnknownTopic(String),

    #[error("Unknown embedding request type '{0}'")]
    UnknownEmbeddingType(String),

    #[error("Malformed envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("Push delivery error: {0}")]
    Push(#[from] PushError),

    #[error("Enqueue error: {0}")]
    Enqueue(#[from] EnqueueError),
}

impl ProcessingError {
    /// Returns whether the message can never be routed and should be
    /// acknowledged immediately instead of retried.
    pub fn is_unroutable(&self) -> bool {
        matches!(
            self,
            ProcessingError::UnknownTopic(_)
                | ProcessingError::UnknownEmbeddingType(_)
                | ProcessingError::Envelope(_)
        )
    }

    pub(crate) fn validation(topic: impl Into<String>, field: &'static str) -> Self {
        ProcessingError::Validation {
            topic: topic.into(),
            field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unroutable_classification() {
        assert!(ProcessingError::UnknownTopic("x".into()).is_unroutable());
        assert!(ProcessingError::UnknownEmbeddingType("x".into()).is_unroutable());
        assert!(ProcessingError::Envelope(EnvelopeError::MissingField("topic")).is_unroutable());
        assert!(!ProcessingError::validation("ai.final_evaluation", "sessionId").is_unroutable());
        assert!(!ProcessingError::Collaborator(CollaboratorError::failed("chat", "boom"))
            .is_unroutable());
    }

    #[test]
    fn test_missing_group_detection() {
        let err = StoreError::NoGroup {
            stream: "ai:requests".into(),
            group: "g".into(),
        };
        assert!(err.is_missing_group());
        assert!(!StoreError::ConnectionFailed("down".into()).is_missing_group());
    }

    #[test]
    fn test_error_display() {
        let err = ProcessingError::validation("ai.question_generation", "questionId");
        assert!(err.to_string().contains("questionId"));

        let err = CollaboratorError::NotFound {
            entity: "question",
            id: 7,
        };
        assert_eq!(err.to_string(), "question 7 not found");
    }
}
