//! Queue Error Types

use crate::queue::codec::CodecError;
use crate::store::EntryId;

/// Error returned by a caller's message handler
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// A shard could not be provisioned; the producer/consumer was not created
    #[error("Failed to provision shard {stream}: {reason}")]
    Provisioning { stream: String, reason: String },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// A store call failed and will be retried
    #[error("{operation} on {stream} failed (attempt {attempt}): {message}")]
    TransientStore {
        operation: &'static str,
        stream: String,
        attempt: usize,
        message: String,
    },

    /// A store call failed in a way retrying cannot fix; the work was dropped
    #[error("{operation} on {stream} failed permanently: {message}")]
    Store {
        operation: &'static str,
        stream: String,
        message: String,
    },

    #[error("Incorrect message format: no \"{field}\" field in message with id {id} on {stream}")]
    MalformedEntry {
        stream: String,
        id: EntryId,
        field: &'static str,
    },

    #[error("Queue is closed")]
    Closed,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Handler failed for message {id}: {source}")]
    Handler {
        id: EntryId,
        #[source]
        source: HandlerError,
    },
}

impl crate::core::error_handling::ContextualError for QueueError {
    fn is_user_actionable(&self) -> bool {
        matches!(self, QueueError::Config { .. })
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            QueueError::Config { message } => Some(message),
            _ => None,
        }
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error_handling::ContextualError;

    #[test]
    fn test_malformed_entry_message() {
        let err = QueueError::MalformedEntry {
            stream: "disruptor:orders:{1}".to_string(),
            id: EntryId::new(17, 3),
            field: "data",
        };

        assert_eq!(
            err.to_string(),
            "Incorrect message format: no \"data\" field in message with id 17-3 on disruptor:orders:{1}"
        );
    }

    #[test]
    fn test_only_config_errors_are_user_actionable() {
        let config = QueueError::Config {
            message: "shard_count must be at least 1".to_string(),
        };
        assert!(config.is_user_actionable());
        assert_eq!(config.user_message(), Some("shard_count must be at least 1"));

        let provisioning = QueueError::Provisioning {
            stream: "s".to_string(),
            reason: "connection refused".to_string(),
        };
        assert!(!provisioning.is_user_actionable());
        assert_eq!(provisioning.user_message(), None);
    }
}
