//! Log Store Error Types

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("log store unavailable: {message}")]
    Unavailable { message: String },

    #[error("stream does not exist: {stream}")]
    NoSuchStream { stream: String },

    #[error("consumer group '{group}' does not exist on {stream}")]
    NoSuchGroup { stream: String, group: String },

    #[error("consumer group '{group}' already exists on {stream}")]
    GroupExists { stream: String, group: String },

    #[error("unexpected log store reply: {message}")]
    Protocol { message: String },

    #[cfg(feature = "redis-store")]
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
}

impl StoreError {
    /// Whether a steady-state caller should retry the operation
    ///
    /// Connectivity problems and odd replies are worth retrying. A missing
    /// group is too, since another process may be provisioning it right now.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable { .. }
            | StoreError::NoSuchGroup { .. }
            | StoreError::Protocol { .. } => true,
            StoreError::NoSuchStream { .. } | StoreError::GroupExists { .. } => false,
            #[cfg(feature = "redis-store")]
            StoreError::Redis(_) => true,
        }
    }
}

/// Result type for log store operations
pub type StoreResult<T> = Result<T, StoreError>;
