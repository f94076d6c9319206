//! Public API for the queue system
//!
//! External modules should import from here rather than directly from internal modules.
//! See module documentation for complete usage examples and architecture details.

// Producer and consumer
pub use crate::queue::consumer::Consumer;
pub use crate::queue::producer::Producer;

// Configuration
pub use crate::queue::options::{ConsumerOptions, ProducerOptions};

// Message types and payload encoding
pub use crate::queue::codec::{CodecError, Gzip, Json, Marshaler};
pub use crate::queue::message::{Message, Receipt};

// Error handling
pub use crate::queue::error::{HandlerError, QueueError, QueueResult};
pub use crate::queue::sink::ErrorSink;

// Log store contract and backends
pub use crate::store::{LogStore, MemoryLogStore};
#[cfg(feature = "redis-store")]
pub use crate::store::RedisLogStore;
