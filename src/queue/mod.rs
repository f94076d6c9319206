//! Sharded at-least-once queue
//!
//! A producer/consumer pair layered on a [`LogStore`](crate::store::LogStore):
//! an append-only log split into shard streams and read through a consumer
//! group. Both sides buffer locally and talk to the store in batches.
//!
//! # Overview
//!
//! - **Producer**: `push` encodes and enqueues; a batcher cuts batches by size
//!   or by time and appends each to the next shard, round-robin
//! - **Consumer**: one reader per shard replays its own unacknowledged
//!   backlog, then follows new entries; `pop` hands them out one at a time
//! - **Acknowledgment**: batched per shard; an ack also deletes the entry
//! - **Retry**: every steady-state store call is retried until it succeeds,
//!   with full-jitter exponential backoff; each failure is logged and sent to
//!   the optional [`ErrorSink`]
//!
//! # Architecture
//!
//! ```text
//!  push ──► [outbound buffer] ──► batcher ──► append ──► shard 0 .. n-1
//!                                                            │
//!  pop ◄── [delivery buffer] ◄── reader per shard ◄──────────┘
//!   │                                                        ▲
//!   └────► [ack buffer] ──► ack pipeline ──► ack + delete ───┘
//! ```
//!
//! # Delivery guarantees
//!
//! Delivery is at-least-once. Within one shard entries are delivered in the
//! order they were appended; across shards there is no ordering at all.
//!
//! A message is acknowledged because it was **delivered**, not because it
//! was processed. `pop` schedules the ack before decoding, so a decode or
//! handler failure still removes the entry. Callers that need redelivery on
//! failure must requeue the payload themselves.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use disruptor::queue::{Consumer, ConsumerOptions, Json, Producer, ProducerOptions};
//! use disruptor::store::MemoryLogStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryLogStore::new());
//!
//! let producer = Producer::new(ProducerOptions::new("orders"), store.clone()).await?;
//! producer.push(&Json(vec!["widget".to_string()])).await?;
//! producer.close().await;
//!
//! let consumer = Consumer::new(ConsumerOptions::new("orders", "worker-1"), store).await?;
//! let mut order: Json<Vec<String>> = Json::default();
//! if let Some(result) = consumer.pop(&mut order, |message| {
//!     println!("{} from shard {}", message.id, message.shard);
//!     Ok(())
//! }).await {
//!     result?;
//! }
//! consumer.close().await;
//! # Ok(())
//! # }
//! ```

mod ack;
pub mod api;
pub mod client;
pub mod codec;
mod consumer;
pub mod error;
mod message;
pub mod options;
mod producer;
mod reader;
pub mod sink;

pub use client::{group_name, stream_name, ShardClient, DATA_FIELD};
pub use codec::{CodecError, Gzip, Json, Marshaler};
pub use consumer::Consumer;
pub use error::{HandlerError, QueueError, QueueResult};
pub use message::{Message, Receipt};
pub use options::{ConsumerOptions, ProducerOptions, MAX_SHARDS};
pub use producer::Producer;
pub use sink::ErrorSink;

#[cfg(test)]
mod tests;
