//! Common test utilities and helpers
//!
//! Queue options tuned for fast tests and a bounded pop helper shared by the
//! integration tests.

#![allow(dead_code)]

use disruptor::queue::api::{Consumer, ConsumerOptions, Marshaler, ProducerOptions};
use std::time::Duration;

pub const POP_TIMEOUT: Duration = Duration::from_secs(30);

pub fn producer_options(queue: &str, shards: usize) -> ProducerOptions {
    let mut options = ProducerOptions::new(queue);
    options.shard_count = shards;
    options.batch_size = 16;
    options.batch_period = Duration::from_millis(5);
    options.retry_base_delay = Duration::from_millis(1);
    options.retry_max_delay = Duration::from_millis(10);
    options
}

pub fn consumer_options(queue: &str, name: &str, shards: usize) -> ConsumerOptions {
    let mut options = ConsumerOptions::new(queue, name);
    options.shard_count = shards;
    options.prefetch_count = 8;
    options.pending_buffer_size = 64;
    options.block = Duration::from_millis(20);
    options.batch_size = 16;
    options.batch_period = Duration::from_millis(5);
    options.retry_base_delay = Duration::from_millis(1);
    options.retry_max_delay = Duration::from_millis(10);
    options
}

/// Pop into `payload`, returning `None` on timeout or a closed consumer
pub async fn pop_into<P: Marshaler>(consumer: &Consumer, payload: &mut P) -> Option<()> {
    match tokio::time::timeout(POP_TIMEOUT, consumer.pop(payload, |_| Ok(()))).await {
        Ok(Some(Ok(()))) => Some(()),
        Ok(Some(Err(e))) => panic!("pop failed: {}", e),
        Ok(None) | Err(_) => None,
    }
}
