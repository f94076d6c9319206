//! Test modules for the queue system
//!
//! Tests are organized by functional area. Timing-sensitive tests run on a
//! paused clock so batching periods and read timeouts are deterministic.


use crate::queue::{Consumer, ConsumerOptions, ErrorSink, ProducerOptions, QueueError};
use std::sync::Mutex;
use std::time::Duration;

/// Error sink that remembers every notification
#[derive(Default)]
pub(super) struct RecordingSink {
    errors: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub(super) fn count_containing(&self, needle: &str) -> usize {
        self.errors
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.contains(needle))
            .count()
    }

    pub(super) fn len(&self) -> usize {
        self.errors.lock().unwrap().len()
    }
}

impl ErrorSink for RecordingSink {
    fn emit_error(&self, error: &QueueError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

pub(super) fn producer_options(queue: &str, shards: usize) -> ProducerOptions {
    let mut options = ProducerOptions::new(queue);
    options.shard_count = shards;
    options.pending_buffer_size = 1_000;
    options.batch_size = 10;
    options.batch_period = Duration::from_millis(10);
    options.retry_base_delay = Duration::from_millis(1);
    options.retry_max_delay = Duration::from_millis(5);
    options
}

pub(super) fn consumer_options(queue: &str, name: &str, shards: usize) -> ConsumerOptions {
    let mut options = ConsumerOptions::new(queue, name);
    options.shard_count = shards;
    options.prefetch_count = 10;
    options.block = Duration::from_millis(20);
    options.pending_buffer_size = 100;
    options.batch_size = 10;
    options.batch_period = Duration::from_millis(10);
    options.retry_base_delay = Duration::from_millis(1);
    options.retry_max_delay = Duration::from_millis(5);
    options
}

/// Pop one message as a string, failing the test if none arrives in time
pub(super) async fn pop_string(consumer: &Consumer) -> String {
    let mut payload = String::new();
    tokio::time::timeout(Duration::from_secs(30), consumer.pop(&mut payload, |_| Ok(())))
        .await
        .expect("pop timed out")
        .expect("consumer closed")
        .expect("pop failed");
    payload
}

/// Poll until `condition` holds, failing the test after a generous deadline
pub(super) async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
