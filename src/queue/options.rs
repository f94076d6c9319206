//! Producer and consumer configuration
//!
//! Both records deserialize from TOML with every field optional; missing
//! fields take the defaults below. Durations are written in milliseconds
//! (`batch_period_ms = 100`). `validate` runs once, when the producer or
//! consumer is constructed.

use crate::core::retry::RetryPolicy;
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::sink::ErrorSink;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Highest shard count a queue may be configured with
pub const MAX_SHARDS: usize = 255;

pub const DEFAULT_QUEUE_NAME: &str = "push_stream";
pub const DEFAULT_SHARD_COUNT: usize = 10;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_BATCH_PERIOD: Duration = Duration::from_millis(100);
pub const DEFAULT_PRODUCER_BUFFER: usize = 50_000;
pub const DEFAULT_CONSUMER_BUFFER: usize = 1_000;
pub const DEFAULT_PREFETCH_COUNT: usize = 100;
pub const DEFAULT_BLOCK: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProducerOptions {
    pub queue_name: String,
    pub shard_count: usize,
    /// Capacity of the local outbound buffer; `push` waits when it is full
    pub pending_buffer_size: usize,
    /// Payloads per append batch
    pub batch_size: usize,
    #[serde(rename = "batch_period_ms", deserialize_with = "millis")]
    pub batch_period: Duration,
    #[serde(rename = "retry_base_delay_ms", deserialize_with = "millis")]
    pub retry_base_delay: Duration,
    #[serde(rename = "retry_max_delay_ms", deserialize_with = "millis")]
    pub retry_max_delay: Duration,
    #[serde(skip)]
    pub error_sink: Option<Arc<dyn ErrorSink>>,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            shard_count: DEFAULT_SHARD_COUNT,
            pending_buffer_size: DEFAULT_PRODUCER_BUFFER,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_period: DEFAULT_BATCH_PERIOD,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
            error_sink: None,
        }
    }
}

impl fmt::Debug for ProducerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerOptions")
            .field("queue_name", &self.queue_name)
            .field("shard_count", &self.shard_count)
            .field("pending_buffer_size", &self.pending_buffer_size)
            .field("batch_size", &self.batch_size)
            .field("batch_period", &self.batch_period)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("retry_max_delay", &self.retry_max_delay)
            .field("error_sink", &self.error_sink.is_some())
            .finish()
    }
}

impl ProducerOptions {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            ..Self::default()
        }
    }

    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = Some(sink);
        self
    }

    /// Check the record; the producer only ever sees validated options
    pub fn validate(self) -> QueueResult<Self> {
        check_queue(&self.queue_name, self.shard_count)?;
        check_nonzero("pending_buffer_size", self.pending_buffer_size)?;
        check_nonzero("batch_size", self.batch_size)?;
        check_period("batch_period_ms", self.batch_period)?;
        check_retry(self.retry_base_delay, self.retry_max_delay)?;
        Ok(self)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::unbounded(self.retry_base_delay, self.retry_max_delay)
    }
}

#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsumerOptions {
    pub queue_name: String,
    /// Consumer identity within the group; backlog is tracked per name
    pub consumer_name: String,
    pub shard_count: usize,
    /// Entries requested per store read
    pub prefetch_count: usize,
    /// How long a live read waits for new entries
    #[serde(rename = "block_ms", deserialize_with = "millis")]
    pub block: Duration,
    /// Capacity of the delivery buffer and of the ack buffer
    pub pending_buffer_size: usize,
    /// Acknowledgments per ack batch
    pub batch_size: usize,
    #[serde(rename = "batch_period_ms", deserialize_with = "millis")]
    pub batch_period: Duration,
    #[serde(rename = "retry_base_delay_ms", deserialize_with = "millis")]
    pub retry_base_delay: Duration,
    #[serde(rename = "retry_max_delay_ms", deserialize_with = "millis")]
    pub retry_max_delay: Duration,
    #[serde(skip)]
    pub error_sink: Option<Arc<dyn ErrorSink>>,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            consumer_name: default_consumer_name(),
            shard_count: DEFAULT_SHARD_COUNT,
            prefetch_count: DEFAULT_PREFETCH_COUNT,
            block: DEFAULT_BLOCK,
            pending_buffer_size: DEFAULT_CONSUMER_BUFFER,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_period: DEFAULT_BATCH_PERIOD,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
            error_sink: None,
        }
    }
}

impl fmt::Debug for ConsumerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerOptions")
            .field("queue_name", &self.queue_name)
            .field("consumer_name", &self.consumer_name)
            .field("shard_count", &self.shard_count)
            .field("prefetch_count", &self.prefetch_count)
            .field("block", &self.block)
            .field("pending_buffer_size", &self.pending_buffer_size)
            .field("batch_size", &self.batch_size)
            .field("batch_period", &self.batch_period)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("retry_max_delay", &self.retry_max_delay)
            .field("error_sink", &self.error_sink.is_some())
            .finish()
    }
}

impl ConsumerOptions {
    pub fn new(queue_name: impl Into<String>, consumer_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            consumer_name: consumer_name.into(),
            ..Self::default()
        }
    }

    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = Some(sink);
        self
    }

    /// Check the record; the consumer only ever sees validated options
    pub fn validate(self) -> QueueResult<Self> {
        check_queue(&self.queue_name, self.shard_count)?;
        if self.consumer_name.trim().is_empty() {
            return Err(config_error("consumer_name must not be empty"));
        }
        check_nonzero("prefetch_count", self.prefetch_count)?;
        check_nonzero("pending_buffer_size", self.pending_buffer_size)?;
        check_nonzero("batch_size", self.batch_size)?;
        check_period("block_ms", self.block)?;
        check_period("batch_period_ms", self.batch_period)?;
        check_retry(self.retry_base_delay, self.retry_max_delay)?;

        let in_flight = self.shard_count.saturating_mul(self.prefetch_count);
        if self.pending_buffer_size < in_flight {
            log::warn!(
                "Consumer '{}' delivery buffer ({}) is smaller than shard_count x prefetch_count ({}); shard readers may stall each other",
                self.consumer_name,
                self.pending_buffer_size,
                in_flight
            );
        }
        Ok(self)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::unbounded(self.retry_base_delay, self.retry_max_delay)
    }
}

/// `<hostname>-<pid>`, stable for the life of the process
fn default_consumer_name() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "consumer".to_string());
    format!("{}-{}", host, std::process::id())
}

fn config_error(message: impl Into<String>) -> QueueError {
    QueueError::Config {
        message: message.into(),
    }
}

fn check_queue(queue_name: &str, shard_count: usize) -> QueueResult<()> {
    if queue_name.trim().is_empty() {
        return Err(config_error("queue_name must not be empty"));
    }
    if shard_count == 0 || shard_count > MAX_SHARDS {
        return Err(config_error(format!(
            "shard_count must be between 1 and {}, got {}",
            MAX_SHARDS, shard_count
        )));
    }
    Ok(())
}

fn check_nonzero(name: &str, value: usize) -> QueueResult<()> {
    if value == 0 {
        return Err(config_error(format!("{} must be at least 1", name)));
    }
    Ok(())
}

fn check_period(name: &str, value: Duration) -> QueueResult<()> {
    if value.is_zero() {
        return Err(config_error(format!("{} must be greater than zero", name)));
    }
    Ok(())
}

fn check_retry(base: Duration, max: Duration) -> QueueResult<()> {
    check_period("retry_base_delay_ms", base)?;
    if max < base {
        return Err(config_error(format!(
            "retry_max_delay_ms ({}) must not be below retry_base_delay_ms ({})",
            max.as_millis(),
            base.as_millis()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_defaults() {
        let options = ProducerOptions::default().validate().unwrap();

        assert_eq!(options.queue_name, "push_stream");
        assert_eq!(options.shard_count, 10);
        assert_eq!(options.pending_buffer_size, 50_000);
        assert_eq!(options.batch_size, 100);
        assert_eq!(options.batch_period, Duration::from_millis(100));
    }

    #[test]
    fn test_consumer_defaults() {
        let options = ConsumerOptions::new("orders", "worker-1").validate().unwrap();

        assert_eq!(options.prefetch_count, 100);
        assert_eq!(options.pending_buffer_size, 1_000);
        assert_eq!(options.block, Duration::from_secs(1));
        assert_eq!(options.consumer_name, "worker-1");
    }

    #[test]
    fn test_rejects_bad_shard_counts() {
        for shards in [0, MAX_SHARDS + 1] {
            let mut options = ProducerOptions::new("orders");
            options.shard_count = shards;
            let err = options.validate().unwrap_err();
            assert!(err.to_string().contains("shard_count"), "{}", err);
        }
    }

    #[test]
    fn test_rejects_empty_names() {
        assert!(ProducerOptions::new("  ").validate().is_err());
        assert!(ConsumerOptions::new("orders", "").validate().is_err());
    }

    #[test]
    fn test_rejects_zero_capacities_and_periods() {
        let mut producer = ProducerOptions::new("orders");
        producer.batch_size = 0;
        assert!(producer.validate().is_err());

        let mut producer = ProducerOptions::new("orders");
        producer.batch_period = Duration::ZERO;
        assert!(producer.validate().is_err());

        let mut consumer = ConsumerOptions::new("orders", "c");
        consumer.prefetch_count = 0;
        assert!(consumer.validate().is_err());

        let mut consumer = ConsumerOptions::new("orders", "c");
        consumer.block = Duration::ZERO;
        assert!(consumer.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_retry_bounds() {
        let mut options = ProducerOptions::new("orders");
        options.retry_base_delay = Duration::from_secs(5);
        options.retry_max_delay = Duration::from_secs(1);

        assert!(matches!(options.validate(), Err(QueueError::Config { .. })));
    }

    #[test]
    fn test_small_delivery_buffer_is_only_a_warning() {
        let mut options = ConsumerOptions::new("orders", "c");
        options.shard_count = 4;
        options.prefetch_count = 10;
        options.pending_buffer_size = 5;

        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_huge_prefetch_count_does_not_overflow() {
        let options: ConsumerOptions = toml::from_str(&format!(
            "consumer_name = \"c\"\nshard_count = 255\nprefetch_count = {}\n",
            i64::MAX
        ))
        .unwrap();

        let options = options.validate().unwrap();
        assert_eq!(options.prefetch_count, i64::MAX as usize);
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let options: ConsumerOptions = toml::from_str(
            r#"
            queue_name = "orders"
            shard_count = 3
            block_ms = 250
            batch_period_ms = 20
            "#,
        )
        .unwrap();

        assert_eq!(options.queue_name, "orders");
        assert_eq!(options.shard_count, 3);
        assert_eq!(options.block, Duration::from_millis(250));
        assert_eq!(options.batch_period, Duration::from_millis(20));
        assert_eq!(options.prefetch_count, DEFAULT_PREFETCH_COUNT);
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let parsed: Result<ProducerOptions, _> = toml::from_str("batch_sise = 5");
        assert!(parsed.is_err());
    }
}
