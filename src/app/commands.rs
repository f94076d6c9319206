//! Subcommand implementations

use super::cli::config::{FileConfig, MEMORY_STORE};
use super::player::{Player, PlayerPayload};
use crate::core::error_handling::ContextualError;
use crate::core::shutdown::ShutdownCoordinator;
use crate::queue::{Consumer, ErrorSink, Producer, QueueError};
use crate::store::{EntryId, LogStore, MemoryLogStore, StoreError};
use colored::Colorize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{message}")]
    UnsupportedStore { message: String },
}

impl ContextualError for CommandError {
    fn is_user_actionable(&self) -> bool {
        match self {
            CommandError::Queue(e) => e.is_user_actionable(),
            CommandError::Store(_) => false,
            CommandError::UnsupportedStore { .. } => true,
        }
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            CommandError::Queue(e) => e.user_message(),
            CommandError::Store(_) => None,
            CommandError::UnsupportedStore { message } => Some(message),
        }
    }
}

/// Counts background errors for the end-of-run summary
#[derive(Debug, Default)]
pub struct ErrorCounter(AtomicU64);

impl ErrorCounter {
    pub fn count(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl ErrorSink for ErrorCounter {
    fn emit_error(&self, _error: &QueueError) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

/// Open the log store named by `url`
pub async fn open_store(url: &str) -> Result<Arc<dyn LogStore>, CommandError> {
    if url == MEMORY_STORE {
        return Ok(Arc::new(MemoryLogStore::new()));
    }
    #[cfg(feature = "redis-store")]
    {
        if url.starts_with("redis://") || url.starts_with("rediss://") {
            let store = crate::store::RedisLogStore::connect(url).await?;
            return Ok(Arc::new(store));
        }
    }
    Err(CommandError::UnsupportedStore {
        message: format!(
            "Unsupported log store '{}': expected \"{}\"{}",
            url,
            MEMORY_STORE,
            if cfg!(feature = "redis-store") {
                " or a redis:// URL"
            } else {
                " (rebuild with the redis-store feature for redis:// URLs)"
            }
        ),
    })
}

fn warn_if_ephemeral(url: &str, command: &str) {
    if url == MEMORY_STORE {
        log::warn!(
            "'{}' is using the in-memory store; nothing outlives this process",
            command
        );
    }
}

/// Push `count` players (0 = until shutdown), returning how many were pushed
pub async fn produce(
    config: &FileConfig,
    store: Arc<dyn LogStore>,
    count: u64,
    interval: Duration,
    shutdown: &ShutdownCoordinator,
) -> Result<u64, CommandError> {
    warn_if_ephemeral(&config.store.url, "produce");
    let producer = Producer::new(config.producer.clone(), store).await?;

    let mut pushed = 0;
    while count == 0 || pushed < count {
        let player = Player::robot(pushed + 1).into_payload();
        tokio::select! {
            biased;
            _ = shutdown.requested() => break,
            result = producer.push(&player) => result?,
        }
        pushed += 1;
        if !interval.is_zero() {
            tokio::select! {
                _ = shutdown.requested() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    producer.close().await;
    log::info!(
        "Pushed {} player(s) to queue '{}'",
        pushed,
        producer.queue_name()
    );
    Ok(pushed)
}

/// Pop and print players until shutdown (or `limit`), returning how many
/// were handled
pub async fn consume(
    config: &FileConfig,
    store: Arc<dyn LogStore>,
    limit: Option<u64>,
    shutdown: &ShutdownCoordinator,
) -> Result<u64, CommandError> {
    warn_if_ephemeral(&config.store.url, "consume");
    let consumer = Arc::new(Consumer::new(config.consumer.clone(), store).await?);

    // closing stops the readers; pop then drains the buffer and returns None
    let closer = {
        let consumer = consumer.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown.requested().await;
            consumer.close().await;
        })
    };

    let mut payload = PlayerPayload::default();
    let mut handled = 0;
    while limit.map_or(true, |limit| handled < limit) {
        let mut id = EntryId::MIN;
        let Some(result) = consumer
            .pop(&mut payload, |message| {
                id = message.id;
                Ok(())
            })
            .await
        else {
            break;
        };
        handled += 1;
        match result {
            Ok(()) => {
                let player = &payload.0 .0;
                println!("{} {} {}", id, player.user_id, player.nick_name)
            }
            Err(e) => log::warn!("Discarded message: {}", e),
        }
    }

    shutdown.trigger_shutdown();
    if let Err(e) = closer.await {
        log::error!("Consumer shutdown ended abnormally: {}", e);
    }
    log::info!(
        "Consumer '{}' handled {} message(s)",
        consumer.consumer_name(),
        handled
    );
    Ok(handled)
}

/// Outcome of a `demo` run
#[derive(Debug, Clone, PartialEq)]
pub struct DemoReport {
    pub sent: u64,
    pub received: u64,
    pub background_errors: u64,
    pub elapsed: Duration,
}

impl fmt::Display for DemoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.elapsed.as_secs_f64().max(f64::EPSILON);
        writeln!(f, "{}", "Demo complete".bold())?;
        writeln!(f, "  sent:      {}", self.sent)?;
        writeln!(f, "  received:  {}", self.received)?;
        writeln!(f, "  errors:    {}", self.background_errors)?;
        write!(
            f,
            "  elapsed:   {:.3}s ({:.0} msg/s)",
            secs,
            self.received as f64 / secs
        )
    }
}

/// Send `count` players through one producer and one consumer sharing the
/// same store
pub async fn demo(
    config: &FileConfig,
    store: Arc<dyn LogStore>,
    count: u64,
    shutdown: &ShutdownCoordinator,
) -> Result<DemoReport, CommandError> {
    let errors = Arc::new(ErrorCounter::default());
    let producer_options = config.producer.clone().with_error_sink(errors.clone());
    let mut consumer_options = config.consumer.clone().with_error_sink(errors.clone());
    consumer_options.queue_name = producer_options.queue_name.clone();
    consumer_options.shard_count = producer_options.shard_count;

    let consumer = Consumer::new(consumer_options, store.clone()).await?;
    let producer = Producer::new(producer_options, store).await?;
    let started = Instant::now();

    // read again after the joined futures are dropped
    let mut sent = 0;
    let mut received = 0;
    let pushing = async {
        for index in 0..count {
            producer.push(&Player::robot(index + 1).into_payload()).await?;
            sent += 1;
        }
        producer.close().await;
        Ok::<(), QueueError>(())
    };
    let popping = async {
        let mut payload = PlayerPayload::default();
        while received < count {
            match consumer.pop(&mut payload, |_| Ok(())).await {
                Some(Ok(())) => received += 1,
                Some(Err(e)) => log::warn!("Demo message failed: {}", e),
                None => break,
            }
        }
        Ok::<(), QueueError>(())
    };

    let outcome = tokio::select! {
        joined = async { tokio::try_join!(pushing, popping) } => Some(joined),
        _ = shutdown.requested() => None,
    };
    producer.close().await;
    consumer.close().await;

    match outcome {
        Some(joined) => {
            joined?;
        }
        None => log::warn!("Demo interrupted after {} sent, {} received", sent, received),
    }
    Ok(DemoReport {
        sent,
        received,
        background_errors: errors.count(),
        elapsed: started.elapsed(),
    })
}
