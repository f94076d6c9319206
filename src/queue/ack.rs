//! Acknowledgment pipeline
//!
//! Receipts scheduled by `pop` and by the shard readers are grouped per
//! shard. A shard whose group reaches the batch size is flushed right away;
//! otherwise everything accumulated is flushed once the period has passed
//! with nothing new waiting. Each flush acks and deletes its ids in one store
//! call, in its own task.

use crate::core::retry::{retry_async, RetryPolicy};
use crate::queue::client::ShardClient;
use crate::queue::error::QueueError;
use crate::queue::message::Receipt;
use crate::queue::sink::Reporter;
use crate::store::{EntryId, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

pub(crate) struct AckPipeline {
    client: Arc<ShardClient>,
    receiver: mpsc::Receiver<Receipt>,
    batch_size: usize,
    period: Duration,
    retry: RetryPolicy,
    reporter: Reporter,
    pending: Vec<Vec<EntryId>>,
    in_flight: JoinSet<()>,
}

impl AckPipeline {
    pub(crate) fn new(
        client: Arc<ShardClient>,
        receiver: mpsc::Receiver<Receipt>,
        batch_size: usize,
        period: Duration,
        retry: RetryPolicy,
        reporter: Reporter,
    ) -> Self {
        let pending = vec![Vec::new(); client.shard_count()];
        Self {
            client,
            receiver,
            batch_size,
            period,
            retry,
            reporter,
            pending,
            in_flight: JoinSet::new(),
        }
    }

    /// Runs until the receipt channel is closed and drained, then flushes
    /// the remainder and waits for every ack batch
    pub(crate) async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_flush = Instant::now();

        loop {
            let received = tokio::select! {
                received = self.receiver.recv() => match received {
                    Some(receipt) => Some(Some(receipt)),
                    None => None,
                },
                _ = ticker.tick() => Some(None),
            };
            self.reap();

            match received {
                None => break,
                Some(Some(receipt)) => {
                    if self.accumulate(receipt) {
                        self.flush_shard(receipt.shard);
                        continue;
                    }
                }
                Some(None) => {}
            }

            if last_flush.elapsed() >= self.period && self.receiver.is_empty() {
                self.flush_all();
                last_flush = Instant::now();
            }
        }

        self.flush_all();
        while let Some(joined) = self.in_flight.join_next().await {
            if let Err(e) = joined {
                log::error!("Ack task ended abnormally: {}", e);
            }
        }
        log::debug!(
            "Ack pipeline for queue '{}' drained",
            self.client.queue_name()
        );
    }

    /// Returns true when the receipt's shard reached the batch size
    fn accumulate(&mut self, receipt: Receipt) -> bool {
        match self.pending.get_mut(receipt.shard) {
            Some(ids) => {
                ids.push(receipt.id);
                ids.len() >= self.batch_size
            }
            None => {
                log::error!(
                    "Dropping acknowledgment {} for unknown shard {}",
                    receipt.id,
                    receipt.shard
                );
                false
            }
        }
    }

    fn reap(&mut self) {
        while let Some(joined) = self.in_flight.try_join_next() {
            if let Err(e) = joined {
                log::error!("Ack task ended abnormally: {}", e);
            }
        }
    }

    fn flush_all(&mut self) {
        for shard in 0..self.pending.len() {
            self.flush_shard(shard);
        }
    }

    fn flush_shard(&mut self, shard: usize) {
        let ids = std::mem::take(&mut self.pending[shard]);
        if ids.is_empty() {
            return;
        }
        let client = self.client.clone();
        let retry = self.retry.clone();
        let reporter = self.reporter.clone();
        self.in_flight.spawn(async move {
            acknowledge(&client, shard, ids, &retry, &reporter).await;
        });
    }
}

async fn acknowledge(
    client: &ShardClient,
    shard: usize,
    ids: Vec<EntryId>,
    retry: &RetryPolicy,
    reporter: &Reporter,
) {
    let stream = client.stream_name(shard);
    let group = client.group_name();
    let result = retry_async(
        "ack_and_delete",
        retry,
        StoreError::is_transient,
        |error, attempt| {
            if error.is_transient() {
                reporter.warn(QueueError::TransientStore {
                    operation: "ack",
                    stream: stream.to_string(),
                    attempt: attempt + 1,
                    message: error.to_string(),
                });
            }
        },
        || client.store().ack_and_delete(stream, group, &ids),
    )
    .await;

    match result {
        Ok(acked) => log::debug!(
            "Acknowledged {}/{} entries on {}",
            acked,
            ids.len(),
            stream
        ),
        Err(e) => reporter.error(QueueError::Store {
            operation: "ack",
            stream: stream.to_string(),
            message: format!("{} ({} entries stay pending)", e, ids.len()),
        }),
    }
}
