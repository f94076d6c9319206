//! Batching producer
//!
//! `push` encodes a payload and places it on a bounded local buffer. A single
//! batcher task drains the buffer into batches and ships each full (or
//! period-expired) batch to the next shard in round-robin order. Appends run
//! as their own tasks so a slow store call never stalls batching; appends to
//! the same shard are still applied in the order their batches were cut.

use crate::core::retry::{retry_async, RetryPolicy};
use crate::core::shutdown::ShutdownCoordinator;
use crate::queue::client::{ShardClient, DATA_FIELD};
use crate::queue::codec::Marshaler;
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::options::ProducerOptions;
use crate::queue::sink::Reporter;
use crate::store::{LogStore, StoreError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

pub struct Producer {
    client: Arc<ShardClient>,
    sender: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    shutdown: ShutdownCoordinator,
    batcher: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Producer {
    /// Validate `options`, provision every shard and start the batcher
    pub async fn new(options: ProducerOptions, store: Arc<dyn LogStore>) -> QueueResult<Self> {
        let options = options.validate()?;
        let client =
            Arc::new(ShardClient::connect(&options.queue_name, options.shard_count, store).await?);

        let (sender, receiver) = mpsc::channel(options.pending_buffer_size);
        let batcher = Batcher {
            client: client.clone(),
            receiver,
            batch_size: options.batch_size,
            period: options.batch_period,
            retry: options.retry_policy(),
            reporter: Reporter::new(options.error_sink.clone()),
            next_shard: 0,
            shard_tails: (0..options.shard_count).map(|_| None).collect(),
            in_flight: JoinSet::new(),
        };
        let handle = tokio::spawn(batcher.run());

        log::info!(
            "Producer started for queue '{}' over {} shard(s)",
            options.queue_name,
            options.shard_count
        );
        Ok(Self {
            client,
            sender: Mutex::new(Some(sender)),
            shutdown: ShutdownCoordinator::new(),
            batcher: tokio::sync::Mutex::new(Some(handle)),
        })
    }

    /// Encode `payload` and enqueue it for the next batch
    ///
    /// Waits while the local buffer is full. Fails with [`QueueError::Closed`]
    /// once `close` has begun, and with [`QueueError::Codec`] when encoding
    /// fails (nothing is enqueued then).
    pub async fn push<P: Marshaler + ?Sized>(&self, payload: &P) -> QueueResult<()> {
        let bytes = payload.marshal()?;
        if self.shutdown.is_shutdown_requested() {
            return Err(QueueError::Closed);
        }
        let sender = self
            .sender
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or(QueueError::Closed)?;

        tokio::select! {
            biased;
            _ = self.shutdown.requested() => Err(QueueError::Closed),
            sent = sender.send(bytes) => sent.map_err(|_| QueueError::Closed),
        }
    }

    /// Stop accepting payloads, flush what is buffered and wait until every
    /// append has finished
    ///
    /// Calling it again waits for the first call to finish and returns.
    pub async fn close(&self) {
        let mut batcher = self.batcher.lock().await;
        let Some(handle) = batcher.take() else {
            return;
        };

        self.shutdown.trigger_shutdown();
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        if let Err(e) = handle.await {
            log::error!(
                "Batcher for queue '{}' ended abnormally: {}",
                self.client.queue_name(),
                e
            );
        }
        log::info!("Producer for queue '{}' closed", self.client.queue_name());
    }

    pub fn queue_name(&self) -> &str {
        self.client.queue_name()
    }

    pub fn shard_count(&self) -> usize {
        self.client.shard_count()
    }

    /// Payloads waiting in the local buffer
    pub fn pending(&self) -> usize {
        self.sender
            .lock()
            .ok()
            .and_then(|guard| {
                guard
                    .as_ref()
                    .map(|sender| sender.max_capacity() - sender.capacity())
            })
            .unwrap_or(0)
    }
}

struct Batcher {
    client: Arc<ShardClient>,
    receiver: mpsc::Receiver<Vec<u8>>,
    batch_size: usize,
    period: Duration,
    retry: RetryPolicy,
    reporter: Reporter,
    next_shard: usize,
    /// Completion signal of the latest append dispatched to each shard
    shard_tails: Vec<Option<oneshot::Receiver<()>>>,
    in_flight: JoinSet<()>,
}

impl Batcher {
    async fn run(mut self) {
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_flush = Instant::now();

        loop {
            let open = tokio::select! {
                received = self.receiver.recv() => match received {
                    Some(payload) => {
                        batch.push(payload);
                        true
                    }
                    None => false,
                },
                _ = ticker.tick() => true,
            };
            self.reap();

            if open {
                let full = batch.len() >= self.batch_size;
                let idle = last_flush.elapsed() >= self.period && self.receiver.is_empty();
                if !full && !idle {
                    continue;
                }
            }

            self.flush(std::mem::replace(
                &mut batch,
                Vec::with_capacity(self.batch_size),
            ));
            last_flush = Instant::now();
            if !open {
                break;
            }
        }

        while let Some(joined) = self.in_flight.join_next().await {
            if let Err(e) = joined {
                log::error!("Append task ended abnormally: {}", e);
            }
        }
        log::debug!("Batcher for queue '{}' drained", self.client.queue_name());
    }

    fn reap(&mut self) {
        while let Some(joined) = self.in_flight.try_join_next() {
            if let Err(e) = joined {
                log::error!("Append task ended abnormally: {}", e);
            }
        }
    }

    fn flush(&mut self, batch: Vec<Vec<u8>>) {
        if batch.is_empty() {
            return;
        }
        let shard = self.next_shard;
        self.next_shard = (self.next_shard + 1) % self.client.shard_count();

        let previous = self.shard_tails[shard].take();
        let (done, tail) = oneshot::channel();
        self.shard_tails[shard] = Some(tail);

        let client = self.client.clone();
        let retry = self.retry.clone();
        let reporter = self.reporter.clone();
        self.in_flight.spawn(async move {
            if let Some(previous) = previous {
                // an abnormally ended predecessor still releases us
                let _ = previous.await;
            }
            append(&client, shard, batch, &retry, &reporter).await;
            let _ = done.send(());
        });
    }
}

async fn append(
    client: &ShardClient,
    shard: usize,
    batch: Vec<Vec<u8>>,
    retry: &RetryPolicy,
    reporter: &Reporter,
) {
    let stream = client.stream_name(shard);
    let result = retry_async(
        "append_batch",
        retry,
        StoreError::is_transient,
        |error, attempt| {
            if error.is_transient() {
                reporter.warn(QueueError::TransientStore {
                    operation: "append",
                    stream: stream.to_string(),
                    attempt: attempt + 1,
                    message: error.to_string(),
                });
            }
        },
        || client.store().append_batch(stream, DATA_FIELD, &batch),
    )
    .await;

    match result {
        Ok(ids) => log::debug!("Appended {} entries to {}", ids.len(), stream),
        Err(e) => reporter.error(QueueError::Store {
            operation: "append",
            stream: stream.to_string(),
            message: format!("{} ({} payloads dropped)", e, batch.len()),
        }),
    }
}
