//! Consumer façade
//!
//! One [`ShardReader`] task per shard feeds a shared bounded delivery buffer;
//! `pop` takes from it. Every popped message is scheduled for acknowledgment
//! before it is decoded, so acknowledgment means "delivered", not
//! "processed": a payload that fails to decode, or whose handler fails, is
//! still acknowledged and deleted.

use crate::core::shutdown::ShutdownCoordinator;
use crate::queue::ack::AckPipeline;
use crate::queue::client::ShardClient;
use crate::queue::codec::Marshaler;
use crate::queue::error::{HandlerError, QueueError, QueueResult};
use crate::queue::message::{Message, Receipt};
use crate::queue::options::ConsumerOptions;
use crate::queue::reader::ShardReader;
use crate::queue::sink::Reporter;
use crate::store::LogStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

pub struct Consumer {
    client: Arc<ShardClient>,
    consumer_name: String,
    deliveries: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    acks: Mutex<Option<mpsc::Sender<Receipt>>>,
    shutdown: ShutdownCoordinator,
    stopped: AtomicBool,
    workers: tokio::sync::Mutex<Option<Workers>>,
}

struct Workers {
    readers: JoinSet<()>,
    ack_pipeline: JoinHandle<()>,
}

impl Consumer {
    /// Validate `options`, provision every shard and start one reader per
    /// shard plus the ack pipeline
    pub async fn new(options: ConsumerOptions, store: Arc<dyn LogStore>) -> QueueResult<Self> {
        let options = options.validate()?;
        let client =
            Arc::new(ShardClient::connect(&options.queue_name, options.shard_count, store).await?);
        let reporter = Reporter::new(options.error_sink.clone());
        let shutdown = ShutdownCoordinator::new();

        let (delivery_tx, delivery_rx) = mpsc::channel(options.pending_buffer_size);
        let (ack_tx, ack_rx) = mpsc::channel(options.pending_buffer_size);

        let pipeline = AckPipeline::new(
            client.clone(),
            ack_rx,
            options.batch_size,
            options.batch_period,
            options.retry_policy(),
            reporter.clone(),
        );
        let ack_pipeline = tokio::spawn(pipeline.run());

        let mut readers = JoinSet::new();
        for shard in 0..client.shard_count() {
            let reader = ShardReader {
                shard,
                client: client.clone(),
                consumer_name: options.consumer_name.clone(),
                prefetch_count: options.prefetch_count,
                block: options.block,
                retry: options.retry_policy(),
                reporter: reporter.clone(),
                deliveries: delivery_tx.clone(),
                acks: ack_tx.clone(),
                shutdown: shutdown.clone(),
            };
            readers.spawn(reader.run());
        }

        log::info!(
            "Consumer '{}' started for queue '{}' over {} shard(s)",
            options.consumer_name,
            options.queue_name,
            options.shard_count
        );
        Ok(Self {
            client,
            consumer_name: options.consumer_name,
            deliveries: tokio::sync::Mutex::new(delivery_rx),
            acks: Mutex::new(Some(ack_tx)),
            shutdown,
            stopped: AtomicBool::new(false),
            workers: tokio::sync::Mutex::new(Some(Workers {
                readers,
                ack_pipeline,
            })),
        })
    }

    /// Wait for the next message, decode it into `payload` and run `handler`
    ///
    /// Returns `None` once the consumer is closed and every buffered message
    /// has been popped.
    ///
    /// The message is scheduled for acknowledgment as soon as it is taken
    /// off the buffer, before decoding. A decode error or a handler error is
    /// returned to the caller, but the entry is acknowledged and deleted all
    /// the same and will not be delivered again.
    pub async fn pop<P, F>(&self, payload: &mut P, handler: F) -> Option<QueueResult<()>>
    where
        P: Marshaler + ?Sized,
        F: FnOnce(&Message) -> Result<(), HandlerError>,
    {
        let message = self.deliveries.lock().await.recv().await?;
        self.schedule_ack(message.receipt()).await;

        if let Err(e) = payload.unmarshal(&message.body) {
            return Some(Err(e.into()));
        }
        Some(handler(&message).map_err(|source| QueueError::Handler {
            id: message.id,
            source,
        }))
    }

    async fn schedule_ack(&self, receipt: Receipt) {
        let sender = self.acks.lock().ok().and_then(|guard| guard.clone());
        let scheduled = match sender {
            Some(sender) => sender.send(receipt).await.is_ok(),
            None => false,
        };
        if !scheduled {
            log::warn!(
                "Ack pipeline closed, entry {} on shard {} stays pending and will be redelivered",
                receipt.id,
                receipt.shard
            );
        }
    }

    /// Stop the readers, then drain and stop the ack pipeline
    ///
    /// Messages still in the delivery buffer can be popped afterwards; they
    /// are not acknowledged and come back through the backlog on the next
    /// start with the same consumer name. Calling it again waits for the
    /// first call to finish and returns.
    pub async fn close(&self) {
        let mut workers = self.workers.lock().await;
        let Some(Workers {
            mut readers,
            ack_pipeline,
        }) = workers.take()
        else {
            return;
        };

        self.shutdown.trigger_shutdown();
        while let Some(joined) = readers.join_next().await {
            if let Err(e) = joined {
                log::error!("Shard reader ended abnormally: {}", e);
            }
        }
        // the readers owned every delivery sender, so the buffer is closed now
        self.stopped.store(true, Ordering::Release);

        if let Ok(mut acks) = self.acks.lock() {
            acks.take();
        }
        if let Err(e) = ack_pipeline.await {
            log::error!("Ack pipeline ended abnormally: {}", e);
        }
        log::info!(
            "Consumer '{}' for queue '{}' closed",
            self.consumer_name,
            self.client.queue_name()
        );
    }

    /// True once every shard reader has exited
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn queue_name(&self) -> &str {
        self.client.queue_name()
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    pub fn shard_count(&self) -> usize {
        self.client.shard_count()
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        // readers of a consumer that was never closed exit after their current read
        self.shutdown.trigger_shutdown();
    }
}
