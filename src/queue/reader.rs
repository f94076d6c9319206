//! Per-shard read loop
//!
//! Each shard has one reader. It first replays this consumer's backlog
//! (entries delivered before but never acknowledged), then follows the
//! group's live cursor until asked to stop.
//!
//! ```text
//!   Backlog { after: 0-0 } --(empty read)--> Live --(stop flag)--> exit
//!        |      ^                             |  ^
//!        +------+ after = last id seen        +--+ read ">" blocking
//! ```

use crate::core::retry::{retry_async, RetryPolicy};
use crate::core::shutdown::ShutdownCoordinator;
use crate::queue::client::{ShardClient, DATA_FIELD};
use crate::queue::error::QueueError;
use crate::queue::message::{Message, Receipt};
use crate::queue::sink::Reporter;
use crate::store::{EntryId, ReadCursor, ReadGroupRequest, StoreEntry, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadPhase {
    Backlog { after: EntryId },
    Live,
}

impl ReadPhase {
    fn cursor(self) -> ReadCursor {
        match self {
            ReadPhase::Backlog { after } => ReadCursor::Pending { after },
            ReadPhase::Live => ReadCursor::New,
        }
    }

    /// Phase for the next read, given what this one returned
    fn advance(self, entries: &[StoreEntry]) -> ReadPhase {
        match (self, entries.last()) {
            (ReadPhase::Backlog { .. }, None) => ReadPhase::Live,
            (ReadPhase::Backlog { .. }, Some(last)) => ReadPhase::Backlog { after: last.id },
            (ReadPhase::Live, _) => ReadPhase::Live,
        }
    }
}

pub(crate) struct ShardReader {
    pub(crate) shard: usize,
    pub(crate) client: Arc<ShardClient>,
    pub(crate) consumer_name: String,
    pub(crate) prefetch_count: usize,
    pub(crate) block: Duration,
    pub(crate) retry: RetryPolicy,
    pub(crate) reporter: Reporter,
    pub(crate) deliveries: mpsc::Sender<Message>,
    pub(crate) acks: mpsc::Sender<Receipt>,
    pub(crate) shutdown: ShutdownCoordinator,
}

impl ShardReader {
    pub(crate) async fn run(self) {
        let stream = self.client.stream_name(self.shard);
        let group = self.client.group_name();
        let mut phase = ReadPhase::Backlog {
            after: EntryId::MIN,
        };
        log::debug!("Reader for {} started as '{}'", stream, self.consumer_name);

        while !self.shutdown.is_shutdown_requested() {
            let request = ReadGroupRequest {
                stream,
                group,
                consumer: &self.consumer_name,
                cursor: phase.cursor(),
                count: self.prefetch_count,
                block: self.block,
            };
            let entries = match self.read(&request).await {
                Some(entries) => entries,
                None => continue,
            };

            let next = phase.advance(&entries);
            if next != phase && next == ReadPhase::Live {
                log::debug!("Backlog of {} replayed, following live entries", stream);
            }
            phase = next;

            for entry in entries {
                if !self.hand_off(entry).await {
                    log::debug!("Reader for {} stopped during hand-off", stream);
                    return;
                }
            }
        }
        log::debug!("Reader for {} stopped", stream);
    }

    /// One read with transient failures retried; `None` after a permanent
    /// failure (already reported and backed off)
    async fn read(&self, request: &ReadGroupRequest<'_>) -> Option<Vec<StoreEntry>> {
        let store = self.client.store();
        let result = retry_async(
            "read_group",
            &self.retry,
            StoreError::is_transient,
            |error, attempt| {
                if error.is_transient() {
                    self.reporter.warn(QueueError::TransientStore {
                        operation: "read",
                        stream: request.stream.to_string(),
                        attempt: attempt + 1,
                        message: error.to_string(),
                    });
                }
            },
            || store.read_group(request),
        )
        .await;

        match result {
            Ok(entries) => Some(entries),
            Err(e) => {
                self.reporter.error(QueueError::Store {
                    operation: "read",
                    stream: request.stream.to_string(),
                    message: e.to_string(),
                });
                tokio::time::sleep(self.retry.backoff_delay(0)).await;
                None
            }
        }
    }

    /// Deliver one entry, or schedule it for acknowledgment when it carries
    /// no payload. Returns false when the reader must exit.
    async fn hand_off(&self, mut entry: StoreEntry) -> bool {
        let stream = self.client.stream_name(self.shard);
        let Some(body) = entry.fields.remove(DATA_FIELD) else {
            self.reporter.warn(QueueError::MalformedEntry {
                stream: stream.to_string(),
                id: entry.id,
                field: DATA_FIELD,
            });
            let receipt = Receipt {
                shard: self.shard,
                id: entry.id,
            };
            return self.acks.send(receipt).await.is_ok();
        };

        let message = Message {
            id: entry.id,
            stream: stream.to_string(),
            group: self.client.group_name().to_string(),
            shard: self.shard,
            body,
        };
        tokio::select! {
            biased;
            sent = self.deliveries.send(message) => sent.is_ok(),
            // the entry stays pending and comes back with the next backlog pass
            _ = self.shutdown.requested() => false,
        }
    }
}
