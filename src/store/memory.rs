//! In-process log store
//!
//! Mirrors the parts of Redis Streams the queue relies on: per-stream entry
//! logs with monotonically increasing ids, consumer groups with a
//! last-delivered cursor, per-consumer pending-entry lists and blocking reads.
//! Tests also use it to inject failures and to inspect what the engine did.

use super::{EntryId, LogStore, ReadCursor, ReadGroupRequest, StoreEntry, StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tokio::time::Instant;

/// Store operations that can be made to fail on purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    StreamExists,
    CreateGroup,
    Append,
    Read,
    Ack,
}

/// One successful `append_batch` call, in call order
#[derive(Debug, Clone, PartialEq)]
pub struct AppendRecord {
    pub stream: String,
    pub payloads: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
struct PendingEntry {
    consumer: String,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingEntry>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: BTreeMap<EntryId, HashMap<String, Vec<u8>>>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
}

impl StreamState {
    fn next_id(&mut self) -> EntryId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let id = if now > self.last_id.millis {
            EntryId::new(now, 0)
        } else {
            EntryId::new(self.last_id.millis, self.last_id.seq + 1)
        };
        self.last_id = id;
        id
    }
}

#[derive(Debug, Default)]
struct Faults {
    fail_before: HashMap<StoreOp, usize>,
    fail_after: HashMap<StoreOp, usize>,
}

impl Faults {
    fn take(table: &mut HashMap<StoreOp, usize>, op: StoreOp) -> bool {
        match table.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
struct Journal {
    appends: Vec<AppendRecord>,
    acknowledged: HashMap<String, Vec<EntryId>>,
}

/// Log store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    streams: Mutex<HashMap<String, StreamState>>,
    appended: Notify,
    faults: Mutex<Faults>,
    journal: Mutex<Journal>,
}

fn injected(op: StoreOp) -> StoreError {
    StoreError::Unavailable {
        message: format!("injected {:?} failure", op),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // State stays consistent across a panicking test thread; keep going
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls of `op` fail before touching any state
    pub fn fail_next(&self, op: StoreOp, times: usize) {
        *lock(&self.faults).fail_before.entry(op).or_default() += times;
    }

    /// Make the next `times` calls of `op` apply their effect and then report
    /// failure, as if the reply had been lost
    pub fn lose_next_reply(&self, op: StoreOp, times: usize) {
        *lock(&self.faults).fail_after.entry(op).or_default() += times;
    }

    fn check_before(&self, op: StoreOp) -> StoreResult<()> {
        if Faults::take(&mut lock(&self.faults).fail_before, op) {
            return Err(injected(op));
        }
        Ok(())
    }

    fn check_after(&self, op: StoreOp) -> StoreResult<()> {
        if Faults::take(&mut lock(&self.faults).fail_after, op) {
            return Err(injected(op));
        }
        Ok(())
    }

    /// Append one entry with arbitrary fields, bypassing the payload framing
    pub fn append_fields(&self, stream: &str, fields: Vec<(String, Vec<u8>)>) -> EntryId {
        let id = {
            let mut streams = lock(&self.streams);
            let state = streams.entry(stream.to_string()).or_default();
            let id = state.next_id();
            state.entries.insert(id, fields.into_iter().collect());
            id
        };
        self.appended.notify_waiters();
        id
    }

    /// Every successful append batch, in call order
    pub fn appends(&self) -> Vec<AppendRecord> {
        lock(&self.journal).appends.clone()
    }

    /// Ids removed by `ack_and_delete`, in removal order
    pub fn acknowledged(&self, stream: &str) -> Vec<EntryId> {
        lock(&self.journal)
            .acknowledged
            .get(stream)
            .cloned()
            .unwrap_or_default()
    }

    /// Entries still stored in the stream
    pub fn len(&self, stream: &str) -> usize {
        lock(&self.streams)
            .get(stream)
            .map(|s| s.entries.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, stream: &str) -> bool {
        self.len(stream) == 0
    }

    /// Entries delivered to the group but not acknowledged
    pub fn pending_count(&self, stream: &str, group: &str) -> usize {
        lock(&self.streams)
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }

    /// How many times the entry has been handed out, if it is pending
    pub fn delivery_count(&self, stream: &str, group: &str, id: EntryId) -> Option<u32> {
        lock(&self.streams)
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .and_then(|g| g.pending.get(&id))
            .map(|p| p.deliveries)
    }

    fn try_read(&self, request: &ReadGroupRequest<'_>) -> StoreResult<Vec<StoreEntry>> {
        let mut streams = lock(&self.streams);
        let no_group = || StoreError::NoSuchGroup {
            stream: request.stream.to_string(),
            group: request.group.to_string(),
        };
        let state = streams.get_mut(request.stream).ok_or_else(no_group)?;
        let StreamState {
            entries, groups, ..
        } = state;
        let group = groups.get_mut(request.group).ok_or_else(no_group)?;

        let mut out = Vec::new();
        match request.cursor {
            ReadCursor::New => {
                let fresh: Vec<EntryId> = entries
                    .range(..)
                    .filter(|(id, _)| **id > group.last_delivered)
                    .take(request.count)
                    .map(|(id, _)| *id)
                    .collect();
                for id in fresh {
                    group.pending.insert(
                        id,
                        PendingEntry {
                            consumer: request.consumer.to_string(),
                            deliveries: 1,
                        },
                    );
                    group.last_delivered = id;
                    out.push(StoreEntry {
                        id,
                        fields: entries.get(&id).cloned().unwrap_or_default(),
                    });
                }
            }
            ReadCursor::Pending { after } => {
                let backlog = group
                    .pending
                    .iter_mut()
                    .filter(|(id, p)| **id > after && p.consumer == request.consumer)
                    .take(request.count);
                for (id, pending) in backlog {
                    pending.deliveries += 1;
                    // deleted-but-pending entries come back without fields
                    out.push(StoreEntry {
                        id: *id,
                        fields: entries.get(id).cloned().unwrap_or_default(),
                    });
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn stream_exists(&self, stream: &str) -> StoreResult<bool> {
        self.check_before(StoreOp::StreamExists)?;
        Ok(lock(&self.streams).contains_key(stream))
    }

    async fn create_group(&self, stream: &str, group: &str) -> StoreResult<()> {
        self.check_before(StoreOp::CreateGroup)?;
        {
            let mut streams = lock(&self.streams);
            let state = streams.entry(stream.to_string()).or_default();
            if state.groups.contains_key(group) {
                return Err(StoreError::GroupExists {
                    stream: stream.to_string(),
                    group: group.to_string(),
                });
            }
            let tail = state.last_id;
            state.groups.insert(
                group.to_string(),
                GroupState {
                    last_delivered: tail,
                    pending: BTreeMap::new(),
                },
            );
        }
        self.check_after(StoreOp::CreateGroup)
    }

    async fn append_batch(
        &self,
        stream: &str,
        field: &str,
        payloads: &[Vec<u8>],
    ) -> StoreResult<Vec<EntryId>> {
        self.check_before(StoreOp::Append)?;
        let ids = {
            let mut streams = lock(&self.streams);
            let state = streams.entry(stream.to_string()).or_default();
            payloads
                .iter()
                .map(|payload| {
                    let id = state.next_id();
                    let mut fields = HashMap::with_capacity(1);
                    fields.insert(field.to_string(), payload.clone());
                    state.entries.insert(id, fields);
                    id
                })
                .collect::<Vec<_>>()
        };
        lock(&self.journal).appends.push(AppendRecord {
            stream: stream.to_string(),
            payloads: payloads.to_vec(),
        });
        self.appended.notify_waiters();
        self.check_after(StoreOp::Append)?;
        Ok(ids)
    }

    async fn read_group(&self, request: &ReadGroupRequest<'_>) -> StoreResult<Vec<StoreEntry>> {
        self.check_before(StoreOp::Read)?;
        let deadline = Instant::now() + request.block;
        loop {
            // Register interest before looking so an append in between wakes us
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let entries = self.try_read(request)?;
            if !entries.is_empty() || matches!(request.cursor, ReadCursor::Pending { .. }) {
                return Ok(entries);
            }
            if Instant::now() >= deadline {
                return Ok(entries);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack_and_delete(
        &self,
        stream: &str,
        group: &str,
        ids: &[EntryId],
    ) -> StoreResult<usize> {
        self.check_before(StoreOp::Ack)?;
        let mut acked = 0;
        {
            let mut streams = lock(&self.streams);
            if let Some(state) = streams.get_mut(stream) {
                let mut journal = lock(&self.journal);
                let removed = journal.acknowledged.entry(stream.to_string()).or_default();
                for id in ids {
                    if let Some(g) = state.groups.get_mut(group) {
                        if g.pending.remove(id).is_some() {
                            acked += 1;
                        }
                    }
                    if state.entries.remove(id).is_some() {
                        removed.push(*id);
                    }
                }
            }
        }
        self.check_after(StoreOp::Ack)?;
        Ok(acked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    const STREAM: &str = "disruptor:orders:{0}";
    const GROUP: &str = "disruptor_orders_group";

    fn read<'a>(consumer: &'a str, cursor: ReadCursor, block: Duration) -> ReadGroupRequest<'a> {
        ReadGroupRequest {
            stream: STREAM,
            group: GROUP,
            consumer,
            cursor,
            count: 10,
            block,
        }
    }

    #[tokio::test]
    async fn test_group_starts_at_tail() {
        let store = MemoryLogStore::new();
        store
            .append_batch(STREAM, "data", &[b"history".to_vec()])
            .await
            .unwrap();
        store.create_group(STREAM, GROUP).await.unwrap();
        store
            .append_batch(STREAM, "data", &[b"fresh".to_vec()])
            .await
            .unwrap();

        let entries = store
            .read_group(&read("c1", ReadCursor::New, Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].field("data"), Some(&b"fresh"[..]));
    }

    #[tokio::test]
    async fn test_create_group_twice_reports_existing() {
        let store = MemoryLogStore::new();
        store.create_group(STREAM, GROUP).await.unwrap();

        let err = store.create_group(STREAM, GROUP).await.unwrap_err();
        assert!(matches!(err, StoreError::GroupExists { .. }));
        assert!(store.stream_exists(STREAM).await.unwrap());
    }

    #[tokio::test]
    async fn test_ids_increase_within_stream() {
        let store = MemoryLogStore::new();
        let payloads: Vec<Vec<u8>> = (0..100u8).map(|i| vec![i]).collect();
        let ids = store.append_batch(STREAM, "data", &payloads).await.unwrap();

        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_pending_read_returns_only_own_backlog() {
        let store = MemoryLogStore::new();
        store.create_group(STREAM, GROUP).await.unwrap();
        store
            .append_batch(STREAM, "data", &[b"a".to_vec(), b"b".to_vec()])
            .await
            .unwrap();

        let mut first = read("c1", ReadCursor::New, Duration::ZERO);
        first.count = 1;
        let delivered = store.read_group(&first).await.unwrap();
        store
            .read_group(&read("c2", ReadCursor::New, Duration::ZERO))
            .await
            .unwrap();

        let backlog = store
            .read_group(&read(
                "c1",
                ReadCursor::Pending {
                    after: EntryId::MIN,
                },
                Duration::ZERO,
            ))
            .await
            .unwrap();

        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].id, delivered[0].id);
        assert_eq!(
            store.delivery_count(STREAM, GROUP, delivered[0].id),
            Some(2)
        );
    }

    #[tokio::test]
    async fn test_ack_and_delete_is_idempotent() {
        let store = MemoryLogStore::new();
        store.create_group(STREAM, GROUP).await.unwrap();
        store
            .append_batch(STREAM, "data", &[b"a".to_vec()])
            .await
            .unwrap();
        let entries = store
            .read_group(&read("c1", ReadCursor::New, Duration::ZERO))
            .await
            .unwrap();
        let ids = vec![entries[0].id];

        assert_eq!(store.ack_and_delete(STREAM, GROUP, &ids).await.unwrap(), 1);
        assert_eq!(store.ack_and_delete(STREAM, GROUP, &ids).await.unwrap(), 0);
        assert_eq!(store.acknowledged(STREAM), ids);
        assert!(store.is_empty(STREAM));
        assert_eq!(store.pending_count(STREAM, GROUP), 0);
    }

    #[tokio::test]
    async fn test_read_without_group_fails() {
        let store = MemoryLogStore::new();
        let err = store
            .read_group(&read("c1", ReadCursor::New, Duration::ZERO))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::NoSuchGroup { .. }));
    }

    #[tokio::test]
    async fn test_injected_faults_are_consumed() {
        let store = MemoryLogStore::new();
        store.fail_next(StoreOp::Append, 2);

        assert!(store.append_batch(STREAM, "data", &[vec![1]]).await.is_err());
        assert!(store.append_batch(STREAM, "data", &[vec![1]]).await.is_err());
        assert!(store.append_batch(STREAM, "data", &[vec![1]]).await.is_ok());
        assert_eq!(store.appends().len(), 1);
    }

    #[tokio::test]
    async fn test_lost_reply_still_applies() {
        let store = MemoryLogStore::new();
        store.lose_next_reply(StoreOp::Append, 1);

        assert!(store.append_batch(STREAM, "data", &[vec![1]]).await.is_err());
        assert_eq!(store.len(STREAM), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_read_times_out_empty() {
        let store = MemoryLogStore::new();
        store.create_group(STREAM, GROUP).await.unwrap();

        let started = Instant::now();
        let entries = store
            .read_group(&read("c1", ReadCursor::New, Duration::from_millis(250)))
            .await
            .unwrap();

        assert!(entries.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_blocking_read_wakes_on_append() {
        let store = Arc::new(MemoryLogStore::new());
        store.create_group(STREAM, GROUP).await.unwrap();

        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .read_group(&read("c1", ReadCursor::New, Duration::from_secs(5)))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store
            .append_batch(STREAM, "data", &[b"wake".to_vec()])
            .await
            .unwrap();

        let entries = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("reader should wake before its block expires")
            .unwrap()
            .unwrap();
        assert_eq!(entries.len(), 1);
    }
}
