//! Redis Streams log store
//!
//! Streams map one-to-one onto shards, consumer groups onto queue groups.
//! Appends and ack/delete pairs go through MULTI/EXEC pipelines. Blocking
//! `XREADGROUP` calls get their own connections from a small pool so they
//! never stall the shared multiplexed connection.

use super::{EntryId, LogStore, ReadGroupRequest, StoreEntry, StoreError, StoreResult};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::StreamReadReply;
use std::collections::HashMap;
use std::sync::Mutex;

pub struct RedisLogStore {
    client: redis::Client,
    shared: ConnectionManager,
    blocking_pool: Mutex<Vec<MultiplexedConnection>>,
}

impl RedisLogStore {
    /// Connect to the Redis server at `url` (e.g. `redis://127.0.0.1:6379`)
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let shared = ConnectionManager::new(client.clone()).await?;
        log::info!("Connected to redis log store at {}", url);
        Ok(Self {
            client,
            shared,
            blocking_pool: Mutex::new(Vec::new()),
        })
    }

    async fn checkout_blocking(&self) -> StoreResult<MultiplexedConnection> {
        let pooled = self
            .blocking_pool
            .lock()
            .map_err(|_| StoreError::Unavailable {
                message: "connection pool lock poisoned".to_string(),
            })?
            .pop();
        match pooled {
            Some(conn) => Ok(conn),
            None => Ok(self.client.get_multiplexed_async_connection().await?),
        }
    }

    fn checkin_blocking(&self, conn: MultiplexedConnection) {
        if let Ok(mut pool) = self.blocking_pool.lock() {
            pool.push(conn);
        }
    }
}

fn parse_ids(raw: Vec<String>) -> StoreResult<Vec<EntryId>> {
    raw.iter().map(|id| id.parse()).collect()
}

#[async_trait]
impl LogStore for RedisLogStore {
    async fn stream_exists(&self, stream: &str) -> StoreResult<bool> {
        let mut conn = self.shared.clone();
        let kind: String = redis::cmd("TYPE").arg(stream).query_async(&mut conn).await?;
        Ok(kind == "stream")
    }

    async fn create_group(&self, stream: &str, group: &str) -> StoreResult<()> {
        let mut conn = self.shared.clone();
        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Err(StoreError::GroupExists {
                stream: stream.to_string(),
                group: group.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn append_batch(
        &self,
        stream: &str,
        field: &str,
        payloads: &[Vec<u8>],
    ) -> StoreResult<Vec<EntryId>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for payload in payloads {
            pipe.cmd("XADD")
                .arg(stream)
                .arg("*")
                .arg(field)
                .arg(payload.as_slice());
        }
        let mut conn = self.shared.clone();
        let ids: Vec<String> = pipe.query_async(&mut conn).await?;
        parse_ids(ids)
    }

    async fn read_group(&self, request: &ReadGroupRequest<'_>) -> StoreResult<Vec<StoreEntry>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(request.group)
            .arg(request.consumer)
            .arg("COUNT")
            .arg(request.count);
        if matches!(request.cursor, super::ReadCursor::New) {
            // BLOCK 0 means forever to redis; keep at least one millisecond
            cmd.arg("BLOCK")
                .arg(request.block.as_millis().max(1) as u64);
        }
        cmd.arg("STREAMS")
            .arg(request.stream)
            .arg(request.cursor.as_arg());

        let mut conn = self.checkout_blocking().await?;
        let reply: redis::RedisResult<Option<StreamReadReply>> = cmd.query_async(&mut conn).await;
        let reply = match reply {
            Ok(reply) => {
                self.checkin_blocking(conn);
                reply
            }
            Err(e) if e.code() == Some("NOGROUP") => {
                self.checkin_blocking(conn);
                return Err(StoreError::NoSuchGroup {
                    stream: request.stream.to_string(),
                    group: request.group.to_string(),
                });
            }
            // drop the connection, it may be broken
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            for stream_id in key.ids {
                let mut fields = HashMap::with_capacity(stream_id.map.len());
                for (name, value) in &stream_id.map {
                    // non-binary values are left out and surface as malformed
                    if let Ok(bytes) = redis::from_redis_value::<Vec<u8>>(value) {
                        fields.insert(name.clone(), bytes);
                    }
                }
                entries.push(StoreEntry {
                    id: stream_id.id.parse()?,
                    fields,
                });
            }
        }
        Ok(entries)
    }

    async fn ack_and_delete(
        &self,
        stream: &str,
        group: &str,
        ids: &[EntryId],
    ) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = ids.iter().map(EntryId::to_string).collect();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(&ids)
            .cmd("XDEL")
            .arg(stream)
            .arg(&ids);
        let mut conn = self.shared.clone();
        let (acked, _deleted): (usize, usize) = pipe.query_async(&mut conn).await?;
        Ok(acked)
    }
}
