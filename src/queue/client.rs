//! Shard provisioning and naming
//!
//! A queue named `orders` with three shards lives in the streams
//! `disruptor:orders:{0}` .. `disruptor:orders:{2}`, all read through the
//! group `disruptor_orders_group`. The braces keep each shard in its own
//! Redis cluster hash slot.

use crate::queue::error::{QueueError, QueueResult};
use crate::store::{LogStore, StoreError};
use std::sync::Arc;

/// Field every payload is stored under
pub const DATA_FIELD: &str = "data";

pub fn stream_name(queue_name: &str, shard: usize) -> String {
    format!("disruptor:{}:{{{}}}", queue_name, shard)
}

pub fn group_name(queue_name: &str) -> String {
    format!("disruptor_{}_group", queue_name)
}

/// Log store handle bound to one queue's shards
pub struct ShardClient {
    queue_name: String,
    group: String,
    streams: Vec<String>,
    store: Arc<dyn LogStore>,
}

impl ShardClient {
    /// Provision every shard of `queue_name`, failing on the first that
    /// cannot be provisioned
    pub async fn connect(
        queue_name: &str,
        shard_count: usize,
        store: Arc<dyn LogStore>,
    ) -> QueueResult<Self> {
        let client = Self {
            queue_name: queue_name.to_string(),
            group: group_name(queue_name),
            streams: (0..shard_count).map(|i| stream_name(queue_name, i)).collect(),
            store,
        };
        for stream in &client.streams {
            client.ensure_shard(stream, &client.group).await?;
        }
        log::debug!(
            "Provisioned {} shard(s) for queue '{}'",
            shard_count,
            queue_name
        );
        Ok(client)
    }

    /// Create the shard with a tail-positioned group unless it already exists
    pub async fn ensure_shard(&self, stream: &str, group: &str) -> QueueResult<()> {
        let provisioning = |reason: String| QueueError::Provisioning {
            stream: stream.to_string(),
            reason,
        };

        let exists = self
            .store
            .stream_exists(stream)
            .await
            .map_err(|e| provisioning(e.to_string()))?;
        if exists {
            return Ok(());
        }

        match self.store.create_group(stream, group).await {
            Ok(()) => log::info!("Created shard {} with group {}", stream, group),
            Err(StoreError::GroupExists { .. }) => {
                log::debug!("Group {} on {} created concurrently", group, stream)
            }
            Err(e) => return Err(provisioning(e.to_string())),
        }

        let exists = self
            .store
            .stream_exists(stream)
            .await
            .map_err(|e| provisioning(e.to_string()))?;
        if !exists {
            return Err(provisioning("stream missing after creation".to_string()));
        }
        Ok(())
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn group_name(&self) -> &str {
        &self.group
    }

    pub fn shard_count(&self) -> usize {
        self.streams.len()
    }

    /// Stream of `shard`; panics if `shard >= shard_count()`
    pub fn stream_name(&self, shard: usize) -> &str {
        &self.streams[shard]
    }

    pub fn streams(&self) -> &[String] {
        &self.streams
    }

    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }
}
