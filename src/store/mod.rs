//! Log Store abstraction
//!
//! The queue engine sits on top of an append-only log with consumer groups:
//! sharded streams, a per-group delivery cursor, a pending-entry list per
//! consumer and per-entry acknowledge/delete. This module defines that
//! contract as the [`LogStore`] trait and ships two backends:
//!
//! - [`MemoryLogStore`]: in-process, always available, with fault injection
//!   and inspection helpers for tests
//! - `RedisLogStore`: Redis Streams, behind the `redis-store` feature
//!
//! Entry identifiers follow the Redis Streams `"<millis>-<seq>"` format and
//! are totally ordered within one stream.

mod error;
mod memory;
#[cfg(feature = "redis-store")]
mod redis_store;

pub use error::{StoreError, StoreResult};
pub use memory::{AppendRecord, MemoryLogStore, StoreOp};
#[cfg(feature = "redis-store")]
pub use redis_store::RedisLogStore;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Store-assigned entry identifier, ordered by (millis, seq)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntryId {
    pub millis: u64,
    pub seq: u64,
}

impl EntryId {
    /// `"0-0"`, lower than any id the store hands out
    pub const MIN: EntryId = EntryId { millis: 0, seq: 0 };

    pub const fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let protocol = || StoreError::Protocol {
            message: format!("invalid entry id '{}'", s),
        };
        let (millis, seq) = s.split_once('-').ok_or_else(protocol)?;
        Ok(EntryId {
            millis: millis.parse().map_err(|_| protocol())?,
            seq: seq.parse().map_err(|_| protocol())?,
        })
    }
}

/// Where a consumer-group read starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCursor {
    /// Entries already delivered to this consumer and not yet acknowledged,
    /// with ids strictly greater than `after`
    Pending { after: EntryId },
    /// Entries never delivered to any consumer of the group (`">"`)
    New,
}

impl ReadCursor {
    /// Cursor argument as the log store spells it
    pub fn as_arg(&self) -> String {
        match self {
            ReadCursor::Pending { after } => after.to_string(),
            ReadCursor::New => ">".to_string(),
        }
    }
}

/// One entry returned by a read
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEntry {
    pub id: EntryId,
    pub fields: HashMap<String, Vec<u8>>,
}

impl StoreEntry {
    pub fn field(&self, name: &str) -> Option<&[u8]> {
        self.fields.get(name).map(Vec::as_slice)
    }
}

/// Arguments of a consumer-group read
#[derive(Debug, Clone)]
pub struct ReadGroupRequest<'a> {
    pub stream: &'a str,
    pub group: &'a str,
    pub consumer: &'a str,
    pub cursor: ReadCursor,
    pub count: usize,
    /// How long a `New` read may wait for entries; pending reads never wait
    pub block: Duration,
}

/// Append-only log with consumer groups
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Whether the stream exists
    async fn stream_exists(&self, stream: &str) -> StoreResult<bool>;

    /// Create a consumer group positioned at the stream's tail, creating the
    /// stream if needed. Fails with [`StoreError::GroupExists`] when the group
    /// is already there.
    async fn create_group(&self, stream: &str, group: &str) -> StoreResult<()>;

    /// Append payloads, in order, each stored under `field`
    async fn append_batch(
        &self,
        stream: &str,
        field: &str,
        payloads: &[Vec<u8>],
    ) -> StoreResult<Vec<EntryId>>;

    /// Read entries for a consumer of a group
    async fn read_group(&self, request: &ReadGroupRequest<'_>) -> StoreResult<Vec<StoreEntry>>;

    /// Acknowledge and delete entries as one operation
    ///
    /// Returns how many of `ids` were pending. Ids that are already gone are
    /// not an error.
    async fn ack_and_delete(&self, stream: &str, group: &str, ids: &[EntryId])
        -> StoreResult<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_display_and_parse() {
        let id: EntryId = "1526919030474-55".parse().unwrap();
        assert_eq!(id, EntryId::new(1526919030474, 55));
        assert_eq!(id.to_string(), "1526919030474-55");
        assert_eq!(EntryId::MIN.to_string(), "0-0");
    }

    #[test]
    fn test_entry_id_rejects_garbage() {
        assert!("".parse::<EntryId>().is_err());
        assert!("12".parse::<EntryId>().is_err());
        assert!("a-1".parse::<EntryId>().is_err());
    }

    #[test]
    fn test_entry_id_ordering() {
        assert!(EntryId::new(5, 0) > EntryId::new(4, 99));
        assert!(EntryId::new(5, 1) > EntryId::new(5, 0));
        assert!(EntryId::MIN < EntryId::new(0, 1));
    }

    #[test]
    fn test_cursor_args() {
        assert_eq!(ReadCursor::New.as_arg(), ">");
        assert_eq!(
            ReadCursor::Pending {
                after: EntryId::MIN
            }
            .as_arg(),
            "0-0"
        );
    }
}
