//! Delivered message types
//!
//! A [`Message`] is what a shard reader hands to `pop`: the store's entry id,
//! the shard it came from and the raw payload bytes. Acknowledgment only
//! needs the (shard, id) pair, carried separately as a [`Receipt`].

use crate::store::EntryId;

/// Entry delivered by a consumer, before decoding
///
/// # Example
///
/// ```rust
/// use disruptor::queue::Message;
/// use disruptor::store::EntryId;
///
/// let message = Message {
///     id: EntryId::new(1700000000000, 0),
///     stream: "disruptor:orders:{0}".to_string(),
///     group: "disruptor_orders_group".to_string(),
///     shard: 0,
///     body: b"payload".to_vec(),
/// };
/// assert_eq!(message.receipt().shard, 0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Store-assigned id, unique and ordered within `stream`
    pub id: EntryId,
    /// Shard stream the entry was read from
    pub stream: String,
    /// Consumer group it was delivered through
    pub group: String,
    /// Shard index, `0..shard_count`
    pub shard: usize,
    /// Payload bytes as stored by the producer
    pub body: Vec<u8>,
}

impl Message {
    pub fn receipt(&self) -> Receipt {
        Receipt {
            shard: self.shard,
            id: self.id,
        }
    }
}

/// What the acknowledgment pipeline needs to ack and delete one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub shard: usize,
    pub id: EntryId,
}
