//! Queue integration tests
//!
//! Producers and consumers driven only through the public API, sharing one
//! in-memory log store the way separate processes share a server.

mod common;

use common::{consumer_options, pop_into, producer_options};
use disruptor::queue::api::{Consumer, Json, LogStore, MemoryLogStore, Producer};
use disruptor::queue::stream_name;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Order {
    seq: u64,
    sku: String,
    quantity: u32,
}

fn order(seq: u64) -> Order {
    Order {
        seq,
        sku: format!("SKU-{:05}", seq),
        quantity: (seq % 7) as u32 + 1,
    }
}

#[tokio::test]
async fn test_typed_payloads_arrive_intact_and_in_shard_order() {
    let store: Arc<dyn LogStore> = Arc::new(MemoryLogStore::new());
    let producer = Producer::new(producer_options("orders", 3), store.clone())
        .await
        .unwrap();
    let consumer = Consumer::new(consumer_options("orders", "worker", 3), store)
        .await
        .unwrap();

    for seq in 0..90 {
        producer.push(&Json(order(seq))).await.unwrap();
    }
    producer.close().await;

    let mut last_seen: BTreeMap<usize, u64> = BTreeMap::new();
    let mut payload = Json(Order::default());
    for _ in 0..90 {
        let mut shard = usize::MAX;
        tokio::time::timeout(
            common::POP_TIMEOUT,
            consumer.pop(&mut payload, |message| {
                shard = message.shard;
                Ok(())
            }),
        )
        .await
        .expect("pop timed out")
        .expect("consumer closed")
        .expect("pop failed");

        let received = &payload.0;
        assert_eq!(received, &order(received.seq));
        // one producer, so each shard sees its sequence numbers ascending
        if let Some(previous) = last_seen.insert(shard, received.seq) {
            assert!(previous < received.seq, "{} after {}", received.seq, previous);
        }
    }
    assert_eq!(last_seen.len(), 3);
    consumer.close().await;
}

#[tokio::test]
async fn test_competing_consumers_split_the_work() {
    let store = Arc::new(MemoryLogStore::new());
    let producer = Producer::new(producer_options("jobs", 4), store.clone())
        .await
        .unwrap();
    let first = Consumer::new(consumer_options("jobs", "worker_1", 4), store.clone())
        .await
        .unwrap();
    let second = Consumer::new(consumer_options("jobs", "worker_2", 4), store.clone())
        .await
        .unwrap();

    const TOTAL: u64 = 400;
    for index in 0..TOTAL {
        producer.push(&index.to_string()).await.unwrap();
    }
    producer.close().await;

    let drain = |consumer: Consumer| async move {
        let mut seen = Vec::new();
        let mut payload = String::new();
        while tokio::time::timeout(
            std::time::Duration::from_millis(500),
            consumer.pop(&mut payload, |_| Ok(())),
        )
        .await
        .ok()
        .flatten()
        .is_some()
        {
            seen.push(payload.parse::<u64>().unwrap());
        }
        consumer.close().await;
        seen
    };
    let (a, b) = tokio::join!(drain(first), drain(second));

    let unique: HashSet<u64> = a.iter().chain(b.iter()).copied().collect();
    assert_eq!(a.len() + b.len(), TOTAL as usize, "duplicate deliveries");
    assert_eq!(unique, (0..TOTAL).collect());
    for shard in 0..4 {
        assert!(store.is_empty(&stream_name("jobs", shard)));
    }
}

#[tokio::test]
async fn test_restarted_consumer_recovers_unacknowledged_entries() {
    let store = Arc::new(MemoryLogStore::new());
    let producer = Producer::new(producer_options("recover", 2), store.clone())
        .await
        .unwrap();
    for index in 0..40u64 {
        producer.push(&index.to_string()).await.unwrap();
    }
    producer.close().await;

    // the first incarnation takes one message, then goes away with the rest
    // of its prefetch still unacknowledged
    let first = Consumer::new(consumer_options("recover", "node", 2), store.clone())
        .await
        .unwrap();
    let mut payload = String::new();
    pop_into(&first, &mut payload).await.expect("first message");
    let handled_first = payload.clone();
    first.close().await;
    drop(first);

    let restarted = Consumer::new(consumer_options("recover", "node", 2), store.clone())
        .await
        .unwrap();
    let mut recovered = HashSet::new();
    while recovered.len() < 39 {
        pop_into(&restarted, &mut payload)
            .await
            .expect("recovered message");
        assert!(recovered.insert(payload.clone()), "{} delivered twice", payload);
    }
    restarted.close().await;

    assert!(!recovered.contains(&handled_first));
    for shard in 0..2 {
        assert!(store.is_empty(&stream_name("recover", shard)));
    }
}
