//! Tests for the application commands against the in-memory store

use crate::app::cli::config::FileConfig;
use crate::app::commands::{self, CommandError, DemoReport, ErrorCounter};
use crate::core::error_handling::ContextualError;
use crate::core::shutdown::ShutdownCoordinator;
use crate::queue::{ErrorSink, QueueError};
use crate::store::{LogStore, MemoryLogStore};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

fn small_config(queue: &str) -> FileConfig {
    let mut config = FileConfig::default();
    config.producer.queue_name = queue.to_string();
    config.producer.shard_count = 2;
    config.producer.batch_period = Duration::from_millis(5);
    config.consumer.queue_name = queue.to_string();
    config.consumer.consumer_name = "tests".to_string();
    config.consumer.shard_count = 2;
    config.consumer.block = Duration::from_millis(20);
    config.consumer.batch_period = Duration::from_millis(5);
    config
}

#[tokio::test]
async fn test_open_store_accepts_memory() {
    assert!(commands::open_store("memory").await.is_ok());
}

#[tokio::test]
async fn test_open_store_rejects_unknown_scheme() {
    let err = commands::open_store("kafka://localhost").await.err().unwrap();

    assert!(matches!(err, CommandError::UnsupportedStore { .. }));
    assert!(err.is_user_actionable());
    assert!(err.user_message().unwrap().contains("kafka://localhost"));
}

#[tokio::test]
async fn test_demo_delivers_every_player() {
    let config = small_config("demo");
    let store: Arc<dyn LogStore> = Arc::new(MemoryLogStore::new());

    let report = commands::demo(&config, store, 250, &ShutdownCoordinator::new())
        .await
        .unwrap();

    assert_eq!(report.sent, 250);
    assert_eq!(report.received, 250);
    assert_eq!(report.background_errors, 0);
    assert!(report.to_string().contains("received:  250"));
}

#[tokio::test]
async fn test_produce_then_consume_with_limit() {
    let config = small_config("handoff");
    let store = Arc::new(MemoryLogStore::new());
    let shutdown = ShutdownCoordinator::new();

    let pushed = commands::produce(&config, store.clone(), 20, Duration::ZERO, &shutdown)
        .await
        .unwrap();
    let handled = commands::consume(&config, store.clone(), Some(20), &ShutdownCoordinator::new())
        .await
        .unwrap();

    assert_eq!(pushed, 20);
    assert_eq!(handled, 20);
    for shard in 0..2 {
        assert!(store.is_empty(&crate::queue::stream_name("handoff", shard)));
    }
}

#[tokio::test]
async fn test_produce_stops_on_shutdown() {
    let config = small_config("endless");
    let store = Arc::new(MemoryLogStore::new());
    let shutdown = ShutdownCoordinator::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger_shutdown();
    });

    let pushed = commands::produce(&config, store, 0, Duration::from_millis(1), &shutdown)
        .await
        .unwrap();

    assert!(pushed > 0);
}

#[tokio::test]
async fn test_invalid_queue_options_surface_as_config_error() {
    let mut config = small_config("bad");
    config.producer.shard_count = 0;
    let store = Arc::new(MemoryLogStore::new());

    let err = commands::produce(&config, store, 1, Duration::ZERO, &ShutdownCoordinator::new())
        .await
        .unwrap_err();

    assert!(err.is_user_actionable());
    assert!(err.user_message().unwrap().contains("shard_count"));
}

#[tokio::test]
async fn test_interrupted_demo_reports_progress() {
    let config = small_config("interrupted");
    let store: Arc<dyn LogStore> = Arc::new(MemoryLogStore::new());
    let shutdown = ShutdownCoordinator::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.trigger_shutdown();
    });

    let report = commands::demo(&config, store, u64::MAX, &shutdown)
        .await
        .unwrap();

    assert!(report.sent > 0);
    assert!(report.received > 0);
    assert!(report.received <= report.sent);
}

fn report() -> DemoReport {
    DemoReport {
        sent: 10,
        received: 10,
        background_errors: 1,
        elapsed: Duration::from_millis(500),
    }
}

#[test]
#[serial]
fn test_demo_report_plain() {
    colored::control::set_override(false);
    let text = report().to_string();
    colored::control::unset_override();

    assert!(text.starts_with("Demo complete\n"));
    assert!(text.contains("errors:    1"));
    assert!(text.contains("(20 msg/s)"));
}

#[test]
#[serial]
fn test_demo_report_colored_heading() {
    colored::control::set_override(true);
    let text = report().to_string();
    colored::control::unset_override();

    assert!(text.starts_with("\u{1b}[1mDemo complete"));
}

#[test]
fn test_error_counter_counts_every_notification() {
    let counter = ErrorCounter::default();

    counter.emit_error(&QueueError::Closed);
    counter.emit_error(&QueueError::Closed);

    assert_eq!(counter.count(), 2);
}
