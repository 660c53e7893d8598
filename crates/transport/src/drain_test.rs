//! Tests for the drain loop

use std::time::Duration;

use super::*;
use crate::queue::{QueueSender, queue};
use crate::testing::Fixture;
use serde_json::Value;
use tether_core::{MetricIdentity, MetricInfo};

const DATA: &str = "v1/agent/agent-1/data";

fn config(capacity: usize, batch_size: usize) -> QueueConfig {
    QueueConfig {
        capacity,
        batch_size,
        first_wait: Duration::from_millis(50),
        idle_timeout: Duration::from_millis(10),
        stall_pause: Duration::from_millis(20),
        shutdown_grace: Duration::from_secs(1),
    }
}

struct Setup {
    fixture: Fixture,
    cache: Arc<IdentityCache>,
    tx: QueueSender,
    drain: DrainLoop,
}

async fn setup(capacity: usize, batch_size: usize) -> Setup {
    let fixture = Fixture::connected(100).await;
    let cache = Arc::new(IdentityCache::in_memory());
    let (tx, rx) = queue(capacity, Arc::clone(&fixture.metrics));
    let drain = DrainLoop::new(
        rx,
        Arc::clone(&cache),
        fixture.transport.handle(),
        &config(capacity, batch_size),
        Arc::clone(&fixture.metrics),
    );
    Setup {
        fixture,
        cache,
        tx,
        drain,
    }
}

fn register(cache: &IdentityCache, identity: &MetricIdentity, id: &str) {
    cache.record_info(identity, MetricInfo::new()).unwrap();
    cache.mark_resolved(identity, id).unwrap();
}

/// Every point sent so far, in order
fn sent_points(fixture: &Fixture) -> Vec<Value> {
    fixture
        .link
        .payloads(DATA)
        .into_iter()
        .flat_map(|batch| batch.as_array().cloned().unwrap_or_default())
        .collect()
}

#[tokio::test]
async fn test_resolved_points_are_sent_with_uuid() {
    let mut s = setup(100, 1000).await;
    let cpu = MetricIdentity::new("cpu_used");
    register(&s.cache, &cpu, "metric-1");

    s.tx.push(MetricPoint::at(&cpu, 12.5, 1000.0));
    s.tx.push(MetricPoint::at(&cpu, 13.0, 1010.0));

    let report = s.drain.cycle(&CancellationToken::new()).await;
    assert_eq!(report.drained, 2);
    assert_eq!(report.sent, 2);

    // One message for the whole batch
    assert_eq!(s.fixture.link.payloads(DATA).len(), 1);
    let points = sent_points(&s.fixture);
    assert_eq!(points[0]["uuid"], "metric-1");
    assert_eq!(points[0]["measurement"], "cpu_used");
    assert_eq!(points[1]["value"], 13.0);
}

#[tokio::test]
async fn test_unresolved_points_wait_until_registered() {
    let mut s = setup(100, 1000).await;
    let cancel = CancellationToken::new();
    let disk = MetricIdentity::new("disk_used").with_item("/home");
    s.cache.record_info(&disk, MetricInfo::new()).unwrap();

    s.tx.push(MetricPoint::at(&disk, 40.0, 1000.0));
    let report = s.drain.cycle(&cancel).await;
    assert_eq!(report.sent, 0);
    assert_eq!(report.pending_after, 1);
    assert!(report.stalled());
    assert!(s.fixture.link.payloads(DATA).is_empty());

    s.cache.mark_resolved(&disk, "metric-9").unwrap();
    let report = s.drain.cycle(&cancel).await;
    assert_eq!(report.sent, 1);
    assert_eq!(report.pending_after, 0);
    assert!(!report.stalled());
    assert_eq!(sent_points(&s.fixture)[0]["uuid"], "metric-9");
    assert_eq!(s.fixture.metrics.snapshot().points_pending, 0);
}

#[tokio::test]
async fn test_deleted_points_are_dropped() {
    let mut s = setup(100, 1000).await;
    let swap = MetricIdentity::new("swap_used");
    register(&s.cache, &swap, "metric-3");
    s.cache.mark_deleted(&swap).unwrap();

    s.tx.push(MetricPoint::at(&swap, 1.0, 1000.0));
    let report = s.drain.cycle(&CancellationToken::new()).await;

    assert_eq!(report.drained, 1);
    assert_eq!(report.sent, 0);
    assert_eq!(report.pending_after, 0);
    assert_eq!(s.fixture.metrics.snapshot().points_dropped_deleted, 1);
    assert!(s.fixture.link.payloads(DATA).is_empty());
}

#[tokio::test]
async fn test_cycle_stops_at_batch_ceiling() {
    let mut s = setup(100, 2).await;
    let cancel = CancellationToken::new();
    let net = MetricIdentity::new("net_bits_sent").with_item("eth0");
    register(&s.cache, &net, "metric-4");

    for i in 0..5 {
        s.tx.push(MetricPoint::at(&net, i as f64, 1000.0 + i as f64));
    }

    let mut batches = Vec::new();
    for _ in 0..3 {
        batches.push(s.drain.cycle(&cancel).await.sent);
    }
    assert_eq!(batches, vec![2, 2, 1]);
    assert_eq!(s.fixture.link.payloads(DATA).len(), 3);
}

#[tokio::test]
async fn test_pending_set_evicts_oldest() {
    let mut s = setup(2, 1000).await;
    let cancel = CancellationToken::new();
    let identities: Vec<_> = (0..3)
        .map(|i| MetricIdentity::new("io_reads").with_item(format!("sd{}", i)))
        .collect();

    for identity in &identities {
        s.cache.record_info(identity, MetricInfo::new()).unwrap();
        s.tx.push(MetricPoint::at(identity, 1.0, 1000.0));
        s.drain.cycle(&cancel).await;
    }

    assert_eq!(s.drain.pending(), 2);
    assert_eq!(s.fixture.metrics.snapshot().points_evicted, 1);

    for (i, identity) in identities.iter().enumerate() {
        s.cache.mark_resolved(identity, format!("metric-{}", i)).unwrap();
    }
    s.drain.cycle(&cancel).await;
    let uuids: Vec<_> = sent_points(&s.fixture)
        .iter()
        .map(|point| point["uuid"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(uuids, vec!["metric-1", "metric-2"]);
}

#[tokio::test]
async fn test_nothing_drained_while_offline() {
    let s = setup(100, 1000).await;
    let handle = s.fixture.transport.handle();
    let cpu = MetricIdentity::new("cpu_used");
    register(&s.cache, &cpu, "metric-1");

    handle.shutdown(false, Duration::from_millis(10)).await;
    s.tx.push(MetricPoint::at(&cpu, 1.0, 1000.0));

    let cancel = CancellationToken::new();
    let task = tokio::spawn(s.drain.run(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(s.tx.len(), 1);

    cancel.cancel();
    task.await.unwrap();
    assert!(s.fixture.link.payloads(DATA).is_empty());
}

#[tokio::test]
async fn test_run_flushes_queue_on_shutdown() {
    let s = setup(100, 1000).await;
    let cpu = MetricIdentity::new("cpu_used");
    register(&s.cache, &cpu, "metric-1");
    for i in 0..3 {
        s.tx.push(MetricPoint::at(&cpu, i as f64, 1000.0));
    }

    let cancel = CancellationToken::new();
    cancel.cancel();
    s.drain.run(cancel).await;

    assert_eq!(sent_points(&s.fixture).len(), 3);
    assert_eq!(s.fixture.metrics.snapshot().points_sent, 3);
}

#[tokio::test]
async fn test_run_stops_when_producers_are_gone() {
    let s = setup(100, 1000).await;
    let cpu = MetricIdentity::new("cpu_used");
    register(&s.cache, &cpu, "metric-1");
    s.tx.push(MetricPoint::at(&cpu, 1.0, 1000.0));
    drop(s.tx);

    tokio::time::timeout(Duration::from_secs(5), s.drain.run(CancellationToken::new()))
        .await
        .expect("drain loop kept running without producers");
    assert_eq!(sent_points(&s.fixture).len(), 1);
}
