//! Tests for the synchronizer tick and loop

use super::*;
use crate::bootstrap::RegistrationSettings;
use crate::testing::Harness;
use tether_core::{MetricInfo, ServiceDescriptor, ServiceIdentity};

fn synchronizer(harness: &Harness) -> Synchronizer {
    let bootstrap = Bootstrap::new(
        RegistrationSettings {
            account_id: "acc".into(),
            registration_key: "key".into(),
        },
        None,
    );
    Synchronizer::new(harness.ctx.clone(), bootstrap, &SyncConfig::default())
}

fn agent_status() -> MetricIdentity {
    MetricIdentity::new(AGENT_STATUS)
}

// =============================================================================
// Tick
// =============================================================================

#[tokio::test]
async fn test_fresh_agent_converges_in_one_tick() {
    let harness = Harness::new();
    let cancel = CancellationToken::new();
    let mut sync = synchronizer(&harness);
    let ready = sync.readiness();

    harness.set_fact("fqdn", "web-01.example.com");
    harness.add_service("nginx", ServiceDescriptor::new("nginx"));
    harness.emit(&agent_status(), MetricInfo::new());
    harness.emit(
        &MetricIdentity::new("nginx_requests").with_service("nginx"),
        MetricInfo::new(),
    );

    let report = sync.tick(&cancel).await.unwrap();

    assert!(report.registered);
    assert!(report.full_pass);
    assert_eq!(report.services.created, 1);
    assert_eq!(report.metrics.registered, 2);
    assert!(report.facts_sent);

    assert_eq!(harness.cache.agent_id().as_deref(), Some("agent-1"));
    let (_, request) = harness.registry.agents().pop().unwrap();
    assert_eq!(request.fqdn, "web-01.example.com");
    assert_eq!(request.account, "acc");
    assert_eq!(harness.registry.facts()["fqdn"], "web-01.example.com");
    assert!(*ready.borrow());
}

#[tokio::test]
async fn test_registration_waits_for_fqdn() {
    let harness = Harness::new();
    let cancel = CancellationToken::new();
    let mut sync = synchronizer(&harness);
    harness.emit(&agent_status(), MetricInfo::new());

    let report = sync.tick(&cancel).await.unwrap();
    assert!(!report.registered);
    assert!(harness.registry.calls().is_empty());
    assert!(!*sync.readiness().borrow());

    harness.set_fact("fqdn", "db-01");
    assert!(sync.tick(&cancel).await.unwrap().registered);
}

#[tokio::test]
async fn test_full_pass_only_when_due_or_requested() {
    let harness = Harness::registered();
    let cancel = CancellationToken::new();
    let mut sync = synchronizer(&harness);

    assert!(sync.tick(&cancel).await.unwrap().full_pass);
    harness.registry.clear_calls();

    let report = sync.tick(&cancel).await.unwrap();
    assert!(!report.full_pass);
    assert_eq!(harness.registry.count("list_metrics"), 0);
    assert_eq!(harness.registry.count("agent"), 0);

    harness.signals.request_resync();
    let report = sync.tick(&cancel).await.unwrap();
    assert!(report.full_pass);
    assert_eq!(harness.registry.count("list_metrics"), 1);
    assert_eq!(harness.registry.count("list_services"), 1);
}

#[tokio::test]
async fn test_failed_full_pass_is_retried_next_tick() {
    let harness = Harness::registered();
    let cancel = CancellationToken::new();
    let mut sync = synchronizer(&harness);

    harness.registry.fail_times("list_metrics", 500, 1);
    harness.add_service("nginx", ServiceDescriptor::new("nginx"));
    harness.emit(&agent_status(), MetricInfo::new());

    // The rest of the tick still runs
    let report = sync.tick(&cancel).await.unwrap();
    assert!(!report.full_pass);
    assert!(report.full_pass_failed);
    assert_eq!(report.services.created, 1);
    assert_eq!(report.metrics.registered, 1);

    let report = sync.tick(&cancel).await.unwrap();
    assert!(report.full_pass);
    assert!(!report.full_pass_failed);
}

#[tokio::test]
async fn test_failing_filtered_deletion_does_not_block_registration() {
    let harness = Harness::registered();
    let cancel = CancellationToken::new();
    let mut sync = synchronizer(&harness);
    let ready = sync.readiness();
    let cpu = MetricIdentity::new("cpu_used");

    harness.emit(&cpu, MetricInfo::new());
    sync.tick(&cancel).await.unwrap();

    harness.registry.set_alerting_mode(true);
    harness.registry.fail("delete_metric", 403);
    harness.signals.request_resync();
    harness.add_service("nginx", ServiceDescriptor::new("nginx"));
    harness.emit(&agent_status(), MetricInfo::new());

    for _ in 0..3 {
        let report = sync.tick(&cancel).await.unwrap();
        assert!(!report.full_pass_failed);
    }
    assert_eq!(harness.registry.services().len(), 1);
    assert!(*ready.borrow());
    assert!(harness.cache.lookup(&cpu).is_resolved());

    harness.registry.recover("delete_metric");
    harness.signals.request_resync();
    sync.tick(&cancel).await.unwrap();
    assert_eq!(harness.cache.get(&cpu), None);
    assert!(harness.registry.metric_id("cpu_used", None).is_none());
}

#[tokio::test]
async fn test_metrics_register_again_after_alerting_mode_ends() {
    let harness = Harness::registered();
    let cancel = CancellationToken::new();
    let mut sync = synchronizer(&harness);
    let cpu = MetricIdentity::new("cpu_used");

    harness.emit(&cpu, MetricInfo::new());
    sync.tick(&cancel).await.unwrap();
    assert!(harness.cache.lookup(&cpu).is_resolved());

    harness.registry.set_alerting_mode(true);
    harness.signals.request_resync();
    sync.tick(&cancel).await.unwrap();
    assert_eq!(harness.cache.get(&cpu), None);
    assert!(harness.registry.metric_id("cpu_used", None).is_none());

    harness.registry.set_alerting_mode(false);
    harness.signals.request_resync();
    sync.tick(&cancel).await.unwrap();
    assert!(!harness.filter.alerting_mode());

    harness.emit(&cpu, MetricInfo::new());
    sync.tick(&cancel).await.unwrap();
    assert!(harness.cache.lookup(&cpu).is_resolved());
    assert!(harness.registry.metric_id("cpu_used", None).is_some());
}

#[tokio::test]
async fn test_rejected_agent_status_is_retried_on_next_emission() {
    let harness = Harness::registered();
    let cancel = CancellationToken::new();
    let mut sync = synchronizer(&harness);
    let ready = sync.readiness();

    harness.registry.fail_times("register_metric", 400, 1);
    harness.emit(&agent_status(), MetricInfo::new());
    let report = sync.tick(&cancel).await.unwrap();
    assert_eq!(report.metrics.rejected, 1);
    assert!(!harness.cache.lookup(&agent_status()).is_deleted());
    assert!(!*ready.borrow());

    harness.emit(&agent_status(), MetricInfo::new());
    sync.tick(&cancel).await.unwrap();
    assert!(*ready.borrow());
}

#[tokio::test]
async fn test_service_deletion_forces_next_full_pass() {
    let harness = Harness::registered();
    let cancel = CancellationToken::new();
    let mut sync = synchronizer(&harness);

    harness.add_service("nginx", ServiceDescriptor::new("nginx"));
    sync.tick(&cancel).await.unwrap();
    assert!(!sync.tick(&cancel).await.unwrap().full_pass);

    harness
        .discovery
        .remove_services(&[ServiceIdentity::new("nginx")]);
    let report = sync.tick(&cancel).await.unwrap();
    assert_eq!(report.services.deleted, 1);

    assert!(sync.tick(&cancel).await.unwrap().full_pass);
    assert!(!sync.tick(&cancel).await.unwrap().full_pass);
}

#[tokio::test]
async fn test_alerting_mode_change_is_applied() {
    let harness = Harness::registered();
    let cancel = CancellationToken::new();
    let mut sync = synchronizer(&harness);

    harness.registry.set_alerting_mode(true);
    sync.tick(&cancel).await.unwrap();

    assert!(harness.filter.alerting_mode());
    assert_eq!(*harness.observer.alerting.lock(), vec![true]);

    // Unchanged on the next full pass: no second notification
    harness.signals.request_resync();
    sync.tick(&cancel).await.unwrap();
    assert_eq!(harness.observer.alerting.lock().len(), 1);
}

#[tokio::test]
async fn test_readiness_drops_when_agent_status_deleted() {
    let harness = Harness::registered();
    let cancel = CancellationToken::new();
    let mut sync = synchronizer(&harness);
    let ready = sync.readiness();

    harness.emit(&agent_status(), MetricInfo::new());
    sync.tick(&cancel).await.unwrap();
    assert!(*ready.borrow());

    let id = harness
        .cache
        .lookup(&agent_status())
        .id()
        .unwrap()
        .to_string();
    harness.registry.remove_metric(&id);
    harness.signals.request_resync();
    sync.tick(&cancel).await.unwrap();
    assert!(!*ready.borrow());

    harness.emit(&agent_status(), MetricInfo::new());
    sync.tick(&cancel).await.unwrap();
    assert!(*ready.borrow());
}

#[tokio::test]
async fn test_cancelled_tick() {
    let harness = Harness::registered();
    let cancel = CancellationToken::new();
    let mut sync = synchronizer(&harness);

    cancel.cancel();
    assert!(matches!(
        sync.tick(&cancel).await,
        Err(SyncError::Cancelled)
    ));
}

// =============================================================================
// Loop
// =============================================================================

#[tokio::test]
async fn test_run_becomes_ready_and_stops_on_cancel() {
    let harness = Harness::new();
    let cancel = CancellationToken::new();
    let sync = synchronizer(&harness);
    let mut ready = sync.readiness();

    harness.set_fact("fqdn", "web-01.example.com");
    harness.emit(&agent_status(), MetricInfo::new());

    let task = tokio::spawn(sync.run(cancel.clone()));

    tokio::time::timeout(Duration::from_secs(5), ready.wait_for(|ready| *ready))
        .await
        .expect("synchronizer never became ready")
        .unwrap();

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("synchronizer did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_discovery_change_wakes_the_loop() {
    let harness = Harness::registered();
    let cancel = CancellationToken::new();
    let sync = synchronizer(&harness);
    let task = tokio::spawn(sync.run(cancel.clone()));

    // Default interval is far longer than the test
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.add_service("postgresql", ServiceDescriptor::new("postgresql"));

    let created = async {
        while harness.registry.services().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), created)
        .await
        .expect("service was never registered");

    cancel.cancel();
    task.await.unwrap();
}
