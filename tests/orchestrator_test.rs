//! Orchestrator flows against a fake supervisor.

mod common;

use common::{harness, StartBehavior};
use devhost::orchestrator::StaleReason;
use devhost::{Error, ListOptions};
use std::sync::atomic::Ordering;
use std::time::Duration;

const IDS: &[&str] = &["alpha", "beta", "gamma", "delta"];

#[tokio::test]
async fn test_ports_are_recycled_lowest_first() {
    let h = harness(8080, 8091, 12, IDS);
    let orch = &h.orchestrator;

    let alpha = orch.start_instance("alpha").await.unwrap();
    let beta = orch.start_instance("beta").await.unwrap();
    assert_eq!(alpha.port, 8080);
    assert_eq!(beta.port, 8081);
    assert!(alpha.url.starts_with("http://localhost:8080/?folder="));

    let stopped = orch.stop_instance("alpha").await.unwrap().expect("record");
    assert_eq!(stopped.port, 8080);
    assert_eq!(stopped.pid, alpha.pid);

    let gamma = orch.start_instance("gamma").await.unwrap();
    assert_eq!(gamma.port, 8080);

    let listing = orch.list_instances(ListOptions::default()).await.unwrap();
    let ports: Vec<(u16, &str)> = listing
        .instances
        .iter()
        .map(|v| (v.port, v.project_id.as_str()))
        .collect();
    assert_eq!(ports, vec![(8080, "gamma"), (8081, "beta")]);
    assert_eq!(listing.tracked, 2);
    assert_eq!(listing.running, 2);
    assert_eq!(listing.untracked, 0);
    assert!(orch.pool().snapshot().verify().is_ok());
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let h = harness(8080, 8091, 12, IDS);

    let first = h.orchestrator.start_instance("alpha").await.unwrap();
    let second = h.orchestrator.start_instance("alpha").await.unwrap();

    assert_eq!(first.pid, second.pid);
    assert_eq!(first.port, second.port);
    assert_eq!(h.supervisor.starts.load(Ordering::SeqCst), 1);
    assert_eq!(h.supervisor.live_count(), 1);
}

#[tokio::test]
async fn test_concurrent_starts_converge_on_one_process() {
    let h = harness(8080, 8091, 12, IDS);
    h.supervisor.set_start_delay(Duration::from_millis(100));

    let a = h.orchestrator.clone();
    let b = h.orchestrator.clone();
    let (first, second) = tokio::join!(a.start_instance("alpha"), b.start_instance("alpha"));
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.pid, second.pid);
    assert_eq!(h.supervisor.starts.load(Ordering::SeqCst), 1);
    assert_eq!(h.orchestrator.pool().all().len(), 1);
}

#[tokio::test]
async fn test_concurrent_starts_of_different_projects_get_distinct_ports() {
    let h = harness(8080, 8091, 12, IDS);
    h.supervisor.set_start_delay(Duration::from_millis(50));

    let handles: Vec<_> = IDS
        .iter()
        .map(|id| {
            let orch = h.orchestrator.clone();
            tokio::spawn(async move { orch.start_instance(id).await })
        })
        .collect();

    let mut ports = Vec::new();
    for handle in handles {
        ports.push(handle.await.unwrap().unwrap().port);
    }
    ports.sort();
    assert_eq!(ports, vec![8080, 8081, 8082, 8083]);
    assert!(h.orchestrator.pool().snapshot().verify().is_ok());
}

#[tokio::test]
async fn test_cap_is_enforced_without_eviction() {
    let h = harness(8080, 8091, 2, IDS);

    h.orchestrator.start_instance("alpha").await.unwrap();
    h.orchestrator.start_instance("beta").await.unwrap();

    let err = h.orchestrator.start_instance("gamma").await.unwrap_err();
    assert!(matches!(err, Error::ResourceExhausted { .. }));

    // Existing instances are untouched
    assert!(h.orchestrator.pool().get("alpha").is_some());
    assert!(h.orchestrator.pool().get("beta").is_some());
    assert_eq!(h.supervisor.stops.load(Ordering::SeqCst), 0);
    // An already-running project is still served at the cap
    assert!(h.orchestrator.start_instance("alpha").await.is_ok());
}

#[tokio::test]
async fn test_spawn_failure_rolls_back_reservation() {
    let h = harness(8080, 8091, 12, IDS);
    h.supervisor.set_behavior(StartBehavior::SpawnFail);

    let err = h.orchestrator.start_instance("alpha").await.unwrap_err();
    assert!(matches!(err, Error::SpawnFailed { .. }));

    let pool = h.orchestrator.pool();
    assert!(pool.get("alpha").is_none());
    assert!(pool.reservation("alpha").is_none());
    assert_eq!(pool.free_ports().len(), 12);

    h.supervisor.set_behavior(StartBehavior::Succeed);
    let started = h.orchestrator.start_instance("alpha").await.unwrap();
    assert_eq!(started.port, 8080);
}

#[tokio::test]
async fn test_start_timeout_rolls_back_reservation() {
    let h = harness(8080, 8091, 12, IDS);
    h.supervisor.set_behavior(StartBehavior::Timeout);

    let err = h.orchestrator.start_instance("beta").await.unwrap_err();
    assert!(matches!(err, Error::StartTimeout { port: 8080, .. }));
    assert!(h.orchestrator.pool().reservation("beta").is_none());
    assert_eq!(h.orchestrator.pool().free_ports().first(), Some(&8080));
}

#[tokio::test]
async fn test_unknown_project_cannot_start() {
    let h = harness(8080, 8091, 12, IDS);

    let err = h.orchestrator.start_instance("ghost").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(h.supervisor.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stop_unknown_and_idle_projects() {
    let h = harness(8080, 8091, 12, IDS);

    let err = h.orchestrator.stop_instance("ghost").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    assert!(h.orchestrator.stop_instance("alpha").await.unwrap().is_none());

    h.orchestrator.start_instance("alpha").await.unwrap();
    assert!(h.orchestrator.stop_instance("alpha").await.unwrap().is_some());
    // Second stop is a no-op
    assert!(h.orchestrator.stop_instance("alpha").await.unwrap().is_none());
    assert_eq!(h.supervisor.live_count(), 0);
}

#[tokio::test]
async fn test_manual_process_is_reported_not_adopted() {
    let h = harness(8080, 8091, 12, IDS);
    let path = h.dir.path().join("scratch");
    h.supervisor.launch_manual(8085, &path);

    h.orchestrator.start_instance("alpha").await.unwrap();

    let listing = h.orchestrator.list_instances(ListOptions::default()).await.unwrap();
    assert_eq!(listing.tracked, 1);
    assert_eq!(listing.live_total, 2);
    assert_eq!(listing.untracked, 1);

    let report = h.orchestrator.reconcile().await.unwrap();
    assert!(report.released.is_empty());
    assert_eq!(report.untracked.len(), 1);
    assert_eq!(report.untracked[0].port, 8085);
    assert_eq!(report.tracked, 1);
    // Still untracked after reconciling
    assert_eq!(h.orchestrator.pool().all().len(), 1);
}

#[tokio::test]
async fn test_reconcile_releases_crashed_instances() {
    let h = harness(8080, 8091, 12, IDS);
    let alpha = h.orchestrator.start_instance("alpha").await.unwrap();
    h.orchestrator.start_instance("beta").await.unwrap();

    h.supervisor.crash(alpha.pid);

    // Listing alone does not mutate
    let listing = h.orchestrator.list_instances(ListOptions::default()).await.unwrap();
    assert_eq!(listing.tracked, 2);
    assert_eq!(listing.running, 1);
    let crashed = &listing.instances[0];
    assert_eq!(crashed.project_id, "alpha");
    assert!(!crashed.running);
    assert!(crashed.uptime.is_none());

    let report = h.orchestrator.reconcile().await.unwrap();
    assert_eq!(report.released.len(), 1);
    assert_eq!(report.released[0].project_id, "alpha");
    assert_eq!(report.released[0].reason, StaleReason::ProcessExited);
    assert!(h.orchestrator.pool().get("alpha").is_none());
    assert_eq!(h.orchestrator.pool().free_ports().first(), Some(&8080));

    let again = h.orchestrator.reconcile().await.unwrap();
    assert!(again.released.is_empty());
    assert!(!again.has_drift());
}

#[tokio::test]
async fn test_list_with_reconcile_drops_stale_records() {
    let h = harness(8080, 8091, 12, IDS);
    let alpha = h.orchestrator.start_instance("alpha").await.unwrap();
    h.supervisor.crash(alpha.pid);

    let listing = h
        .orchestrator
        .list_instances(ListOptions {
            reconcile: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(listing.tracked, 0);
    assert!(listing.instances.is_empty());
}

#[tokio::test]
async fn test_reused_pid_is_stale_and_never_signalled() {
    let h = harness(8080, 8091, 12, IDS);
    let alpha = h.orchestrator.start_instance("alpha").await.unwrap();

    h.supervisor.crash(alpha.pid);
    h.supervisor.mark_reused(alpha.pid);

    let restarted = h.orchestrator.start_instance("alpha").await.unwrap();
    assert_ne!(restarted.pid, alpha.pid);
    assert_eq!(restarted.port, 8080);
    assert_eq!(h.supervisor.stops.load(Ordering::SeqCst), 0);

    let beta = h.orchestrator.start_instance("beta").await.unwrap();
    h.supervisor.crash(beta.pid);
    h.supervisor.mark_reused(beta.pid);

    let report = h.orchestrator.reconcile().await.unwrap();
    assert_eq!(report.released.len(), 1);
    assert_eq!(report.released[0].reason, StaleReason::PidReused);
    assert_eq!(h.supervisor.stops.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stop_of_crashed_instance_releases_port() {
    let h = harness(8080, 8091, 12, IDS);
    let alpha = h.orchestrator.start_instance("alpha").await.unwrap();
    h.supervisor.crash(alpha.pid);

    let record = h.orchestrator.stop_instance("alpha").await.unwrap();
    assert_eq!(record.map(|r| r.port), Some(8080));
    assert_eq!(h.supervisor.stops.load(Ordering::SeqCst), 0);
    assert_eq!(h.orchestrator.pool().free_ports().len(), 12);
}

#[tokio::test]
async fn test_abandoned_start_still_commits() {
    let h = harness(8080, 8091, 12, IDS);
    h.supervisor.set_start_delay(Duration::from_millis(200));

    let result = tokio::time::timeout(
        Duration::from_millis(20),
        h.orchestrator.start_instance("alpha"),
    )
    .await;
    assert!(result.is_err(), "caller should have timed out");

    tokio::time::sleep(Duration::from_millis(500)).await;

    let record = h.orchestrator.pool().get("alpha").expect("start task committed");
    assert_eq!(record.port, 8080);
    assert!(h.orchestrator.pool().reservation("alpha").is_none());
}

#[tokio::test]
async fn test_committed_state_reaches_the_store() {
    let h = harness(8080, 8091, 12, IDS);
    h.orchestrator.start_instance("alpha").await.unwrap();

    let saved = h.store.saved().expect("saved state");
    assert_eq!(saved.records["alpha"].port, 8080);
    assert!(!saved.free_ports.contains(&8080));
    assert_eq!(saved.free_ports.len(), 11);
}

#[tokio::test]
async fn test_slug_collisions_are_reported() {
    let h = harness(8080, 8091, 12, &["My.App", "myapp", "other"]);
    h.orchestrator.start_instance("My.App").await.unwrap();

    let listing = h.orchestrator.list_instances(ListOptions::default()).await.unwrap();
    assert_eq!(
        listing.slug_collisions.get("myapp"),
        Some(&vec!["My.App".to_string(), "myapp".to_string()])
    );
    let view = &listing.instances[0];
    assert_eq!(view.slug, "myapp");
    assert_eq!(view.slug_shared_with, vec!["myapp".to_string()]);
}
