//! Contract Test: Bounded Shutdown
//!
//! Constraints verified:
//! - Shutdown deregisters the live instance and drains within the grace period
//! - An unreachable naming service cannot hold shutdown past the grace period
//! - The worker refuses tasks once shut down
//! - Shutdown is safe to call more than once
//! - A full or closed event channel never stalls the queue

mod common;

use common::*;
use registrar_core::Error;
use registrar_core::config::{SelectPolicy, WorkerConfig};
use registrar_core::traits::{ServerInfo, ServerLifecycleCallback, ServiceInstance};
use registrar_core::worker::{RegistrationTask, RegistrationWorker, TaskKind, WorkerEvent};
use std::sync::Arc;
use std::time::Duration;

const GRACE: Duration = Duration::from_secs(5);

#[tokio::test(start_paused = true)]
async fn shutdown_deregisters_and_drains() {
    let naming = ScriptedNamingService::new();
    let (lc, mut events) = lifecycle(
        &naming,
        &["10.0.0.5"],
        registration("10.0.0.0", 8, SelectPolicy::ExactOne),
    );

    lc.on_start(&ServerInfo::new([sock("0.0.0.0:9090")])).unwrap();
    assert!(lc.shutdown(GRACE).await);
    assert!(!lc.is_registered());

    assert_eq!(naming.success_count(TaskKind::Register), 1);
    assert_eq!(naming.success_count(TaskKind::Deregister), 1);
    wait_for(&mut events, |e| *e == WorkerEvent::Stopped).await;
}

#[tokio::test(start_paused = true)]
async fn unreachable_naming_service_is_abandoned_after_grace() {
    let naming = ScriptedNamingService::unreachable();
    let (lc, _events) = lifecycle(
        &naming,
        &["10.0.0.5"],
        registration("10.0.0.0", 8, SelectPolicy::ExactOne),
    );

    lc.on_start(&ServerInfo::new([sock("0.0.0.0:9090")])).unwrap();

    let started = tokio::time::Instant::now();
    assert!(!lc.shutdown(GRACE).await);
    assert!(started.elapsed() >= GRACE);
    assert!(started.elapsed() < GRACE * 2);

    // Aborted worker makes no further calls
    let calls = naming.calls().len();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(naming.calls().len(), calls);
    assert_eq!(naming.call_count(TaskKind::Deregister), 0);
}

#[tokio::test(start_paused = true)]
async fn submit_after_shutdown_is_rejected() {
    let naming = ScriptedNamingService::new();
    let (worker, _events) = RegistrationWorker::new(naming.clone(), WorkerConfig::default()).unwrap();
    assert!(worker.is_open());

    assert!(worker.shutdown(GRACE).await);
    assert!(!worker.is_open());
    assert!(worker.shutdown(GRACE).await);

    let instance = Arc::new(ServiceInstance::new(
        "id-1",
        sock("10.0.0.5:9090"),
        &registration("10.0.0.0", 8, SelectPolicy::ExactOne),
    ));
    assert!(matches!(
        worker.submit(RegistrationTask::register(instance)),
        Err(Error::WorkerClosed)
    ));
}

#[tokio::test(start_paused = true)]
async fn start_after_shutdown_fails() {
    let naming = ScriptedNamingService::new();
    let (lc, _events) = lifecycle(
        &naming,
        &["10.0.0.5"],
        registration("10.0.0.0", 8, SelectPolicy::ExactOne),
    );

    assert!(lc.shutdown(GRACE).await);
    assert!(matches!(
        lc.on_start(&ServerInfo::new([sock("0.0.0.0:9090")])),
        Err(Error::WorkerClosed)
    ));
    assert!(!lc.is_registered());
}

#[tokio::test(start_paused = true)]
async fn worker_keeps_draining_when_events_are_dropped() {
    let config = registration("10.0.0.0", 8, SelectPolicy::ExactOne);
    let instance = Arc::new(ServiceInstance::new("id-1", sock("10.0.0.5:9090"), &config));

    // One slot that is never read, and a receiver that is gone
    let full = ScriptedNamingService::new();
    let (worker, _unread) = RegistrationWorker::new(
        full.clone(),
        WorkerConfig {
            event_channel_capacity: 1,
            ..WorkerConfig::default()
        },
    )
    .unwrap();
    let closed = ScriptedNamingService::new();
    let (closed_worker, events) = RegistrationWorker::new(closed.clone(), WorkerConfig::default()).unwrap();
    drop(events);

    for worker in [&worker, &closed_worker] {
        for _ in 0..3 {
            worker.submit(RegistrationTask::register(instance.clone())).unwrap();
            worker.submit(RegistrationTask::deregister(instance.clone())).unwrap();
        }
        assert!(worker.shutdown(GRACE).await);
    }

    for naming in [&full, &closed] {
        assert_eq!(naming.success_count(TaskKind::Register), 3);
        assert_eq!(naming.success_count(TaskKind::Deregister), 3);
    }
}
