//! Contract Test: Worker-Owned Fixed-Interval Retry
//!
//! Constraints verified:
//! - A call that fails N times completes after N retries
//! - Consecutive attempts are spaced by exactly the retry interval (no backoff growth)
//! - Failures are reported as events, never to the submitting caller
//!
//! Runs on tokio's paused clock, so the 5 s interval costs no wall time.

mod common;

use common::*;
use registrar_core::config::{SelectPolicy, WorkerConfig};
use registrar_core::traits::{ServerInfo, ServerLifecycleCallback, ServiceInstance};
use registrar_core::worker::{RegistrationTask, RegistrationWorker, TaskKind, WorkerEvent};
use std::sync::Arc;
use std::time::Duration;

const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// The paused clock only fires timers on millisecond ticks
fn assert_spaced(gap: Duration, interval: Duration) {
    assert!(
        gap >= interval && gap < interval + Duration::from_millis(10),
        "attempts {:?} apart, expected {:?}",
        gap,
        interval
    );
}

#[tokio::test(start_paused = true)]
async fn register_succeeds_after_n_failures() {
    const FAILURES: usize = 4;

    let naming = ScriptedNamingService::failing(FAILURES);
    let (lc, mut events) = lifecycle(
        &naming,
        &["10.0.0.5"],
        registration("10.0.0.0", 8, SelectPolicy::ExactOne),
    );

    let started = tokio::time::Instant::now();
    lc.on_start(&ServerInfo::new([sock("0.0.0.0:9090")])).unwrap();

    let event = wait_for(&mut events, |e| matches!(e, WorkerEvent::Registered { .. })).await;
    assert!(matches!(event, WorkerEvent::Registered { attempts, .. } if attempts == FAILURES + 1));
    assert!(started.elapsed() >= RETRY_INTERVAL * FAILURES as u32);

    let calls = naming.calls();
    assert_eq!(calls.len(), FAILURES + 1);
    assert!(calls.iter().all(|c| c.kind == TaskKind::Register));
    assert!(calls.last().unwrap().succeeded);
    for pair in calls.windows(2) {
        assert_spaced(pair[1].at - pair[0].at, RETRY_INTERVAL);
    }
}

#[tokio::test(start_paused = true)]
async fn each_failure_is_reported_with_its_attempt_number() {
    let naming = ScriptedNamingService::failing(2);
    let (worker, mut events) = RegistrationWorker::new(naming.clone(), WorkerConfig::default()).unwrap();

    let instance = Arc::new(ServiceInstance::new(
        "id-1",
        sock("10.0.0.5:9090"),
        &registration("10.0.0.0", 8, SelectPolicy::ExactOne),
    ));
    worker.submit(RegistrationTask::deregister(instance)).unwrap();

    for expected in 1..=2 {
        match wait_for(&mut events, |_| true).await {
            WorkerEvent::AttemptFailed { kind, attempt, instance_id, .. } => {
                assert_eq!(kind, TaskKind::Deregister);
                assert_eq!(attempt, expected);
                assert_eq!(instance_id, "id-1");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    let event = wait_for(&mut events, |_| true).await;
    assert!(matches!(event, WorkerEvent::Deregistered { attempts: 3, .. }));
}

#[tokio::test(start_paused = true)]
async fn retry_interval_is_configurable() {
    let naming = ScriptedNamingService::failing(1);
    let config = WorkerConfig {
        retry_interval_secs: 1,
        ..WorkerConfig::default()
    };
    let (worker, mut events) = RegistrationWorker::new(naming.clone(), config).unwrap();

    let instance = Arc::new(ServiceInstance::new(
        "id-1",
        sock("10.0.0.5:9090"),
        &registration("10.0.0.0", 8, SelectPolicy::ExactOne),
    ));
    worker.submit(RegistrationTask::register(instance)).unwrap();
    wait_for(&mut events, |e| matches!(e, WorkerEvent::Registered { .. })).await;

    let calls = naming.calls();
    assert_spaced(calls[1].at - calls[0].at, Duration::from_secs(1));
}
