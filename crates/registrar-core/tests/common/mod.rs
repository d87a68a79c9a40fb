//! Test doubles and common utilities for contract tests
//!
//! The doubles record every naming-service call with the (tokio) time it
//! happened, so tests can assert on ordering and retry spacing.

#![allow(dead_code)]

use registrar_core::config::{AddressSelectionPolicy, RegistrationConfig, SelectPolicy, WorkerConfig};
use registrar_core::error::{Error, Result};
use registrar_core::traits::{AddressSource, NamingService, ServiceInstance};
use registrar_core::worker::{RegistrationWorker, TaskKind, WorkerEvent};
use registrar_core::{RegistrationLifecycle, StaticAddressSource};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// One recorded naming-service call
#[derive(Debug, Clone)]
pub struct Call {
    pub kind: TaskKind,
    pub instance_id: String,
    pub endpoint: SocketAddr,
    pub succeeded: bool,
    pub at: Instant,
}

/// A naming service that fails a scripted number of calls, then succeeds
pub struct ScriptedNamingService {
    /// Calls left to fail (usize::MAX = never succeed)
    failures_remaining: AtomicUsize,
    /// Every call, in order
    calls: Mutex<Vec<Call>>,
}

impl ScriptedNamingService {
    /// Succeed on every call
    pub fn new() -> Arc<Self> {
        Self::failing(0)
    }

    /// Fail the first `n` calls, whatever their kind
    pub fn failing(n: usize) -> Arc<Self> {
        Arc::new(Self {
            failures_remaining: AtomicUsize::new(n),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Never succeed
    pub fn unreachable() -> Arc<Self> {
        Self::failing(usize::MAX)
    }

    /// Get every recorded call
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Get the number of calls of `kind`
    pub fn call_count(&self, kind: TaskKind) -> usize {
        self.calls().iter().filter(|c| c.kind == kind).count()
    }

    /// Get the number of successful calls of `kind`
    pub fn success_count(&self, kind: TaskKind) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.kind == kind && c.succeeded)
            .count()
    }

    fn record(&self, kind: TaskKind, instance: &ServiceInstance) -> Result<()> {
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok();

        self.calls.lock().unwrap().push(Call {
            kind,
            instance_id: instance.instance_id.clone(),
            endpoint: instance.endpoint(),
            succeeded: !failed,
            at: Instant::now(),
        });

        if failed {
            Err(Error::naming("scripted", "naming service unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl NamingService for ScriptedNamingService {
    async fn register_instance(
        &self,
        _service_name: &str,
        _group_name: &str,
        instance: &ServiceInstance,
    ) -> Result<()> {
        self.record(TaskKind::Register, instance)
    }

    async fn deregister_instance(
        &self,
        _service_name: &str,
        _group_name: &str,
        instance: &ServiceInstance,
    ) -> Result<()> {
        self.record(TaskKind::Deregister, instance)
    }

    fn naming_name(&self) -> &'static str {
        "scripted"
    }
}

/// Address source reporting the given literals
pub fn static_source(addresses: &[&str]) -> Arc<dyn AddressSource> {
    let ips: Vec<IpAddr> = addresses.iter().map(|a| a.parse().unwrap()).collect();
    Arc::new(StaticAddressSource::new(ips))
}

/// Enabled registration settings with the given selection policy
pub fn registration(match_addr: &str, mask_bit_len: u8, policy: SelectPolicy) -> RegistrationConfig {
    RegistrationConfig::new("greeter")
        .with_enabled(true)
        .with_policy(AddressSelectionPolicy::new(match_addr, mask_bit_len, policy))
}

/// Lifecycle over a scripted naming service and a static address source
pub fn lifecycle(
    naming: &Arc<ScriptedNamingService>,
    local: &[&str],
    config: RegistrationConfig,
) -> (RegistrationLifecycle, mpsc::Receiver<WorkerEvent>) {
    let (worker, events) = RegistrationWorker::new(naming.clone(), WorkerConfig::default()).unwrap();
    (RegistrationLifecycle::new(config, static_source(local), worker), events)
}

/// Wait for the first event matching `pred`, skipping the rest
pub async fn wait_for(
    events: &mut mpsc::Receiver<WorkerEvent>,
    pred: impl Fn(&WorkerEvent) -> bool,
) -> WorkerEvent {
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            let event = events.recv().await.expect("worker event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for worker event")
}

/// Parse a socket address literal
pub fn sock(s: &str) -> SocketAddr {
    s.parse().unwrap()
}
