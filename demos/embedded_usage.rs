//! Minimal embedding example for registrar-core
//!
//! A host application that owns its own listener and naming service, and
//! drives the registration lifecycle itself. The naming service lives in
//! memory and rejects its first call, so the worker's retry shows up in the
//! output.

use registrar_core::config::WorkerConfig;
use registrar_core::{
    AddressSelectionPolicy, Error, NamingService, RegistrationConfig, RegistrationLifecycle,
    RegistrationWorker, Result, SelectPolicy, ServerInfo, ServerLifecycleCallback,
    ServiceInstance, StaticAddressSource, WorkerEvent,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory naming service
#[derive(Default)]
struct InMemoryNaming {
    instances: Mutex<BTreeMap<String, SocketAddr>>,
    warmed_up: AtomicBool,
}

impl InMemoryNaming {
    fn snapshot(&self) -> BTreeMap<String, SocketAddr> {
        self.instances.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl NamingService for InMemoryNaming {
    async fn register_instance(&self, service_name: &str, group_name: &str, instance: &ServiceInstance) -> Result<()> {
        if !self.warmed_up.swap(true, Ordering::SeqCst) {
            return Err(Error::naming("in-memory", "registry still starting"));
        }
        println!("[Naming] register {}@{} -> {}", group_name, service_name, instance.endpoint());
        self.instances
            .lock()
            .unwrap()
            .insert(instance.instance_id.clone(), instance.endpoint());
        Ok(())
    }

    async fn deregister_instance(&self, service_name: &str, group_name: &str, instance: &ServiceInstance) -> Result<()> {
        println!("[Naming] deregister {}@{} -> {}", group_name, service_name, instance.endpoint());
        self.instances.lock().unwrap().remove(&instance.instance_id);
        Ok(())
    }

    fn naming_name(&self) -> &'static str {
        "in-memory"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();
    println!("=== Embedded registrar-core Example ===\n");

    // Host addresses pinned instead of enumerated
    let source = StaticAddressSource::new(["127.0.0.1".parse().unwrap(), "10.0.0.5".parse().unwrap()]);
    let naming = Arc::new(InMemoryNaming::default());

    let worker_config = WorkerConfig {
        retry_interval_secs: 1,
        ..WorkerConfig::default()
    };
    let registration = RegistrationConfig::new("greeter")
        .with_enabled(true)
        .with_policy(AddressSelectionPolicy::new("10.0.0.0", 8, SelectPolicy::ExactOne));

    println!("1. Creating lifecycle...");
    let (worker, mut events) = RegistrationWorker::new(naming.clone(), worker_config)?;
    let lifecycle = RegistrationLifecycle::new(registration, Arc::new(source), worker);

    // The host bound a wildcard listener on port 9090
    println!("2. Server started, notifying lifecycle...");
    lifecycle.on_start(&ServerInfo::new(["0.0.0.0:9090".parse().unwrap()]))?;

    while let Some(event) = events.recv().await {
        println!("[Event] {:?}", event);
        if matches!(event, WorkerEvent::Registered { .. }) {
            break;
        }
    }
    println!("3. Registered instances: {:?}\n", naming.snapshot());

    println!("4. Stopping...");
    let drained = lifecycle.shutdown(Duration::from_secs(5)).await;
    while let Ok(event) = events.try_recv() {
        println!("[Event] {:?}", event);
    }
    println!("5. Drained: {}, registered instances: {:?}", drained, naming.snapshot());

    println!("\n=== Embedding Successful ===");
    println!("Key Points:");
    println!("- The application owns the listener and the naming service");
    println!("- Lifecycle callbacks only queue work; the worker retries failures");
    println!("- Only the 10.0.0.0/8 address is published");

    Ok(())
}
