//! Self-registration lifecycle
//!
//! [`RegistrationLifecycle`] is the [`ServerLifecycleCallback`] that ties the
//! pieces together:
//!
//! ```text
//! on_start(ServerInfo) ──▶ AddressFilter ──▶ ServiceInstance ──▶ worker: Register
//! on_stop()            ─────────────────────────────────────▶ worker: Deregister
//! ```
//!
//! ## States
//!
//! - `IDLE`: no live instance
//! - `REGISTERING`: a register task was queued and its instance is held
//!
//! `on_start` while registering and `on_stop` while idle are no-ops. Both
//! callbacks return as soon as the task is queued; the naming-service call
//! happens later on the worker.

use crate::address::AddressFilter;
use crate::config::RegistrationConfig;
use crate::error::Result;
use crate::traits::{AddressSource, ServerInfo, ServerLifecycleCallback, ServiceInstance};
use crate::worker::{RegistrationTask, RegistrationWorker};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle callback that publishes the running server
pub struct RegistrationLifecycle {
    config: RegistrationConfig,
    address_source: Arc<dyn AddressSource>,
    worker: RegistrationWorker,
    instance_id: String,
    live: Mutex<Option<Arc<ServiceInstance>>>,
}

impl RegistrationLifecycle {
    /// Create an idle lifecycle
    ///
    /// The instance id is generated here and reused for every registration
    /// made through this value.
    pub fn new(
        config: RegistrationConfig,
        address_source: Arc<dyn AddressSource>,
        worker: RegistrationWorker,
    ) -> Self {
        Self {
            config,
            address_source,
            worker,
            instance_id: Uuid::new_v4().to_string(),
            live: Mutex::new(None),
        }
    }

    /// Identifier used for every instance this lifecycle publishes
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// The instance currently held, if registering
    pub fn live_instance(&self) -> Option<Arc<ServiceInstance>> {
        self.state().clone()
    }

    /// Whether an instance is currently held
    pub fn is_registered(&self) -> bool {
        self.state().is_some()
    }

    /// Stop and drain the worker
    ///
    /// Call from the host's own shutdown path. Runs [`on_stop`](ServerLifecycleCallback::on_stop),
    /// then gives the queued deregistration up to `grace` to complete.
    ///
    /// # Returns
    ///
    /// `true` if the worker drained within `grace`
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.on_stop();
        self.worker.shutdown(grace).await
    }

    fn state(&self) -> MutexGuard<'_, Option<Arc<ServiceInstance>>> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ServerLifecycleCallback for RegistrationLifecycle {
    fn on_start(&self, info: &ServerInfo) -> Result<()> {
        if !self.config.enabled {
            debug!("Self-registration disabled, ignoring server start");
            return Ok(());
        }

        let mut live = self.state();
        if let Some(instance) = live.as_ref() {
            debug!("Already registering {}, ignoring duplicate start", instance);
            return Ok(());
        }

        let filter = AddressFilter::new(&self.config.auto_detect_ip)?;
        let endpoints = filter.publishable(&info.listen_addrs, self.address_source.addresses())?;

        let Some((endpoint, rest)) = endpoints.split_first() else {
            info!(
                "No address of {:?} matches the selection policy, skipping registration of {}",
                info.listen_addrs, self.config.service_name
            );
            return Ok(());
        };
        if !rest.is_empty() {
            warn!(
                "{} selected {} addresses, publishing {} only (not published: {:?})",
                filter.policy(),
                endpoints.len(),
                endpoint,
                rest
            );
        }

        let instance = Arc::new(ServiceInstance::new(&self.instance_id, *endpoint, &self.config));
        self.worker.submit(RegistrationTask::register(instance.clone()))?;
        info!("Queued registration of {}", instance);
        *live = Some(instance);

        Ok(())
    }

    fn on_stop(&self) {
        let Some(instance) = self.state().take() else {
            debug!("No live instance, ignoring server stop");
            return;
        };

        match self.worker.submit(RegistrationTask::deregister(instance.clone())) {
            Ok(()) => info!("Queued deregistration of {}", instance),
            Err(e) => warn!("Cannot deregister {}: {}", instance, e),
        }
    }
}
