// # Naming Service Trait
//
// Defines the interface for publishing and retracting service instances
// in a naming service (service registry).
//
// ## Implementations
//
// - Nacos: `registrar-nacos` crate
//
// ## Usage
//
// ```rust,ignore
// use registrar_core::NamingService;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let naming = /* NamingService implementation */;
//
//     naming.register_instance("greeter", "DEFAULT_GROUP", &instance).await?;
//     naming.deregister_instance("greeter", "DEFAULT_GROUP", &instance).await?;
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::config::RegistrationConfig;

/// Metadata key carrying the heartbeat interval in milliseconds
pub const HEART_BEAT_INTERVAL: &str = "preserved.heart.beat.interval";

/// Metadata key carrying the heartbeat timeout in milliseconds
pub const HEART_BEAT_TIMEOUT: &str = "preserved.heart.beat.timeout";

/// Metadata key carrying the delete timeout in milliseconds
pub const IP_DELETE_TIMEOUT: &str = "preserved.ip.delete.timeout";

/// One registration record in the naming service
///
/// Instances built by this crate are always ephemeral, enabled and healthy.
/// The heartbeat durations travel as metadata so the naming service can age
/// the instance out when heartbeats stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    /// Process-lifetime-unique identifier
    pub instance_id: String,
    /// Published IP address
    pub ip: IpAddr,
    /// Published port
    pub port: u16,
    /// Removed automatically by the naming service when heartbeats stop
    pub ephemeral: bool,
    /// Accepts traffic
    pub enabled: bool,
    /// Reported healthy
    pub healthy: bool,
    /// Cluster name
    pub cluster_name: String,
    /// Group name
    pub group_name: String,
    /// Service name
    pub service_name: String,
    /// Load-balancing weight
    pub weight: f64,
    /// Instance metadata
    pub metadata: BTreeMap<String, String>,
}

impl ServiceInstance {
    /// Build the instance published for `endpoint`
    pub fn new(instance_id: impl Into<String>, endpoint: SocketAddr, config: &RegistrationConfig) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            HEART_BEAT_INTERVAL.to_string(),
            config.heart_beat_interval().as_millis().to_string(),
        );
        metadata.insert(
            HEART_BEAT_TIMEOUT.to_string(),
            config.heart_beat_timeout().as_millis().to_string(),
        );
        metadata.insert(
            IP_DELETE_TIMEOUT.to_string(),
            config.ip_delete_timeout().as_millis().to_string(),
        );

        Self {
            instance_id: instance_id.into(),
            ip: endpoint.ip(),
            port: endpoint.port(),
            ephemeral: true,
            enabled: true,
            healthy: true,
            cluster_name: config.cluster_name.clone(),
            group_name: config.group_name.clone(),
            service_name: config.service_name.clone(),
            weight: config.weight,
            metadata,
        }
    }

    /// Published endpoint
    pub fn endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Heartbeat interval from metadata, if present and well-formed
    pub fn heart_beat_interval(&self) -> Option<Duration> {
        self.metadata_millis(HEART_BEAT_INTERVAL)
    }

    /// Heartbeat timeout from metadata, if present and well-formed
    pub fn heart_beat_timeout(&self) -> Option<Duration> {
        self.metadata_millis(HEART_BEAT_TIMEOUT)
    }

    /// Delete timeout from metadata, if present and well-formed
    pub fn ip_delete_timeout(&self) -> Option<Duration> {
        self.metadata_millis(IP_DELETE_TIMEOUT)
    }

    fn metadata_millis(&self, key: &str) -> Option<Duration> {
        self.metadata
            .get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
    }
}

impl std::fmt::Display for ServiceInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}#{} ({}:{}, id={})",
            self.group_name, self.service_name, self.cluster_name, self.ip, self.port, self.instance_id
        )
    }
}

/// Trait for naming service implementations
///
/// Each call is a single attempt. Implementations return an error on failure
/// and leave retrying to the registration worker.
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
#[async_trait]
pub trait NamingService: Send + Sync {
    /// Publish `instance` under `service_name` in `group_name`
    ///
    /// # Returns
    ///
    /// - `Ok(())`: The naming service accepted the instance
    /// - `Err(Error)`: The call failed; safe to retry
    async fn register_instance(
        &self,
        service_name: &str,
        group_name: &str,
        instance: &ServiceInstance,
    ) -> Result<(), crate::Error>;

    /// Retract `instance` from `service_name` in `group_name`
    ///
    /// # Returns
    ///
    /// - `Ok(())`: The instance is gone (or never existed)
    /// - `Err(Error)`: The call failed; safe to retry
    async fn deregister_instance(
        &self,
        service_name: &str,
        group_name: &str,
        instance: &ServiceInstance,
    ) -> Result<(), crate::Error>;

    /// Get the naming service name (for logging/debugging)
    fn naming_name(&self) -> &'static str;
}

/// Helper trait for constructing naming services from configuration
pub trait NamingServiceFactory: Send + Sync {
    /// Create a NamingService instance from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Configuration specific to this naming service
    ///
    /// # Returns
    ///
    /// A boxed NamingService trait object
    fn create(
        &self,
        config: &crate::config::NamingConfig,
    ) -> Result<Box<dyn NamingService>, crate::Error>;
}
