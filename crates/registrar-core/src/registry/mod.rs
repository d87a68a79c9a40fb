//! Plugin registry
//!
//! Naming services and address sources are registered by name at runtime,
//! so the daemon never hardcodes which implementations exist.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use registrar_core::registry::PluginRegistry;
//!
//! let registry = PluginRegistry::new();
//! registrar_nacos::register(&registry);
//! registrar_ip_local::register(&registry);
//!
//! let naming = registry.create_naming(&config.naming)?;
//! let source = registry.create_address_source(&config.address_source)?;
//! ```
//!
//! ## Registration
//!
//! Plugin crates expose a `register` function:
//!
//! ```rust,ignore
//! pub fn register(registry: &PluginRegistry) {
//!     registry.register_naming("nacos", Box::new(NacosFactory));
//! }
//! ```
//!
//! The `static` address source lives in this crate and is always present.

use crate::address::StaticAddressFactory;
use crate::config::{AddressSourceConfig, NamingConfig, RegistrarConfig};
use crate::error::{Error, Result};
use crate::lifecycle::RegistrationLifecycle;
use crate::traits::{AddressSource, AddressSourceFactory, NamingService, NamingServiceFactory};
use crate::worker::{RegistrationWorker, WorkerEvent};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tracing::info;

/// Name-to-factory maps for every pluggable component
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
pub struct PluginRegistry {
    naming: RwLock<HashMap<String, Box<dyn NamingServiceFactory>>>,
    address_sources: RwLock<HashMap<String, Box<dyn AddressSourceFactory>>>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    /// Create a registry holding only the built-in `static` address source
    pub fn new() -> Self {
        let registry = Self {
            naming: RwLock::new(HashMap::new()),
            address_sources: RwLock::new(HashMap::new()),
        };
        registry.register_address_source("static", Box::new(StaticAddressFactory));
        registry
    }

    /// Register a naming service factory
    ///
    /// # Parameters
    ///
    /// - `name`: Naming type name (e.g., "nacos")
    /// - `factory`: Factory object for creating naming service instances
    pub fn register_naming(&self, name: impl Into<String>, factory: Box<dyn NamingServiceFactory>) {
        write(&self.naming).insert(name.into(), factory);
    }

    /// Register an address source factory
    ///
    /// # Parameters
    ///
    /// - `name`: Address source type name (e.g., "interfaces", "static")
    /// - `factory`: Factory object for creating address source instances
    pub fn register_address_source(
        &self,
        name: impl Into<String>,
        factory: Box<dyn AddressSourceFactory>,
    ) {
        write(&self.address_sources).insert(name.into(), factory);
    }

    /// Create a naming service from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn NamingService>)`: Created naming service
    /// - `Err(Error)`: If the type is not registered or creation fails
    pub fn create_naming(&self, config: &NamingConfig) -> Result<Box<dyn NamingService>> {
        let naming_type = config.type_name();
        let factories = read(&self.naming);

        let factory = factories
            .get(naming_type)
            .ok_or_else(|| Error::config(format!("Unknown naming type: {}", naming_type)))?;

        factory.create(config)
    }

    /// Create an address source from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn AddressSource>)`: Created address source, addresses already detected
    /// - `Err(Error)`: If the type is not registered or detection fails
    pub fn create_address_source(&self, config: &AddressSourceConfig) -> Result<Box<dyn AddressSource>> {
        let source_type = config.type_name();
        let factories = read(&self.address_sources);

        let factory = factories.get(source_type).ok_or_else(|| {
            Error::config(format!("Unknown address source type: {}", source_type))
        })?;

        factory.create(config)
    }

    /// Wire a complete lifecycle from configuration
    ///
    /// Must be called inside a tokio runtime (the worker is spawned here).
    pub fn build_lifecycle(
        &self,
        config: &RegistrarConfig,
    ) -> Result<(RegistrationLifecycle, mpsc::Receiver<WorkerEvent>)> {
        config.validate()?;

        let naming: Arc<dyn NamingService> = Arc::from(self.create_naming(&config.naming)?);
        let source: Arc<dyn AddressSource> =
            Arc::from(self.create_address_source(&config.address_source)?);
        info!(
            "Using naming service {} and address source {} ({} local address(es))",
            naming.naming_name(),
            source.source_name(),
            source.addresses().len()
        );

        let (worker, events) = RegistrationWorker::new(naming, config.worker.clone())?;
        let lifecycle = RegistrationLifecycle::new(config.registration.clone(), source, worker);
        Ok((lifecycle, events))
    }

    /// List all registered naming types
    pub fn list_naming(&self) -> Vec<String> {
        read(&self.naming).keys().cloned().collect()
    }

    /// List all registered address source types
    pub fn list_address_sources(&self) -> Vec<String> {
        read(&self.address_sources).keys().cloned().collect()
    }

    /// Check if a naming type is registered
    pub fn has_naming(&self, name: &str) -> bool {
        read(&self.naming).contains_key(name)
    }

    /// Check if an address source type is registered
    pub fn has_address_source(&self, name: &str) -> bool {
        read(&self.address_sources).contains_key(name)
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockNamingFactory;

    impl NamingServiceFactory for MockNamingFactory {
        fn create(&self, _config: &NamingConfig) -> Result<Box<dyn NamingService>> {
            Err(Error::config("Mock naming service not implemented"))
        }
    }

    #[test]
    fn registration_makes_factory_visible() {
        let registry = PluginRegistry::new();
        assert!(!registry.has_naming("mock"));

        registry.register_naming("mock", Box::new(MockNamingFactory));

        assert!(registry.has_naming("mock"));
        assert!(registry.list_naming().contains(&"mock".to_string()));
    }

    #[test]
    fn static_source_is_built_in() {
        let registry = PluginRegistry::new();
        assert!(registry.has_address_source("static"));

        let config = AddressSourceConfig::Static {
            addresses: vec!["10.0.0.5".parse().unwrap()],
        };
        let source = registry.create_address_source(&config).unwrap();
        assert_eq!(source.source_name(), "static");
    }

    #[test]
    fn unknown_types_are_config_errors() {
        let registry = PluginRegistry::new();
        assert!(matches!(
            registry.create_naming(&NamingConfig::default()),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            registry.create_address_source(&AddressSourceConfig::Interfaces),
            Err(Error::Config(_))
        ));
    }
}
