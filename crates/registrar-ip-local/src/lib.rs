// # Local Interface Address Source
//
// This crate provides the address source that enumerates every address
// bound to every network interface of the host.
//
// ## Behavior
//
// - Enumerated once, when the source is created; interfaces are assumed
//   stable while the process runs
// - Order follows the platform's enumeration; repeated addresses keep their
//   first position
// - Loopback addresses are kept here and dropped later by the address filter
// - Enumeration failure is fatal: without local addresses no wildcard
//   listener can be published
//
// ## Platform Support
//
// Linux, macOS and Windows, via `local-ip-address`.

use registrar_core::config::AddressSourceConfig;
use registrar_core::traits::{AddressSource, AddressSourceFactory};
use registrar_core::{Error, PluginRegistry, Result};
use std::net::IpAddr;

/// Address source over the host's network interfaces
#[derive(Debug, Clone)]
pub struct InterfaceAddressSource {
    /// (interface name, address), in enumeration order
    interfaces: Vec<(String, IpAddr)>,
    addresses: Vec<IpAddr>,
}

impl InterfaceAddressSource {
    /// Enumerate the host's interfaces
    ///
    /// # Returns
    ///
    /// - `Ok(InterfaceAddressSource)`: Addresses cached
    /// - `Err(Error::AddressSource)`: The platform refused to enumerate interfaces
    pub fn detect() -> Result<Self> {
        let interfaces = local_ip_address::list_afinet_netifas()
            .map_err(|e| Error::address_source(format!("Cannot enumerate network interfaces: {}", e)))?;

        let source = Self::from_interfaces(interfaces);
        tracing::info!(
            "Detected {} local address(es): {:?}",
            source.addresses.len(),
            source.addresses
        );
        Ok(source)
    }

    /// Build from an already enumerated interface list
    pub fn from_interfaces(interfaces: Vec<(String, IpAddr)>) -> Self {
        let mut addresses: Vec<IpAddr> = Vec::with_capacity(interfaces.len());
        for (name, ip) in &interfaces {
            let ip = ip.to_canonical();
            tracing::debug!("Interface {}: {}", name, ip);
            if !addresses.contains(&ip) {
                addresses.push(ip);
            }
        }

        Self {
            interfaces,
            addresses,
        }
    }

    /// Interface name and address pairs, as enumerated
    pub fn interfaces(&self) -> &[(String, IpAddr)] {
        &self.interfaces
    }
}

impl AddressSource for InterfaceAddressSource {
    fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }

    fn source_name(&self) -> &'static str {
        "interfaces"
    }
}

/// Factory for creating interface address sources
pub struct LocalInterfacesFactory;

impl AddressSourceFactory for LocalInterfacesFactory {
    fn create(&self, config: &AddressSourceConfig) -> Result<Box<dyn AddressSource>> {
        match config {
            AddressSourceConfig::Interfaces => Ok(Box::new(InterfaceAddressSource::detect()?)),
            _ => Err(Error::config("Invalid config for interface address source")),
        }
    }
}

/// Register the interface address source with a registry
pub fn register(registry: &PluginRegistry) {
    registry.register_address_source("interfaces", Box::new(LocalInterfacesFactory));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn keeps_enumeration_order_and_drops_repeats() {
        let source = InterfaceAddressSource::from_interfaces(vec![
            ("lo".to_string(), ip("127.0.0.1")),
            ("eth0".to_string(), ip("10.0.0.5")),
            ("eth1".to_string(), ip("192.168.1.5")),
            ("eth0:1".to_string(), ip("10.0.0.5")),
            ("eth0".to_string(), ip("fe80::1")),
        ]);

        assert_eq!(
            source.addresses(),
            &[ip("127.0.0.1"), ip("10.0.0.5"), ip("192.168.1.5"), ip("fe80::1")]
        );
        assert_eq!(source.interfaces().len(), 5);
        assert_eq!(source.source_name(), "interfaces");
    }

    #[test]
    fn factory_rejects_other_configs() {
        let config = AddressSourceConfig::Static { addresses: vec![] };
        assert!(matches!(
            LocalInterfacesFactory.create(&config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn register_adds_interfaces_type() {
        let registry = PluginRegistry::new();
        register(&registry);
        assert!(registry.has_address_source("interfaces"));
        assert!(registry.has_address_source("static"));
    }

    #[test]
    fn detect_on_this_host() {
        // Every CI host has at least a loopback interface
        let source = InterfaceAddressSource::detect().unwrap();
        assert!(!source.addresses().is_empty());
    }
}
