//! Fixed address list
//!
//! Used when interface enumeration is undesirable (containers with
//! published ports, tests) or when the operator wants to pin the advertised
//! address.

use crate::config::AddressSourceConfig;
use crate::error::{Error, Result};
use crate::traits::{AddressSource, AddressSourceFactory};
use std::net::IpAddr;

/// Address source backed by a fixed list
#[derive(Debug, Clone, Default)]
pub struct StaticAddressSource {
    addresses: Vec<IpAddr>,
}

impl StaticAddressSource {
    /// Create a source reporting `addresses`, in order
    pub fn new(addresses: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            addresses: addresses.into_iter().map(|ip| ip.to_canonical()).collect(),
        }
    }
}

impl AddressSource for StaticAddressSource {
    fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }

    fn source_name(&self) -> &'static str {
        "static"
    }
}

/// Factory for [`StaticAddressSource`]
pub struct StaticAddressFactory;

impl AddressSourceFactory for StaticAddressFactory {
    fn create(&self, config: &AddressSourceConfig) -> Result<Box<dyn AddressSource>> {
        match config {
            AddressSourceConfig::Static { addresses } => {
                Ok(Box::new(StaticAddressSource::new(addresses.iter().copied())))
            }
            _ => Err(Error::config("Invalid config for static address source")),
        }
    }
}
