// # Address Source Trait
//
// Defines the interface for the host's local addresses, used to expand a
// wildcard listen address into concrete, publishable endpoints.
//
// ## Implementations
//
// - Network interfaces: `registrar-ip-local` crate
// - Fixed list: [`crate::address::StaticAddressSource`]
//
// Addresses are detected once, when the source is constructed, and cached
// for its lifetime. Interfaces are assumed stable while the process runs.

use std::net::IpAddr;

/// Trait for local address source implementations
///
/// # Thread Safety
///
/// The address list is read-only after construction, so implementations are
/// shared freely between threads.
pub trait AddressSource: Send + Sync {
    /// All local addresses, in detection order
    fn addresses(&self) -> &[IpAddr];

    /// Get the source name (for logging/debugging)
    fn source_name(&self) -> &'static str;
}

/// Helper trait for constructing address sources from configuration
pub trait AddressSourceFactory: Send + Sync {
    /// Create an AddressSource from configuration
    ///
    /// Detection failures are fatal: without local addresses no wildcard
    /// listener can ever be published.
    fn create(
        &self,
        config: &crate::config::AddressSourceConfig,
    ) -> Result<Box<dyn AddressSource>, crate::Error>;
}
