//! Core traits for the registrar
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`NamingService`]: Publish and retract service instances
//! - [`AddressSource`]: Local addresses used to expand wildcard listeners
//! - [`ServerLifecycleCallback`]: Start/stop notifications from the server host

pub mod naming_service;
pub mod address_source;
pub mod lifecycle;

pub use naming_service::{NamingService, NamingServiceFactory, ServiceInstance};
pub use address_source::{AddressSource, AddressSourceFactory};
pub use lifecycle::{ServerInfo, ServerLifecycleCallback};
