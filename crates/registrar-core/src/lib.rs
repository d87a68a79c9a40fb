// # registrar-core
//
// Core library for gRPC server self-registration.
//
// ## Architecture Overview
//
// A server that binds its listeners hands the bound addresses to a
// lifecycle callback, which decides what to publish and hands the naming
// service work to a background worker:
// - **AddressSource**: Trait for the host's local addresses
// - **AddressFilter**: Mask match and selection policy over bound addresses
// - **NamingService**: Trait for publishing and retracting instances
// - **RegistrationWorker**: FIFO queue with indefinite fixed-interval retry
// - **RegistrationLifecycle**: Start/stop state machine driving the above
// - **PluginRegistry**: Name-based factories for naming services and address sources
//
// ## Design Principles
//
// 1. **Never block the caller**: lifecycle callbacks only enqueue work
// 2. **Fail loudly on ambiguity**: selection policy violations abort startup
// 3. **Eventually consistent**: naming-service failures are retried, never surfaced
// 4. **Plugin-Based**: implementations are registered dynamically

pub mod address;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod traits;
pub mod worker;

// Re-export core types for convenience
pub use address::{AddressFilter, StaticAddressSource};
pub use config::{
    AddressSelectionPolicy, AddressSourceConfig, NamingConfig, RegistrarConfig,
    RegistrationConfig, SelectPolicy, WorkerConfig,
};
pub use error::{Error, Result};
pub use lifecycle::RegistrationLifecycle;
pub use registry::PluginRegistry;
pub use traits::{
    AddressSource, NamingService, ServerInfo, ServerLifecycleCallback, ServiceInstance,
};
pub use worker::{RegistrationTask, RegistrationWorker, TaskKind, WorkerEvent};
