//! Error types for the registrar
//!
//! Two families matter to callers: configuration and selection errors are
//! fatal and surface synchronously at startup, while naming-service errors are
//! transient and only ever seen by the registration worker, which retries them.

use thiserror::Error;

/// Result type alias for registrar operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the registrar
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors (malformed match literal, bad mask length, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Address selection policy could not be satisfied
    #[error("Address selection failed ({policy}): {detected} address(es) detected")]
    Selection {
        /// Policy that was violated
        policy: String,
        /// Number of candidates left after filtering
        detected: usize,
    },

    /// Local address enumeration failed
    #[error("Address source error: {0}")]
    AddressSource(String),

    /// Naming-service call failed
    #[error("Naming service error ({naming}): {message}")]
    Naming {
        /// Naming service implementation name
        naming: String,
        /// Error message
        message: String,
    },

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Authentication against the naming service failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A task was submitted after the registration worker shut down
    #[error("Registration worker is closed")]
    WorkerClosed,
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a selection error
    pub fn selection(policy: impl Into<String>, detected: usize) -> Self {
        Self::Selection {
            policy: policy.into(),
            detected,
        }
    }

    /// Create an address source error
    pub fn address_source(msg: impl Into<String>) -> Self {
        Self::AddressSource(msg.into())
    }

    /// Create a naming-service error
    pub fn naming(naming: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Naming {
            naming: naming.into(),
            message: message.into(),
        }
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Whether this error aborts startup rather than being retried
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Selection { .. } | Self::AddressSource(_)
        )
    }
}
