//! Configuration types for the registrar
//!
//! This module defines all configuration structures used throughout the crate.
//! Configuration is bound once at startup; there is no reload.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// Main registrar configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrarConfig {
    /// Naming service configuration
    #[serde(default)]
    pub naming: NamingConfig,

    /// Local address source configuration
    #[serde(default)]
    pub address_source: AddressSourceConfig,

    /// Instance registration settings
    #[serde(default)]
    pub registration: RegistrationConfig,

    /// Registration worker settings
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl RegistrarConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.naming.validate()?;
        self.address_source.validate()?;
        self.registration.validate()?;
        self.worker.validate()?;
        Ok(())
    }
}

/// Naming service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NamingConfig {
    /// Nacos naming service over its Open API
    Nacos {
        /// Server address, e.g. "http://127.0.0.1:8848"
        server_addr: String,
        /// Namespace id (empty = public)
        #[serde(default)]
        namespace: Option<String>,
        /// Username for Nacos auth
        #[serde(default)]
        username: Option<String>,
        /// Password for Nacos auth
        #[serde(default)]
        password: Option<String>,
        /// Per-request timeout (in seconds)
        #[serde(default = "default_request_timeout_secs")]
        request_timeout_secs: u64,
    },

    /// Custom naming service
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl NamingConfig {
    /// Validate the naming configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            NamingConfig::Nacos {
                server_addr,
                username,
                password,
                request_timeout_secs,
                ..
            } => {
                if server_addr.is_empty() {
                    return Err(crate::Error::config("Nacos server address cannot be empty"));
                }
                if !server_addr.starts_with("http://") && !server_addr.starts_with("https://") {
                    return Err(crate::Error::config(format!(
                        "Nacos server address must use http or https scheme: {}",
                        server_addr
                    )));
                }
                if username.is_some() != password.is_some() {
                    return Err(crate::Error::config(
                        "Nacos username and password must be set together",
                    ));
                }
                if *request_timeout_secs == 0 {
                    return Err(crate::Error::config("Nacos request timeout must be > 0"));
                }
                Ok(())
            }
            NamingConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom naming factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config("Custom naming config cannot be null"));
                }
                Ok(())
            }
        }
    }

    /// Get the naming type name
    pub fn type_name(&self) -> &str {
        match self {
            NamingConfig::Nacos { .. } => "nacos",
            NamingConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for NamingConfig {
    fn default() -> Self {
        NamingConfig::Nacos {
            server_addr: "http://127.0.0.1:8848".to_string(),
            namespace: None,
            username: None,
            password: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Local address source configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AddressSourceConfig {
    /// Enumerate the host's network interfaces
    #[default]
    Interfaces,

    /// Fixed address list
    Static {
        /// Addresses to report as local
        addresses: Vec<IpAddr>,
    },

    /// Custom address source
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl AddressSourceConfig {
    /// Validate the address source configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            AddressSourceConfig::Custom { factory, .. } if factory.is_empty() => Err(
                crate::Error::config("Custom address source factory cannot be empty"),
            ),
            _ => Ok(()),
        }
    }

    /// Get the address source type name
    pub fn type_name(&self) -> &str {
        match self {
            AddressSourceConfig::Interfaces => "interfaces",
            AddressSourceConfig::Static { .. } => "static",
            AddressSourceConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Instance registration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Whether self-registration is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Cluster the instance belongs to
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Group the service belongs to
    #[serde(default = "default_group_name")]
    pub group_name: String,

    /// Service name to register under
    #[serde(default)]
    pub service_name: String,

    /// Load-balancing weight
    #[serde(default = "default_weight")]
    pub weight: f64,

    /// Heartbeat interval (in seconds)
    #[serde(default = "default_heart_beat_interval_secs")]
    pub heart_beat_interval_secs: u64,

    /// Time without heartbeat before the instance is marked unhealthy (in seconds)
    #[serde(default = "default_heart_beat_timeout_secs")]
    pub heart_beat_timeout_secs: u64,

    /// Time without heartbeat before the instance is removed (in seconds)
    #[serde(default = "default_ip_delete_timeout_secs")]
    pub ip_delete_timeout_secs: u64,

    /// Which detected addresses get published
    #[serde(default)]
    pub auto_detect_ip: AddressSelectionPolicy,
}

impl RegistrationConfig {
    /// Create a registration config for `service_name` with defaults
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    /// Enable or disable registration
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the address selection policy
    pub fn with_policy(mut self, policy: AddressSelectionPolicy) -> Self {
        self.auto_detect_ip = policy;
        self
    }

    /// Heartbeat interval as a duration
    pub fn heart_beat_interval(&self) -> Duration {
        Duration::from_secs(self.heart_beat_interval_secs)
    }

    /// Heartbeat timeout as a duration
    pub fn heart_beat_timeout(&self) -> Duration {
        Duration::from_secs(self.heart_beat_timeout_secs)
    }

    /// Delete timeout as a duration
    pub fn ip_delete_timeout(&self) -> Duration {
        Duration::from_secs(self.ip_delete_timeout_secs)
    }

    /// Validate the registration settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.enabled && self.service_name.is_empty() {
            return Err(crate::Error::config(
                "Service name is required when registration is enabled",
            ));
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(crate::Error::config(format!(
                "Weight must be a finite, non-negative number. Got: {}",
                self.weight
            )));
        }
        if self.heart_beat_interval_secs == 0 {
            return Err(crate::Error::config("Heartbeat interval must be > 0"));
        }
        if self.heart_beat_timeout_secs < self.heart_beat_interval_secs {
            return Err(crate::Error::config(
                "Heartbeat timeout must not be shorter than the heartbeat interval",
            ));
        }
        if self.ip_delete_timeout_secs < self.heart_beat_timeout_secs {
            return Err(crate::Error::config(
                "IP delete timeout must not be shorter than the heartbeat timeout",
            ));
        }
        self.auto_detect_ip.validate()
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cluster_name: default_cluster_name(),
            group_name: default_group_name(),
            service_name: String::new(),
            weight: default_weight(),
            heart_beat_interval_secs: default_heart_beat_interval_secs(),
            heart_beat_timeout_secs: default_heart_beat_timeout_secs(),
            ip_delete_timeout_secs: default_ip_delete_timeout_secs(),
            auto_detect_ip: AddressSelectionPolicy::default(),
        }
    }
}

/// Address selection policy
///
/// `mask_bit_len` leading bits of a candidate must equal the same bits of
/// `match`. A mask of 0 accepts every address of the same family as `match`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSelectionPolicy {
    /// Number of leading bits compared
    #[serde(default)]
    pub mask_bit_len: u8,

    /// Literal address whose leading bits form the mask
    #[serde(rename = "match", default = "default_match")]
    pub match_addr: String,

    /// What to do with the remaining candidates
    #[serde(default)]
    pub select_policy: SelectPolicy,
}

impl AddressSelectionPolicy {
    /// Create a policy
    pub fn new(match_addr: impl Into<String>, mask_bit_len: u8, select_policy: SelectPolicy) -> Self {
        Self {
            mask_bit_len,
            match_addr: match_addr.into(),
            select_policy,
        }
    }

    /// Parse the `match` literal
    ///
    /// IPv4-mapped IPv6 literals are treated as the IPv4 address they map.
    pub fn match_ip(&self) -> Result<IpAddr, crate::Error> {
        self.match_addr
            .trim()
            .parse::<IpAddr>()
            .map(|ip| ip.to_canonical())
            .map_err(|_| {
                crate::Error::config(format!("Ip match format error [{}]", self.match_addr))
            })
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<(), crate::Error> {
        let match_ip = self.match_ip()?;
        let width = match match_ip {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if u32::from(self.mask_bit_len) > width {
            return Err(crate::Error::config(format!(
                "Mask length {} exceeds the {}-bit width of match address {}",
                self.mask_bit_len, width, match_ip
            )));
        }
        Ok(())
    }
}

impl Default for AddressSelectionPolicy {
    fn default() -> Self {
        Self {
            mask_bit_len: 0,
            match_addr: default_match(),
            select_policy: SelectPolicy::default(),
        }
    }
}

/// How the filtered candidate set is reduced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectPolicy {
    /// Exactly one candidate must remain
    #[default]
    ExactOne,
    /// Zero candidates skip registration; otherwise take the first
    PickNoneOrFirst,
    /// At least one candidate must remain; take the first
    PickExactFirst,
    /// At least one candidate must remain; take all
    AtLeastOne,
    /// Take whatever remains, possibly nothing
    Any,
}

impl SelectPolicy {
    /// Canonical configuration name
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectPolicy::ExactOne => "EXACT_ONE",
            SelectPolicy::PickNoneOrFirst => "PICK_NONE_OR_FIRST",
            SelectPolicy::PickExactFirst => "PICK_EXACT_FIRST",
            SelectPolicy::AtLeastOne => "AT_LEAST_ONE",
            SelectPolicy::Any => "ANY",
        }
    }
}

impl fmt::Display for SelectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SelectPolicy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EXACT_ONE" => Ok(SelectPolicy::ExactOne),
            "PICK_NONE_OR_FIRST" => Ok(SelectPolicy::PickNoneOrFirst),
            "PICK_EXACT_FIRST" => Ok(SelectPolicy::PickExactFirst),
            "AT_LEAST_ONE" => Ok(SelectPolicy::AtLeastOne),
            "ANY" => Ok(SelectPolicy::Any),
            other => Err(crate::Error::config(format!(
                "Unknown ip select policy [{}]",
                other
            ))),
        }
    }
}

/// Registration worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Fixed delay between failed naming-service attempts (in seconds)
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,

    /// How long shutdown waits for queued tasks (in seconds)
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Capacity of the worker event channel
    ///
    /// When full, new events are dropped with a warning log.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl WorkerConfig {
    /// Retry interval as a duration
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// Shutdown grace period as a duration
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Validate the worker settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Worker event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: default_retry_interval_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_cluster_name() -> String {
    "DEFAULT".to_string()
}

fn default_group_name() -> String {
    "DEFAULT_GROUP".to_string()
}

fn default_weight() -> f64 {
    1.0
}

fn default_heart_beat_interval_secs() -> u64 {
    10
}

fn default_heart_beat_timeout_secs() -> u64 {
    30
}

fn default_ip_delete_timeout_secs() -> u64 {
    90
}

fn default_match() -> String {
    "0.0.0.0".to_string()
}

fn default_retry_interval_secs() -> u64 {
    5
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_event_channel_capacity() -> usize {
    256
}
