//! Client-side heartbeats for ephemeral instances
//!
//! Nacos drops an ephemeral instance once no beat arrives within its
//! heartbeat timeout. The server answers each beat with the interval it
//! wants next and a `code` of 20404 when it no longer knows the instance,
//! in which case the instance is registered again.

use registrar_core::ServiceInstance;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

/// Beat path relative to the server address
pub(crate) const BEAT_PATH: &str = "/nacos/v1/ns/instance/beat";

/// Server code for "instance not found"
pub(crate) const RESOURCE_NOT_FOUND: i64 = 20404;

/// Interval used when the instance carries none
pub(crate) const DEFAULT_BEAT_INTERVAL: Duration = Duration::from_secs(5);

/// The `beat` parameter
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BeatInfo {
    pub service_name: String,
    pub cluster: String,
    pub ip: IpAddr,
    pub port: u16,
    pub weight: f64,
    pub metadata: BTreeMap<String, String>,
    pub scheduled: bool,
    pub period: u64,
}

impl BeatInfo {
    pub(crate) fn new(service_name: &str, group_name: &str, instance: &ServiceInstance) -> Self {
        Self {
            service_name: grouped_name(service_name, group_name),
            cluster: instance.cluster_name.clone(),
            ip: instance.ip,
            port: instance.port,
            weight: instance.weight,
            metadata: instance.metadata.clone(),
            scheduled: false,
            period: beat_interval(instance).as_millis() as u64,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BeatResponse {
    #[serde(default)]
    pub client_beat_interval: Option<u64>,
    #[serde(default)]
    pub code: Option<i64>,
}

impl BeatResponse {
    pub(crate) fn instance_missing(&self) -> bool {
        self.code == Some(RESOURCE_NOT_FOUND)
    }

    /// Interval requested by the server, if any
    pub(crate) fn next_interval(&self) -> Option<Duration> {
        self.client_beat_interval
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// `group@@service`, the form Nacos uses inside beat payloads
pub(crate) fn grouped_name(service_name: &str, group_name: &str) -> String {
    format!("{}@@{}", group_name, service_name)
}

pub(crate) fn beat_interval(instance: &ServiceInstance) -> Duration {
    instance
        .heart_beat_interval()
        .filter(|d| !d.is_zero())
        .unwrap_or(DEFAULT_BEAT_INTERVAL)
}

/// Key identifying one beat task
pub(crate) fn beat_key(service_name: &str, group_name: &str, instance: &ServiceInstance) -> String {
    format!(
        "{}#{}#{}",
        grouped_name(service_name, group_name),
        instance.ip,
        instance.port
    )
}
