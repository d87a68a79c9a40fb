// # Nacos Naming Service
//
// This crate provides a Nacos naming service client over the Nacos v1 Open API.
//
// ## Behavior
//
// - One HTTP request per register/deregister call
// - Full error propagation; retry is owned by the registration worker
// - Ephemeral instances get a background heartbeat task after registering,
//   stopped again by deregistering
// - Optional username/password login with a cached access token
//
// ## Security Requirements
//
// - The password NEVER appears in logs or Debug output
// - The login response body is never echoed into errors
//
// ## API Reference
//
// - Register: POST `/nacos/v1/ns/instance`
// - Deregister: DELETE `/nacos/v1/ns/instance`
// - Heartbeat: PUT `/nacos/v1/ns/instance/beat`
// - Login: POST `/nacos/v1/auth/login`

mod auth;
mod beat;

pub use auth::Credentials;

use async_trait::async_trait;
use beat::{BEAT_PATH, BeatInfo, BeatResponse};
use registrar_core::config::NamingConfig;
use registrar_core::traits::{NamingService, NamingServiceFactory};
use registrar_core::{Error, PluginRegistry, Result, ServiceInstance};
use reqwest::Method;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Instance path relative to the server address
const INSTANCE_PATH: &str = "/nacos/v1/ns/instance";

/// Nacos naming service client
///
/// # Security
///
/// The Debug implementation does NOT expose the password.
pub struct NacosNamingClient {
    api: Arc<NacosApi>,

    /// Heartbeat tasks, keyed by `group@@service#ip#port`
    beats: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl std::fmt::Debug for NacosNamingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NacosNamingClient")
            .field("server_addr", &self.api.server_addr)
            .field("namespace", &self.api.namespace)
            .field("credentials", &self.api.auth.credentials())
            .field("active_beats", &self.active_beats())
            .finish()
    }
}

impl NacosNamingClient {
    /// Create a new Nacos client
    ///
    /// # Parameters
    ///
    /// - `server_addr`: Base URL, e.g. `http://127.0.0.1:8848`
    /// - `namespace`: Namespace id; `None` means the public namespace
    /// - `credentials`: Username/password when Nacos auth is enabled
    /// - `request_timeout`: Per-request HTTP timeout
    pub fn new(
        server_addr: impl Into<String>,
        namespace: Option<String>,
        credentials: Option<Credentials>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        let api = NacosApi {
            server_addr: server_addr.into().trim_end_matches('/').to_string(),
            namespace: namespace.unwrap_or_default(),
            http,
            auth: auth::TokenCache::new(credentials),
        };

        Ok(Self {
            api: Arc::new(api),
            beats: Mutex::new(HashMap::new()),
        })
    }

    /// Number of instances currently being heartbeated
    pub fn active_beats(&self) -> usize {
        self.beat_tasks().len()
    }

    fn beat_tasks(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.beats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start_beat(&self, service_name: &str, group_name: &str, instance: &ServiceInstance) {
        let key = beat::beat_key(service_name, group_name, instance);
        let task = tokio::spawn(beat_loop(
            Arc::clone(&self.api),
            service_name.to_string(),
            group_name.to_string(),
            instance.clone(),
        ));

        if let Some(previous) = self.beat_tasks().insert(key, task) {
            previous.abort();
        }
    }

    fn stop_beat(&self, service_name: &str, group_name: &str, instance: &ServiceInstance) {
        let key = beat::beat_key(service_name, group_name, instance);
        if let Some(task) = self.beat_tasks().remove(&key) {
            task.abort();
            tracing::debug!("Stopped heartbeat for {}", key);
        }
    }
}

impl Drop for NacosNamingClient {
    fn drop(&mut self) {
        for (_, task) in self.beat_tasks().drain() {
            task.abort();
        }
    }
}

#[async_trait]
impl NamingService for NacosNamingClient {
    /// Register an instance
    ///
    /// # API Call
    ///
    /// ```http
    /// POST /nacos/v1/ns/instance?serviceName=..&groupName=..&ip=..&port=..
    /// ```
    async fn register_instance(
        &self,
        service_name: &str,
        group_name: &str,
        instance: &ServiceInstance,
    ) -> Result<()> {
        tracing::info!(
            "Registering {} with Nacos at {}",
            instance,
            self.api.server_addr
        );

        self.api.register(service_name, group_name, instance).await?;

        if instance.ephemeral {
            self.start_beat(service_name, group_name, instance);
        }
        Ok(())
    }

    /// Deregister an instance
    ///
    /// The heartbeat stops first so it cannot re-create the instance.
    ///
    /// # API Call
    ///
    /// ```http
    /// DELETE /nacos/v1/ns/instance?serviceName=..&groupName=..&ip=..&port=..
    /// ```
    async fn deregister_instance(
        &self,
        service_name: &str,
        group_name: &str,
        instance: &ServiceInstance,
    ) -> Result<()> {
        tracing::info!(
            "Deregistering {} from Nacos at {}",
            instance,
            self.api.server_addr
        );

        self.stop_beat(service_name, group_name, instance);
        self.api.deregister(service_name, group_name, instance).await
    }

    fn naming_name(&self) -> &'static str {
        "nacos"
    }
}

/// Shared HTTP side of the client, also used by the beat tasks
struct NacosApi {
    server_addr: String,
    namespace: String,
    http: reqwest::Client,
    auth: auth::TokenCache,
}

impl NacosApi {
    async fn register(&self, service_name: &str, group_name: &str, instance: &ServiceInstance) -> Result<()> {
        let params = register_params(service_name, group_name, &self.namespace, instance)?;
        self.send(Method::POST, INSTANCE_PATH, params, "Register").await?;
        Ok(())
    }

    async fn deregister(&self, service_name: &str, group_name: &str, instance: &ServiceInstance) -> Result<()> {
        let params = deregister_params(service_name, group_name, &self.namespace, instance);
        self.send(Method::DELETE, INSTANCE_PATH, params, "Deregister").await?;
        Ok(())
    }

    async fn beat(&self, service_name: &str, group_name: &str, instance: &ServiceInstance) -> Result<BeatResponse> {
        let beat = BeatInfo::new(service_name, group_name, instance);
        let params = vec![
            ("serviceName", service_name.to_string()),
            ("groupName", group_name.to_string()),
            ("namespaceId", self.namespace.clone()),
            ("ephemeral", "true".to_string()),
            ("beat", serde_json::to_string(&beat)?),
        ];

        let body = self.send(Method::PUT, BEAT_PATH, params, "Heartbeat").await?;
        Ok(serde_json::from_str(&body).unwrap_or_default())
    }

    /// Send one request and map the status
    ///
    /// # Returns
    ///
    /// - `Ok(String)`: Response body
    /// - `Err(Error::Authentication)`: 401/403
    /// - `Err(Error::Naming)`: Any other non-success status
    /// - `Err(Error::Http)`: Transport failure
    async fn send(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&'static str, String)>,
        action: &str,
    ) -> Result<String> {
        if let Some(token) = self.auth.token(&self.http, &self.server_addr).await? {
            params.push(("accessToken", token));
        }

        let url = format!("{}{}", self.server_addr, path);
        let response = self
            .http
            .request(method, &url)
            .query(&params)
            .send()
            .await
            .map_err(|e| Error::http(format!("{} request to Nacos failed: {}", action, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());

        if status.is_success() {
            return Ok(body);
        }

        match status.as_u16() {
            401 | 403 => {
                self.auth.invalidate().await;
                Err(Error::auth(format!(
                    "{} rejected by Nacos: {} - {}",
                    action, status, body
                )))
            }
            500..=599 => Err(Error::naming(
                "nacos",
                format!("Nacos server error (transient): {} - {}", status, body),
            )),
            _ => Err(Error::naming(
                "nacos",
                format!("{} failed: {} - {}", action, status, body),
            )),
        }
    }
}

async fn beat_loop(api: Arc<NacosApi>, service_name: String, group_name: String, instance: ServiceInstance) {
    let mut period = beat::beat_interval(&instance);
    loop {
        tokio::time::sleep(period).await;

        match api.beat(&service_name, &group_name, &instance).await {
            Ok(response) => {
                if response.instance_missing() {
                    tracing::warn!("Nacos no longer knows {}, registering again", instance);
                    if let Err(e) = api.register(&service_name, &group_name, &instance).await {
                        tracing::warn!("Re-registration of {} failed: {}", instance, e);
                    }
                }
                if let Some(next) = response.next_interval() {
                    period = next;
                }
            }
            Err(e) => tracing::warn!("Heartbeat for {} failed: {}", instance, e),
        }
    }
}

fn register_params(
    service_name: &str,
    group_name: &str,
    namespace: &str,
    instance: &ServiceInstance,
) -> Result<Vec<(&'static str, String)>> {
    let mut params = deregister_params(service_name, group_name, namespace, instance);
    params.extend([
        ("weight", instance.weight.to_string()),
        ("enabled", instance.enabled.to_string()),
        ("healthy", instance.healthy.to_string()),
        ("metadata", serde_json::to_string(&instance.metadata)?),
    ]);
    Ok(params)
}

fn deregister_params(
    service_name: &str,
    group_name: &str,
    namespace: &str,
    instance: &ServiceInstance,
) -> Vec<(&'static str, String)> {
    vec![
        ("serviceName", service_name.to_string()),
        ("groupName", group_name.to_string()),
        ("namespaceId", namespace.to_string()),
        ("ip", instance.ip.to_string()),
        ("port", instance.port.to_string()),
        ("clusterName", instance.cluster_name.clone()),
        ("ephemeral", instance.ephemeral.to_string()),
    ]
}

/// Factory for creating Nacos clients
pub struct NacosFactory;

impl NamingServiceFactory for NacosFactory {
    fn create(&self, config: &NamingConfig) -> Result<Box<dyn NamingService>> {
        match config {
            NamingConfig::Nacos {
                server_addr,
                namespace,
                username,
                password,
                request_timeout_secs,
            } => {
                if server_addr.is_empty() {
                    return Err(Error::config("Nacos server address is required"));
                }

                let credentials = match (username, password) {
                    (Some(user), Some(pass)) => Some(Credentials::new(user, pass)),
                    (None, None) => None,
                    _ => {
                        return Err(Error::config(
                            "Nacos username and password must be set together",
                        ));
                    }
                };

                let client = NacosNamingClient::new(
                    server_addr.clone(),
                    namespace.clone().filter(|ns| !ns.is_empty()),
                    credentials,
                    Duration::from_secs(*request_timeout_secs),
                )?;
                tracing::info!("Created Nacos naming client: {:?}", client);
                Ok(Box::new(client))
            }
            _ => Err(Error::config("Invalid config for Nacos naming service")),
        }
    }
}

/// Register the Nacos naming service with a registry
pub fn register(registry: &PluginRegistry) {
    registry.register_naming("nacos", Box::new(NacosFactory));
}
