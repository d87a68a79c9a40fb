// # registrard - Self-Registering gRPC Server Host
//
// A thin integration layer: all selection, retry and lifecycle logic lives in
// registrar-core. The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Sizing and starting the tokio runtime
// 3. Registering naming services and address sources
// 4. Hosting the gRPC server (health and reflection services) and driving
//    the registration lifecycle around it
// 5. Creating the configured client channels
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Naming Service
// - `REGISTRAR_NAMING_TYPE`: Naming service type (nacos)
// - `REGISTRAR_NACOS_SERVER_ADDR`: Nacos base URL (default http://127.0.0.1:8848)
// - `REGISTRAR_NACOS_NAMESPACE`: Namespace id (optional)
// - `REGISTRAR_NACOS_USERNAME` / `REGISTRAR_NACOS_PASSWORD`: Login (optional, both or neither)
// - `REGISTRAR_NACOS_REQUEST_TIMEOUT_SECS`: Per-request timeout (default 10)
//
// ### Registration
// - `REGISTRAR_ENABLED`: Register this server (default false)
// - `REGISTRAR_SERVICE_NAME`: Service name (required when enabled)
// - `REGISTRAR_GROUP_NAME`, `REGISTRAR_CLUSTER_NAME`, `REGISTRAR_WEIGHT`
// - `REGISTRAR_HEART_BEAT_INTERVAL_SECS`, `REGISTRAR_HEART_BEAT_TIMEOUT_SECS`,
//   `REGISTRAR_IP_DELETE_TIMEOUT_SECS`
//
// ### Address Selection
// - `REGISTRAR_ADDRESS_SOURCE`: Local address source (interfaces, static)
// - `REGISTRAR_STATIC_ADDRESSES`: Comma-separated addresses (for static)
// - `REGISTRAR_IP_MATCH`: Address whose leading bits must match (default 0.0.0.0)
// - `REGISTRAR_IP_MASK_BIT_LEN`: Number of leading bits compared (default 0)
// - `REGISTRAR_IP_SELECT_POLICY`: EXACT_ONE, PICK_NONE_OR_FIRST, PICK_EXACT_FIRST,
//   AT_LEAST_ONE or ANY
//
// ### Registration Worker
// - `REGISTRAR_RETRY_INTERVAL_SECS`: Delay between failed attempts (default 5)
// - `REGISTRAR_SHUTDOWN_GRACE_SECS`: Drain time at shutdown (default 5)
//
// ### gRPC Server
// - `REGISTRAR_SERVER_HOST` / `REGISTRAR_SERVER_PORT`: Bind address (default 0.0.0.0:0)
// - `REGISTRAR_SERVER_MAX_CONCURRENT_CALLS_PER_CONNECTION`
// - `REGISTRAR_SERVER_INITIAL_STREAM_WINDOW`, `REGISTRAR_SERVER_INITIAL_CONNECTION_WINDOW`
// - `REGISTRAR_SERVER_MAX_CONCURRENT_STREAMS`
// - `REGISTRAR_SERVER_KEEPALIVE_INTERVAL_SECS`, `REGISTRAR_SERVER_KEEPALIVE_TIMEOUT_SECS`
// - `REGISTRAR_SERVER_TCP_KEEPALIVE_SECS`
// - `REGISTRAR_SERVER_MAX_CONNECTION_AGE_SECS`
// - `REGISTRAR_SERVER_REQUEST_TIMEOUT_SECS`
//
// ### Client Channels
// - `REGISTRAR_CLIENT_CHANNELS`: Comma-separated channel names
// - `REGISTRAR_CLIENT_<SCOPE>_<OPTION>`: Options for one channel, where SCOPE is
//   the upper-cased channel name (`-` becomes `_`) or `BASIC` for every channel.
//   A channel's own option wins over the BASIC one. Options: `TARGET`,
//   `INITIAL_STREAM_WINDOW`, `INITIAL_CONNECTION_WINDOW`, `KEEPALIVE_INTERVAL_SECS`,
//   `KEEPALIVE_TIMEOUT_SECS`, `KEEPALIVE_WHILE_IDLE`, `USER_AGENT`,
//   `OVERRIDE_AUTHORITY`, `CONNECT_TIMEOUT_SECS`, `REQUEST_TIMEOUT_SECS`,
//   `TCP_KEEPALIVE_SECS`, `CONCURRENCY_LIMIT`
//
// ### Runtime
// - `REGISTRAR_WORKER_THREADS`: Async worker threads (default: one per core)
// - `REGISTRAR_MAX_BLOCKING_THREADS`: Blocking pool size (default 1024)
// - `REGISTRAR_THREAD_KEEP_ALIVE_SECS`: Idle blocking thread lifetime (default 60)
// - `REGISTRAR_THREAD_NAME_PREFIX`: Thread name (default registrar-grpc)
// - `REGISTRAR_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export REGISTRAR_ENABLED=true
// export REGISTRAR_SERVICE_NAME=greeter
// export REGISTRAR_NACOS_SERVER_ADDR=http://nacos.internal:8848
// export REGISTRAR_SERVER_PORT=9090
// export REGISTRAR_IP_MATCH=10.0.0.0
// export REGISTRAR_IP_MASK_BIT_LEN=8
//
// registrard
// ```

use anyhow::{Context, Result, anyhow};
use registrar_core::{
    AddressSelectionPolicy, AddressSourceConfig, NamingConfig, PluginRegistry, RegistrarConfig,
    RegistrationConfig, SelectPolicy, WorkerConfig, WorkerEvent,
};
use registrard::channels::{ChannelOptions, ClientChannels, ClientConfig};
use registrard::server::{GrpcHost, RunningServer, ServerOptions};
use std::env;
use std::fmt::Display;
use std::future::Future;
use std::net::IpAddr;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegistrarExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<RegistrarExitCode> for ExitCode {
    fn from(code: RegistrarExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// tokio runtime sizing
#[derive(Debug, Clone, PartialEq)]
struct ThreadPoolConfig {
    worker_threads: Option<usize>,
    max_blocking_threads: usize,
    thread_keep_alive: Duration,
    thread_name_prefix: String,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            max_blocking_threads: 1024,
            thread_keep_alive: Duration::from_secs(60),
            thread_name_prefix: "registrar-grpc".to_string(),
        }
    }
}

impl ThreadPoolConfig {
    fn build_runtime(&self) -> std::io::Result<tokio::runtime::Runtime> {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder
            .enable_all()
            .max_blocking_threads(self.max_blocking_threads)
            .thread_keep_alive(self.thread_keep_alive)
            .thread_name(self.thread_name_prefix.clone());
        if let Some(threads) = self.worker_threads {
            builder.worker_threads(threads);
        }
        builder.build()
    }
}

/// Application configuration
struct Config {
    registrar: RegistrarConfig,
    server: ServerOptions,
    clients: ClientConfig,
    thread_pool: ThreadPoolConfig,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns the raw value of a variable
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let naming = match var("REGISTRAR_NAMING_TYPE").as_deref().unwrap_or("nacos") {
            "nacos" => NamingConfig::Nacos {
                server_addr: var("REGISTRAR_NACOS_SERVER_ADDR")
                    .unwrap_or_else(|| "http://127.0.0.1:8848".to_string()),
                namespace: var("REGISTRAR_NACOS_NAMESPACE"),
                username: var("REGISTRAR_NACOS_USERNAME"),
                password: var("REGISTRAR_NACOS_PASSWORD"),
                request_timeout_secs: parse(&var, "REGISTRAR_NACOS_REQUEST_TIMEOUT_SECS")?.unwrap_or(10),
            },
            other => anyhow::bail!(
                "REGISTRAR_NAMING_TYPE '{}' is not supported. Supported types: nacos",
                other
            ),
        };

        let address_source = match var("REGISTRAR_ADDRESS_SOURCE").as_deref().unwrap_or("interfaces") {
            "interfaces" => AddressSourceConfig::Interfaces,
            "static" => AddressSourceConfig::Static {
                addresses: parse_list::<IpAddr>(&var, "REGISTRAR_STATIC_ADDRESSES")?,
            },
            other => anyhow::bail!(
                "REGISTRAR_ADDRESS_SOURCE '{}' is not supported. Supported types: interfaces, static",
                other
            ),
        };

        let defaults = RegistrationConfig::default();
        let registration = RegistrationConfig {
            enabled: parse(&var, "REGISTRAR_ENABLED")?.unwrap_or(false),
            cluster_name: var("REGISTRAR_CLUSTER_NAME").unwrap_or(defaults.cluster_name),
            group_name: var("REGISTRAR_GROUP_NAME").unwrap_or(defaults.group_name),
            service_name: var("REGISTRAR_SERVICE_NAME").unwrap_or_default(),
            weight: parse(&var, "REGISTRAR_WEIGHT")?.unwrap_or(defaults.weight),
            heart_beat_interval_secs: parse(&var, "REGISTRAR_HEART_BEAT_INTERVAL_SECS")?
                .unwrap_or(defaults.heart_beat_interval_secs),
            heart_beat_timeout_secs: parse(&var, "REGISTRAR_HEART_BEAT_TIMEOUT_SECS")?
                .unwrap_or(defaults.heart_beat_timeout_secs),
            ip_delete_timeout_secs: parse(&var, "REGISTRAR_IP_DELETE_TIMEOUT_SECS")?
                .unwrap_or(defaults.ip_delete_timeout_secs),
            auto_detect_ip: AddressSelectionPolicy::new(
                var("REGISTRAR_IP_MATCH").unwrap_or(defaults.auto_detect_ip.match_addr),
                parse(&var, "REGISTRAR_IP_MASK_BIT_LEN")?.unwrap_or(defaults.auto_detect_ip.mask_bit_len),
                parse::<SelectPolicy>(&var, "REGISTRAR_IP_SELECT_POLICY")?
                    .unwrap_or(defaults.auto_detect_ip.select_policy),
            ),
        };

        let worker_defaults = WorkerConfig::default();
        let worker = WorkerConfig {
            retry_interval_secs: parse(&var, "REGISTRAR_RETRY_INTERVAL_SECS")?
                .unwrap_or(worker_defaults.retry_interval_secs),
            shutdown_grace_secs: parse(&var, "REGISTRAR_SHUTDOWN_GRACE_SECS")?
                .unwrap_or(worker_defaults.shutdown_grace_secs),
            ..worker_defaults
        };

        let secs = |key: &str| -> Result<Option<Duration>> {
            Ok(parse::<u64>(&var, key)?.map(Duration::from_secs))
        };
        let server_defaults = ServerOptions::default();
        let server = ServerOptions {
            host: var("REGISTRAR_SERVER_HOST").unwrap_or(server_defaults.host),
            port: parse(&var, "REGISTRAR_SERVER_PORT")?.unwrap_or(server_defaults.port),
            concurrency_limit_per_connection: parse(&var, "REGISTRAR_SERVER_MAX_CONCURRENT_CALLS_PER_CONNECTION")?,
            initial_stream_window_size: parse(&var, "REGISTRAR_SERVER_INITIAL_STREAM_WINDOW")?,
            initial_connection_window_size: parse(&var, "REGISTRAR_SERVER_INITIAL_CONNECTION_WINDOW")?,
            max_concurrent_streams: parse(&var, "REGISTRAR_SERVER_MAX_CONCURRENT_STREAMS")?,
            http2_keepalive_interval: secs("REGISTRAR_SERVER_KEEPALIVE_INTERVAL_SECS")?,
            http2_keepalive_timeout: secs("REGISTRAR_SERVER_KEEPALIVE_TIMEOUT_SECS")?,
            tcp_keepalive: secs("REGISTRAR_SERVER_TCP_KEEPALIVE_SECS")?,
            max_connection_age: secs("REGISTRAR_SERVER_MAX_CONNECTION_AGE_SECS")?,
            request_timeout: secs("REGISTRAR_SERVER_REQUEST_TIMEOUT_SECS")?,
        };

        let clients = ClientConfig {
            basic: channel_options(&var, "BASIC")?,
            channels: parse_list::<String>(&var, "REGISTRAR_CLIENT_CHANNELS")?
                .into_iter()
                .map(|name| {
                    let scope = name.to_uppercase().replace('-', "_");
                    Ok((name, channel_options(&var, &scope)?))
                })
                .collect::<Result<_>>()?,
        };

        let pool_defaults = ThreadPoolConfig::default();
        let thread_pool = ThreadPoolConfig {
            worker_threads: parse(&var, "REGISTRAR_WORKER_THREADS")?,
            max_blocking_threads: parse(&var, "REGISTRAR_MAX_BLOCKING_THREADS")?
                .unwrap_or(pool_defaults.max_blocking_threads),
            thread_keep_alive: secs("REGISTRAR_THREAD_KEEP_ALIVE_SECS")?
                .unwrap_or(pool_defaults.thread_keep_alive),
            thread_name_prefix: var("REGISTRAR_THREAD_NAME_PREFIX").unwrap_or(pool_defaults.thread_name_prefix),
        };

        Ok(Self {
            registrar: RegistrarConfig {
                naming,
                address_source,
                registration,
                worker,
            },
            server,
            clients,
            thread_pool,
            log_level: var("REGISTRAR_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.registrar.validate()?;

        #[cfg(not(feature = "nacos"))]
        {
            if matches!(self.registrar.naming, NamingConfig::Nacos { .. }) {
                anyhow::bail!("REGISTRAR_NAMING_TYPE 'nacos' requires the nacos feature");
            }
        }

        #[cfg(not(feature = "ip-local"))]
        {
            if matches!(self.registrar.address_source, AddressSourceConfig::Interfaces) {
                anyhow::bail!(
                    "REGISTRAR_ADDRESS_SOURCE 'interfaces' requires the ip-local feature. \
                    Use REGISTRAR_ADDRESS_SOURCE=static instead."
                );
            }
        }

        if let AddressSourceConfig::Static { addresses } = &self.registrar.address_source
            && addresses.is_empty()
        {
            anyhow::bail!(
                "REGISTRAR_STATIC_ADDRESSES must contain at least one address \
                when REGISTRAR_ADDRESS_SOURCE=static"
            );
        }

        if self.server.host.is_empty() {
            anyhow::bail!("REGISTRAR_SERVER_HOST cannot be empty");
        }

        if self.server.concurrency_limit_per_connection == Some(0) {
            anyhow::bail!("REGISTRAR_SERVER_MAX_CONCURRENT_CALLS_PER_CONNECTION must be > 0");
        }

        if self.clients.channels.values().any(|own| own.concurrency_limit == Some(0))
            || self.clients.basic.concurrency_limit == Some(0)
        {
            anyhow::bail!("REGISTRAR_CLIENT_*_CONCURRENCY_LIMIT must be > 0");
        }
        self.clients.endpoints()?;

        if self.thread_pool.worker_threads == Some(0) {
            anyhow::bail!("REGISTRAR_WORKER_THREADS must be > 0");
        }

        if self.thread_pool.max_blocking_threads == 0 {
            anyhow::bail!("REGISTRAR_MAX_BLOCKING_THREADS must be > 0");
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "REGISTRAR_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    var(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| anyhow!("{} has invalid value '{}': {}", key, raw, e))
        })
        .transpose()
}

/// Options of one client channel scope, read from `REGISTRAR_CLIENT_<scope>_*`
fn channel_options(var: &impl Fn(&str) -> Option<String>, scope: &str) -> Result<ChannelOptions> {
    let key = |option: &str| format!("REGISTRAR_CLIENT_{}_{}", scope, option);
    let secs = |option: &str| -> Result<Option<Duration>> {
        Ok(parse::<u64>(var, &key(option))?.map(Duration::from_secs))
    };

    Ok(ChannelOptions {
        target: var(&key("TARGET")),
        initial_stream_window_size: parse(var, &key("INITIAL_STREAM_WINDOW"))?,
        initial_connection_window_size: parse(var, &key("INITIAL_CONNECTION_WINDOW"))?,
        keep_alive_interval: secs("KEEPALIVE_INTERVAL_SECS")?,
        keep_alive_timeout: secs("KEEPALIVE_TIMEOUT_SECS")?,
        keep_alive_while_idle: parse(var, &key("KEEPALIVE_WHILE_IDLE"))?,
        user_agent: var(&key("USER_AGENT")),
        override_authority: var(&key("OVERRIDE_AUTHORITY")),
        connect_timeout: secs("CONNECT_TIMEOUT_SECS")?,
        request_timeout: secs("REQUEST_TIMEOUT_SECS")?,
        tcp_keepalive: secs("TCP_KEEPALIVE_SECS")?,
        concurrency_limit: parse(var, &key("CONCURRENCY_LIMIT"))?,
    })
}

fn parse_list<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Vec<T>>
where
    T: FromStr,
    T::Err: Display,
{
    var(key)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<T>()
                .map_err(|e| anyhow!("{} has invalid entry '{}': {}", key, s, e))
        })
        .collect()
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return RegistrarExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return RegistrarExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return RegistrarExitCode::ConfigError.into();
    }

    info!("Starting registrard");
    info!(
        "Naming service: {}, address source: {}, registration {}",
        config.registrar.naming.type_name(),
        config.registrar.address_source.type_name(),
        if config.registrar.registration.enabled { "enabled" } else { "disabled" }
    );

    let rt = match config.thread_pool.build_runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return RegistrarExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        let shutdown = match shutdown_signal() {
            Ok(signal) => signal,
            Err(e) => {
                error!("{:#}", e);
                return RegistrarExitCode::RuntimeError;
            }
        };

        let (running, channels) = match start(config).await {
            Ok(started) => started,
            Err(e) => {
                error!("Startup failed: {:#}", e);
                return RegistrarExitCode::ConfigError;
            }
        };
        info!("registrard serving on {}", running.local_addr());

        let code = match running.serve(shutdown).await {
            Ok(()) => RegistrarExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                RegistrarExitCode::RuntimeError
            }
        };
        drop(channels);
        code
    });

    code.into()
}

/// Wire the registrar, create the client channels and bring the server up
///
/// The channels live until the server stops.
async fn start(
    config: Config,
) -> Result<(
    RunningServer<impl tonic_health::pb::health_server::Health, impl tonic_reflection::server::v1::ServerReflection>,
    ClientChannels,
)> {
    let channels = ClientChannels::connect_lazy(&config.clients)?;
    if channels.is_empty() {
        debug!("No client channels configured");
    }
    for name in channels.names() {
        info!("Client channel '{}' created, connects on first call", name);
    }

    let registry = PluginRegistry::new();

    #[cfg(feature = "nacos")]
    {
        info!("Registering Nacos naming service");
        registrar_nacos::register(&registry);
    }

    #[cfg(feature = "ip-local")]
    {
        info!("Registering local interface address source");
        registrar_ip_local::register(&registry);
    }

    let grace = config.registrar.worker.shutdown_grace();
    let (lifecycle, events) = registry
        .build_lifecycle(&config.registrar)
        .context("Failed to build registration lifecycle")?;
    tokio::spawn(log_worker_events(events));

    info!("Instance id: {}", lifecycle.instance_id());
    let running = GrpcHost::new(config.server, Arc::new(lifecycle), grace).start().await?;
    Ok((running, channels))
}

/// Drain worker events; failures are already logged by the worker itself
async fn log_worker_events(mut events: mpsc::Receiver<WorkerEvent>) {
    while let Some(event) = events.recv().await {
        debug!("Registration worker event: {:?}", event);
    }
}

/// Install SIGTERM/SIGINT handlers
///
/// Installed before startup so a signal during startup is not lost.
#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = &'static str> + Send> {
    let mut sigterm =
        signal(SignalKind::terminate()).map_err(|e| anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint =
        signal(SignalKind::interrupt()).map_err(|e| anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        }
    })
}

/// Fallback implementation for non-Unix platforms (SIGINT only)
#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl Future<Output = &'static str> + Send> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        "SIGINT"
    })
}
