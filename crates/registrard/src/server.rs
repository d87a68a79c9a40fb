//! gRPC server host
//!
//! Startup is split in two so that a failed start can be told apart from a
//! failure while serving:
//!
//! 1. [`GrpcHost::start`] binds the listener, marks health SERVING and hands
//!    the bound address to every lifecycle callback
//! 2. [`RunningServer::serve`] serves until the shutdown signal fires, then
//!    marks health NOT_SERVING, stops the callbacks and drains registration
//!
//! A callback that rejects the start stops the ones started before it. A
//! server that fails while serving runs the same stop sequence as a signal.

use anyhow::{Context, Result};
use registrar_core::{RegistrationLifecycle, ServerInfo, ServerLifecycleCallback};
use std::fmt::Display;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tonic::transport::Server;
use tonic::transport::server::TcpIncoming;
use tonic_health::ServingStatus;
use tonic_health::pb::health_server::{Health, HealthServer};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::v1::{ServerReflection, ServerReflectionServer};
use tracing::{error, info, warn};

/// Overall health, as reported for the empty service name
const SERVER_HEALTH: &str = "";

/// Transport options passed through to tonic
#[derive(Debug, Clone, PartialEq)]
pub struct ServerOptions {
    pub host: String,
    /// 0 binds an ephemeral port
    pub port: u16,
    pub concurrency_limit_per_connection: Option<usize>,
    pub initial_stream_window_size: Option<u32>,
    pub initial_connection_window_size: Option<u32>,
    pub max_concurrent_streams: Option<u32>,
    pub http2_keepalive_interval: Option<Duration>,
    pub http2_keepalive_timeout: Option<Duration>,
    pub tcp_keepalive: Option<Duration>,
    pub max_connection_age: Option<Duration>,
    pub request_timeout: Option<Duration>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            concurrency_limit_per_connection: None,
            initial_stream_window_size: None,
            initial_connection_window_size: None,
            max_concurrent_streams: None,
            http2_keepalive_interval: None,
            http2_keepalive_timeout: None,
            tcp_keepalive: None,
            max_connection_age: None,
            request_timeout: None,
        }
    }
}

impl ServerOptions {
    fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    fn builder(&self) -> Server {
        let mut builder = Server::builder()
            .initial_stream_window_size(self.initial_stream_window_size)
            .initial_connection_window_size(self.initial_connection_window_size)
            .max_concurrent_streams(self.max_concurrent_streams)
            .http2_keepalive_interval(self.http2_keepalive_interval)
            .http2_keepalive_timeout(self.http2_keepalive_timeout);

        if let Some(limit) = self.concurrency_limit_per_connection {
            builder = builder.concurrency_limit_per_connection(limit);
        }
        if let Some(age) = self.max_connection_age {
            builder = builder.max_connection_age(age);
        }
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        builder
    }
}

/// Server host that drives lifecycle callbacks around a tonic server
pub struct GrpcHost {
    options: ServerOptions,
    callbacks: Vec<Arc<dyn ServerLifecycleCallback>>,
    registration: Arc<RegistrationLifecycle>,
    shutdown_grace: Duration,
}

impl GrpcHost {
    /// Create a host whose first callback is `registration`
    pub fn new(options: ServerOptions, registration: Arc<RegistrationLifecycle>, shutdown_grace: Duration) -> Self {
        Self {
            options,
            callbacks: vec![registration.clone() as Arc<dyn ServerLifecycleCallback>],
            registration,
            shutdown_grace,
        }
    }

    /// Bind and notify callbacks
    ///
    /// # Returns
    ///
    /// - `Ok(RunningServer)`: Listening; connections queue until `serve`
    /// - `Err`: Bind failed or a callback rejected the start; callbacks
    ///   already started are stopped and registration is drained first
    pub async fn start(self) -> Result<RunningServer<impl Health, impl ServerReflection>> {
        let bind_addr = self.options.bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("Failed to bind gRPC server on {}", bind_addr))?;
        let local_addr = listener.local_addr()?;

        let (health, health_service) = tonic_health::server::health_reporter();
        health.set_service_status(SERVER_HEALTH, ServingStatus::Serving).await;
        info!("gRPC server listening on {}", local_addr);

        let reflection = reflection_service()?;

        let server_info = ServerInfo::new([local_addr]);
        for (started, callback) in self.callbacks.iter().enumerate() {
            if let Err(e) = callback.on_start(&server_info) {
                error!("Lifecycle callback rejected server start: {}", e);
                let stop = StopSequence {
                    health,
                    callbacks: self.callbacks[..started].to_vec(),
                    registration: self.registration,
                    grace: self.shutdown_grace,
                };
                stop.run().await;
                return Err(e.into());
            }
        }

        Ok(RunningServer {
            listener,
            local_addr,
            tcp_keepalive: self.options.tcp_keepalive,
            builder: self.options.builder(),
            health_service,
            reflection,
            stop: StopSequence {
                health,
                callbacks: self.callbacks,
                registration: self.registration,
                grace: self.shutdown_grace,
            },
        })
    }
}

/// Reflection over every service the host serves
fn reflection_service() -> Result<ServerReflectionServer<impl ServerReflection>> {
    tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(tonic_health::pb::FILE_DESCRIPTOR_SET)
        .build_v1()
        .context("Failed to build reflection service")
}

/// Ordered teardown shared by a rejected start, a shutdown signal and a
/// failed server
///
/// Safe to run more than once: `on_stop` and the worker drain are idempotent.
struct StopSequence {
    health: HealthReporter,
    callbacks: Vec<Arc<dyn ServerLifecycleCallback>>,
    registration: Arc<RegistrationLifecycle>,
    grace: Duration,
}

impl StopSequence {
    async fn run(&self) {
        self.health
            .set_service_status(SERVER_HEALTH, ServingStatus::NotServing)
            .await;
        for callback in self.callbacks.iter().rev() {
            callback.on_stop();
        }
        if !self.registration.shutdown(self.grace).await {
            warn!(
                "Registration worker did not drain within {:?}, pending tasks abandoned",
                self.grace
            );
        }
    }

    /// Stop after the server returned, unless the signal path already did
    async fn settle<E: Display>(&self, served: std::result::Result<(), E>) -> std::result::Result<(), E> {
        if let Err(e) = &served {
            error!("gRPC server failed: {}", e);
            self.run().await;
        }
        served
    }
}

/// A bound server whose callbacks have been started
pub struct RunningServer<H, R> {
    listener: TcpListener,
    local_addr: SocketAddr,
    tcp_keepalive: Option<Duration>,
    builder: Server,
    health_service: HealthServer<H>,
    reflection: ServerReflectionServer<R>,
    stop: StopSequence,
}

impl<H: Health, R: ServerReflection> RunningServer<H, R> {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until `signal` resolves, then shut down in order
    pub async fn serve<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = &'static str> + Send,
    {
        let RunningServer {
            listener,
            tcp_keepalive,
            mut builder,
            health_service,
            reflection,
            stop,
            ..
        } = self;

        let incoming = TcpIncoming::from(listener).with_keepalive(tcp_keepalive);
        let on_signal = &stop;
        let stopping = async move {
            let name = signal.await;
            info!("Received {}, shutting down", name);
            on_signal.run().await;
        };

        let served = builder
            .add_service(health_service)
            .add_service(reflection)
            .serve_with_incoming_shutdown(incoming, stopping)
            .await;
        stop.settle(served).await?;

        info!("gRPC server stopped");
        Ok(())
    }
}
