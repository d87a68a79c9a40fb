//! Background registration worker
//!
//! Naming-service calls never run on the caller's thread. Lifecycle
//! callbacks enqueue [`RegistrationTask`]s and return; a single task drains
//! the queue strictly in submission order.
//!
//! ## Retry
//!
//! A failed call is retried after a fixed interval, indefinitely. The worker
//! does not move on to the next task until the current one succeeds, so a
//! deregistration can never overtake the registration it undoes.
//!
//! ```text
//! submit() ──▶ [ FIFO queue ] ──▶ worker task ──▶ NamingService
//!                                      │
//!                                      └──▶ WorkerEvent channel
//! ```
//!
//! ## Shutdown
//!
//! [`RegistrationWorker::shutdown`] closes the queue, lets the worker drain
//! what is already queued for up to a grace period, then aborts it.

use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::traits::{NamingService, ServiceInstance};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Unit of work for the naming service
#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationTask {
    /// Publish an instance
    Register {
        service_name: String,
        group_name: String,
        instance: Arc<ServiceInstance>,
    },

    /// Retract an instance
    Deregister {
        service_name: String,
        group_name: String,
        instance: Arc<ServiceInstance>,
    },
}

impl RegistrationTask {
    /// Register task for `instance`, addressed by its own service and group
    pub fn register(instance: Arc<ServiceInstance>) -> Self {
        Self::Register {
            service_name: instance.service_name.clone(),
            group_name: instance.group_name.clone(),
            instance,
        }
    }

    /// Deregister task for `instance`, addressed by its own service and group
    pub fn deregister(instance: Arc<ServiceInstance>) -> Self {
        Self::Deregister {
            service_name: instance.service_name.clone(),
            group_name: instance.group_name.clone(),
            instance,
        }
    }

    /// Which operation this task performs
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Register { .. } => TaskKind::Register,
            Self::Deregister { .. } => TaskKind::Deregister,
        }
    }

    /// The instance this task is about
    pub fn instance(&self) -> &Arc<ServiceInstance> {
        match self {
            Self::Register { instance, .. } | Self::Deregister { instance, .. } => instance,
        }
    }
}

/// Operation performed by a [`RegistrationTask`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Register,
    Deregister,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register => write!(f, "register"),
            Self::Deregister => write!(f, "deregister"),
        }
    }
}

/// Events emitted by the registration worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A naming-service call failed and will be retried
    AttemptFailed {
        kind: TaskKind,
        instance_id: String,
        attempt: usize,
        error: String,
    },

    /// Instance published
    Registered {
        instance_id: String,
        endpoint: std::net::SocketAddr,
        attempts: usize,
    },

    /// Instance retracted
    Deregistered {
        instance_id: String,
        endpoint: std::net::SocketAddr,
        attempts: usize,
    },

    /// Queue closed and fully drained
    Stopped,
}

/// Single-consumer FIFO worker in front of a [`NamingService`]
///
/// Must be created inside a tokio runtime; the worker task is spawned
/// immediately.
pub struct RegistrationWorker {
    tx: Mutex<Option<mpsc::UnboundedSender<RegistrationTask>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    naming_name: &'static str,
}

impl RegistrationWorker {
    /// Spawn a worker for `naming`
    ///
    /// # Returns
    ///
    /// A tuple of (worker, event_receiver) where event_receiver yields worker events
    pub fn new(
        naming: Arc<dyn NamingService>,
        config: WorkerConfig,
    ) -> Result<(Self, mpsc::Receiver<WorkerEvent>)> {
        config.validate()?;

        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
        let naming_name = naming.naming_name();

        let runner = Runner {
            naming,
            retry_interval: config.retry_interval(),
            event_tx,
        };
        let handle = tokio::spawn(runner.run(task_rx));

        let worker = Self {
            tx: Mutex::new(Some(task_tx)),
            handle: Mutex::new(Some(handle)),
            naming_name,
        };

        Ok((worker, event_rx))
    }

    /// Enqueue a task without waiting for it to run
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Task queued behind everything submitted before it
    /// - `Err(Error::WorkerClosed)`: The worker was shut down
    pub fn submit(&self, task: RegistrationTask) -> Result<()> {
        let tx = lock(&self.tx);
        let tx = tx.as_ref().ok_or(Error::WorkerClosed)?;

        debug!(
            "Queueing {} of {} with {}",
            task.kind(),
            task.instance(),
            self.naming_name
        );
        tx.send(task).map_err(|_| Error::WorkerClosed)
    }

    /// Whether the worker still accepts tasks
    pub fn is_open(&self) -> bool {
        lock(&self.tx).is_some()
    }

    /// Close the queue and wait up to `grace` for it to drain
    ///
    /// Tasks still pending when the grace period ends are abandoned.
    ///
    /// # Returns
    ///
    /// `true` if every queued task completed, `false` if the worker was aborted
    pub async fn shutdown(&self, grace: Duration) -> bool {
        drop(lock(&self.tx).take());

        let Some(mut handle) = lock(&self.handle).take() else {
            return true;
        };

        match tokio::time::timeout(grace, &mut handle).await {
            Ok(_) => {
                info!("Registration worker drained");
                true
            }
            Err(_) => {
                warn!(
                    "Registration worker did not drain within {:?}, abandoning pending tasks",
                    grace
                );
                handle.abort();
                false
            }
        }
    }
}

impl Drop for RegistrationWorker {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.handle).take() {
            handle.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Runner {
    naming: Arc<dyn NamingService>,
    retry_interval: Duration,
    event_tx: mpsc::Sender<WorkerEvent>,
}

impl Runner {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<RegistrationTask>) {
        while let Some(task) = rx.recv().await {
            self.process(task).await;
        }
        debug!("Registration queue closed");
        self.emit_event(WorkerEvent::Stopped);
    }

    /// Run one task to completion, retrying forever
    async fn process(&self, task: RegistrationTask) {
        let kind = task.kind();
        let instance = task.instance().clone();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = match &task {
                RegistrationTask::Register {
                    service_name,
                    group_name,
                    instance,
                } => {
                    self.naming
                        .register_instance(service_name, group_name, instance)
                        .await
                }
                RegistrationTask::Deregister {
                    service_name,
                    group_name,
                    instance,
                } => {
                    self.naming
                        .deregister_instance(service_name, group_name, instance)
                        .await
                }
            };

            match outcome {
                Ok(()) => {
                    let endpoint = instance.endpoint();
                    let instance_id = instance.instance_id.clone();
                    match kind {
                        TaskKind::Register => {
                            info!("Registered {} with {}", instance, self.naming.naming_name());
                            self.emit_event(WorkerEvent::Registered {
                                instance_id,
                                endpoint,
                                attempts: attempt,
                            });
                        }
                        TaskKind::Deregister => {
                            info!("Deregistered {} from {}", instance, self.naming.naming_name());
                            self.emit_event(WorkerEvent::Deregistered {
                                instance_id,
                                endpoint,
                                attempts: attempt,
                            });
                        }
                    }
                    return;
                }
                Err(e) => {
                    error!(
                        "{} attempt {} failed for {}: {}; retrying in {:?}",
                        kind, attempt, instance, e, self.retry_interval
                    );
                    self.emit_event(WorkerEvent::AttemptFailed {
                        kind,
                        instance_id: instance.instance_id.clone(),
                        attempt,
                        error: e.to_string(),
                    });
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }

    fn emit_event(&self, event: WorkerEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Worker event channel full, dropping event. Consider increasing event_channel_capacity.");
            }
            Err(TrySendError::Closed(event)) => {
                debug!("No event receiver, dropping {:?}", event);
            }
        }
    }
}
