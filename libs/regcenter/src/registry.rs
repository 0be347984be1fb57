//! Service registry: local bookkeeping of registered instances and their
//! heartbeats on top of a [`CoordinationBackend`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use regcenter_sdk::{RegistryApi, RegistryError, ServiceInstance};

use crate::backend::consul::ConsulBackend;
use crate::backend::{CoordinationBackend, ServiceRegistration};
use crate::config::RegistryConfig;
use crate::heartbeat::{Heartbeat, HeartbeatSpec};
use crate::throttled_log::ThrottledLog;

/// Minimum spacing between heartbeat failure warnings across all instances.
const HEARTBEAT_WARN_INTERVAL: Duration = Duration::from_secs(30);

struct Registered {
    registration: ServiceRegistration,
    heartbeat: Heartbeat,
}

/// Registers local instances with a coordination backend and keeps them alive.
///
/// An id is tracked locally exactly while its heartbeat task runs. Dropping
/// the registry cancels every heartbeat but does not deregister anything;
/// call [`close`](RegistryApi::close) for an orderly shutdown.
pub struct Registry {
    backend: Arc<dyn CoordinationBackend>,
    config: RegistryConfig,
    services: Mutex<HashMap<String, Registered>>,
    cancel: CancellationToken,
    closed: AtomicBool,
    heartbeat_failures: Arc<ThrottledLog>,
    span: tracing::Span,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("registered", &self.services.lock().len())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Connect to the Consul agent at `config.address`.
    ///
    /// # Errors
    /// - `ConfigInvalid` if the address is unusable
    /// - `ConnectionFailed` if the connectivity probe fails
    pub async fn connect(config: RegistryConfig) -> Result<Self, RegistryError> {
        let config = config.with_defaults();
        let base = config.base_url()?;
        let backend = ConsulBackend::with_base_url(base, &config)
            .map_err(|e| RegistryError::ConfigInvalid(e.to_string()))?;
        Self::start(config, Arc::new(backend)).await
    }

    /// Build a registry over an arbitrary backend.
    ///
    /// Zero durations in `config` are defaulted here, once.
    ///
    /// # Errors
    /// Returns `ConnectionFailed` if the connectivity probe fails.
    pub async fn with_backend(
        config: RegistryConfig,
        backend: Arc<dyn CoordinationBackend>,
    ) -> Result<Self, RegistryError> {
        Self::start(config.with_defaults(), backend).await
    }

    /// Probe `backend` and build the registry. `config` is already defaulted.
    async fn start(
        config: RegistryConfig,
        backend: Arc<dyn CoordinationBackend>,
    ) -> Result<Self, RegistryError> {
        let span = tracing::info_span!("service_registry", backend = %config.address);

        backend
            .probe()
            .instrument(span.clone())
            .await
            .map_err(|e| {
                tracing::error!(parent: &span, error = %e, "Coordination backend probe failed");
                RegistryError::connection(e)
            })?;

        tracing::info!(
            parent: &span,
            heartbeat_interval = ?config.heartbeat_interval,
            check_ttl = ?config.check_ttl(),
            "Connected to coordination backend"
        );

        Ok(Self {
            backend,
            config,
            services: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            heartbeat_failures: Arc::new(ThrottledLog::new(HEARTBEAT_WARN_INTERVAL)),
            span,
        })
    }

    /// Emit registry and heartbeat events under `span` instead of the default
    /// `service_registry` span.
    #[must_use]
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Effective configuration, defaults applied.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Ids currently tracked locally, sorted.
    #[must_use]
    pub fn registered_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.services.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// What was last sent to the backend for `id`, if it is tracked.
    #[must_use]
    pub fn registration(&self, id: &str) -> Option<ServiceRegistration> {
        self.services
            .lock()
            .get(id)
            .map(|entry| entry.registration.clone())
    }

    /// Number of heartbeat tasks still running.
    #[must_use]
    pub fn active_heartbeats(&self) -> usize {
        self.services
            .lock()
            .values()
            .filter(|entry| entry.heartbeat.is_running())
            .count()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn spawn_heartbeat(&self, registration: &ServiceRegistration) -> Heartbeat {
        Heartbeat::spawn(
            Arc::clone(&self.backend),
            HeartbeatSpec {
                service_id: registration.id.clone(),
                check_id: registration.check.check_id.clone(),
                interval: self.config.heartbeat_interval,
            },
            self.cancel.child_token(),
            Arc::clone(&self.heartbeat_failures),
            &self.span,
        )
    }
}

fn require_non_empty(value: &str, what: &str) -> Result<(), RegistryError> {
    if value.is_empty() {
        Err(RegistryError::InvalidArgument(format!(
            "{what} must not be empty"
        )))
    } else {
        Ok(())
    }
}

#[async_trait]
impl RegistryApi for Registry {
    async fn register(&self, instance: ServiceInstance) -> Result<(), RegistryError> {
        require_non_empty(&instance.id, "service instance id")?;
        if self.is_closed() {
            return Err(RegistryError::Closed);
        }

        let registration = ServiceRegistration::for_instance(
            &instance,
            self.config.check_ttl(),
            self.config.deregister_critical_service_after,
        );

        self.backend
            .register_service(&registration)
            .instrument(self.span.clone())
            .await
            .map_err(|e| {
                tracing::warn!(
                    parent: &self.span,
                    service_id = %instance.id,
                    error = %e,
                    "Service registration rejected"
                );
                RegistryError::registration(&instance.id, e)
            })?;

        let heartbeat = self.spawn_heartbeat(&registration);
        let inserted = {
            let mut services = self.services.lock();
            if self.is_closed() {
                Err(heartbeat)
            } else {
                Ok(services.insert(
                    instance.id.clone(),
                    Registered {
                        registration,
                        heartbeat,
                    },
                ))
            }
        };

        match inserted {
            Ok(None) => {}
            Ok(Some(previous)) => {
                // The backend overwrites the record in place; only the local
                // heartbeat of the superseded registration has to go.
                tracing::warn!(
                    parent: &self.span,
                    service_id = %instance.id,
                    "Instance re-registered, replacing its heartbeat"
                );
                previous.heartbeat.stop().await;
            }
            Err(heartbeat) => {
                // close() ran while the backend call was in flight.
                heartbeat.stop().await;
                if let Err(e) = self.backend.deregister_service(&instance.id).await {
                    tracing::warn!(
                        parent: &self.span,
                        service_id = %instance.id,
                        error = %e,
                        "Failed to roll back registration after close"
                    );
                }
                return Err(RegistryError::Closed);
            }
        }

        tracing::info!(
            parent: &self.span,
            service_id = %instance.id,
            service_name = %instance.name,
            endpoint = %instance.endpoint(),
            "Service registered"
        );
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), RegistryError> {
        require_non_empty(id, "service instance id")?;

        self.backend
            .deregister_service(id)
            .instrument(self.span.clone())
            .await
            .map_err(|e| {
                tracing::warn!(
                    parent: &self.span,
                    service_id = %id,
                    error = %e,
                    "Service deregistration failed, keeping local entry"
                );
                RegistryError::deregistration(id, e)
            })?;

        let removed = self.services.lock().remove(id);
        if let Some(entry) = removed {
            entry.heartbeat.stop().await;
            tracing::info!(parent: &self.span, service_id = %id, "Service deregistered");
        } else {
            tracing::debug!(
                parent: &self.span,
                service_id = %id,
                "Deregistered an id that was not tracked locally"
            );
        }
        Ok(())
    }

    async fn discovery(&self, name: &str) -> Result<Vec<ServiceInstance>, RegistryError> {
        require_non_empty(name, "service name")?;

        let records = self
            .backend
            .query_healthy_instances(name)
            .instrument(self.span.clone())
            .await
            .map_err(|e| RegistryError::discovery(name, e))?;

        tracing::debug!(
            parent: &self.span,
            service_name = %name,
            healthy = records.len(),
            "Discovery completed"
        );
        Ok(records.into_iter().map(ServiceInstance::from).collect())
    }

    async fn get_service(&self, id: &str) -> Result<ServiceInstance, RegistryError> {
        require_non_empty(id, "service instance id")?;

        self.backend
            .get_instance(id)
            .instrument(self.span.clone())
            .await
            .map(ServiceInstance::from)
            .map_err(|e| RegistryError::discovery(id, e))
    }

    async fn random_one(&self, name: &str) -> Result<ServiceInstance, RegistryError> {
        let mut instances = self.discovery(name).await?;
        if instances.is_empty() {
            return Err(RegistryError::NotFound(name.to_owned()));
        }
        let index = rand::rng().random_range(0..instances.len());
        Ok(instances.swap_remove(index))
    }

    async fn close(&self) -> Result<(), RegistryError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(parent: &self.span, "Registry already closed");
            return Ok(());
        }

        self.cancel.cancel();
        let drained: Vec<(String, Registered)> = self.services.lock().drain().collect();
        let (ids, heartbeats): (Vec<String>, Vec<Heartbeat>) = drained
            .into_iter()
            .map(|(id, entry)| (id, entry.heartbeat))
            .unzip();

        join_all(heartbeats.into_iter().map(Heartbeat::stop)).await;

        let backend = &self.backend;
        let results = join_all(ids.iter().map(|id| async move {
            (id, backend.deregister_service(id).await)
        }))
        .instrument(self.span.clone())
        .await;

        let mut failed = 0usize;
        for (id, result) in results {
            if let Err(e) = result {
                failed += 1;
                tracing::warn!(
                    parent: &self.span,
                    service_id = %id,
                    error = %e,
                    "Deregistration during close failed"
                );
            }
        }

        tracing::info!(
            parent: &self.span,
            deregistered = ids.len() - failed,
            failed,
            "Registry closed"
        );
        Ok(())
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
