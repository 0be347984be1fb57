//! Coordination backend contract.
//!
//! The [`Registry`](crate::Registry) only speaks to the backend through
//! [`CoordinationBackend`]. Implementations:
//! - [`consul::ConsulBackend`] - Consul agent HTTP API
//! - [`memory::InMemoryBackend`] - process-local store with TTL semantics

pub mod consul;
pub mod memory;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use regcenter_sdk::{BoxError, ServiceInstance};

/// Status reported for a TTL check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckStatus {
    Passing,
    Warning,
    Critical,
}

impl CheckStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passing => "passing",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TTL liveness check attached to a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub check_id: String,
    /// Deadline within which the next renewal must arrive.
    pub ttl: Duration,
    /// How long the check may stay critical before the backend drops the
    /// instance.
    pub deregister_critical_service_after: Duration,
    pub status: CheckStatus,
}

impl HealthCheck {
    /// Check id derived from the service id: `service:<id>`.
    #[must_use]
    pub fn id_for(service_id: &str) -> String {
        format!("service:{service_id}")
    }
}

/// Everything sent to the backend when an instance is registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistration {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub meta: HashMap<String, String>,
    pub weight: i32,
    pub check: HealthCheck,
}

impl ServiceRegistration {
    /// Build a registration for `instance` with a passing TTL check.
    #[must_use]
    pub fn for_instance(
        instance: &ServiceInstance,
        ttl: Duration,
        deregister_critical_service_after: Duration,
    ) -> Self {
        Self {
            id: instance.id.clone(),
            name: instance.name.clone(),
            address: instance.address.clone(),
            port: instance.port,
            tags: instance.tags.clone(),
            meta: instance.meta.clone(),
            weight: instance.weight,
            check: HealthCheck {
                check_id: HealthCheck::id_for(&instance.id),
                ttl,
                deregister_critical_service_after,
                status: CheckStatus::Passing,
            },
        }
    }
}

/// An instance as reported back by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub meta: HashMap<String, String>,
    pub weight: i32,
}

impl From<&ServiceRegistration> for ServiceRecord {
    fn from(reg: &ServiceRegistration) -> Self {
        Self {
            id: reg.id.clone(),
            name: reg.name.clone(),
            address: reg.address.clone(),
            port: reg.port,
            tags: reg.tags.clone(),
            meta: reg.meta.clone(),
            weight: reg.weight,
        }
    }
}

impl From<ServiceRecord> for ServiceInstance {
    fn from(record: ServiceRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            address: record.address,
            port: record.port,
            tags: record.tags,
            meta: record.meta,
            weight: record.weight,
            enable: true,
            healthy: true,
        }
    }
}

/// Backend call failure.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BackendError {
    #[error("invalid backend endpoint '{address}': {reason}")]
    InvalidEndpoint { address: String, reason: String },

    #[error("failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}: {body_preview}")]
    Status {
        status: http::StatusCode,
        body_preview: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("backend unavailable")]
    Unavailable,
}

/// Primitive operations of a coordination service.
///
/// Implementations must be safe for concurrent use: heartbeat tasks call
/// [`renew_liveness`](Self::renew_liveness) while foreground calls are in
/// flight.
#[async_trait]
pub trait CoordinationBackend: Send + Sync {
    /// Cheap round-trip proving the backend is reachable.
    async fn probe(&self) -> Result<(), BackendError>;

    async fn register_service(&self, registration: &ServiceRegistration)
    -> Result<(), BackendError>;

    async fn deregister_service(&self, id: &str) -> Result<(), BackendError>;

    async fn renew_liveness(&self, check_id: &str, status: CheckStatus)
    -> Result<(), BackendError>;

    /// Instances of `name` whose checks are all passing.
    async fn query_healthy_instances(&self, name: &str)
    -> Result<Vec<ServiceRecord>, BackendError>;

    /// Look up one instance by id, regardless of health.
    async fn get_instance(&self, id: &str) -> Result<ServiceRecord, BackendError>;
}
