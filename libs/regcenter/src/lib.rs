#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Service registration and discovery client.
//!
//! A [`Registry`] advertises local service instances to a coordination
//! backend, renews a TTL liveness check for each of them from a background
//! heartbeat task, and resolves healthy peers of a named service for
//! client-side load balancing.
//!
//! ```ignore
//! use regcenter::{Registry, RegistryApi, RegistryConfig, ServiceInstance};
//!
//! let registry = Registry::connect(RegistryConfig::new("127.0.0.1:8500")).await?;
//! registry
//!     .register(ServiceInstance::new("order-1", "order-svc", "10.0.0.5", 8080))
//!     .await?;
//!
//! let peer = registry.random_one("inventory-svc").await?;
//!
//! // at shutdown
//! registry.close().await?;
//! ```
//!
//! The backend is pluggable through [`CoordinationBackend`]; [`ConsulBackend`]
//! talks to a Consul agent over HTTP and [`InMemoryBackend`] keeps everything
//! in-process.

pub mod backend;
pub mod config;
mod heartbeat;
pub mod humantime_serde;
pub mod net;
mod registry;
mod secret;
mod throttled_log;

pub use backend::{
    BackendError, CheckStatus, CoordinationBackend, HealthCheck, ServiceRecord,
    ServiceRegistration, consul::ConsulBackend, memory::InMemoryBackend,
};
pub use config::RegistryConfig;
pub use net::local_ip;
pub use registry::Registry;
pub use secret::AclToken;

pub use regcenter_sdk::{RegistryApi, RegistryError, ServiceInstance};
