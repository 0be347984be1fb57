//! Public API trait for the service registry.
//!
//! The registry advertises local instances to a coordination backend, keeps
//! them alive with periodic heartbeats, and resolves healthy peers of a named
//! service.

use async_trait::async_trait;

use crate::error::RegistryError;
use crate::models::ServiceInstance;

/// Registration and discovery contract.
///
/// ```ignore
/// registry.register(ServiceInstance::new("svc-1", "order-svc", "10.0.0.5", 8080)).await?;
///
/// let healthy = registry.discovery("order-svc").await?;
/// let one = registry.random_one("order-svc").await?;
///
/// registry.deregister("svc-1").await?;
/// registry.close().await?;
/// ```
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Advertise `instance` and start keeping it alive.
    ///
    /// Registering an id that is already tracked replaces the tracked record
    /// and its heartbeat.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `instance.id` is empty
    /// - `RegistrationFailed` if the backend rejects the registration; nothing
    ///   is tracked locally in that case
    /// - `Closed` after [`close`](Self::close)
    async fn register(&self, instance: ServiceInstance) -> Result<(), RegistryError>;

    /// Withdraw `id` from the backend and stop its heartbeat.
    ///
    /// The backend call is made even if `id` is not tracked locally.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `id` is empty
    /// - `DeregistrationFailed` if the backend call fails; the local entry is
    ///   kept so a retry or `close` can try again
    async fn deregister(&self, id: &str) -> Result<(), RegistryError>;

    /// All instances of `name` the backend currently reports as healthy.
    ///
    /// An empty vector means no healthy instance exists.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `name` is empty
    /// - `DiscoveryFailed` on backend error
    async fn discovery(&self, name: &str) -> Result<Vec<ServiceInstance>, RegistryError>;

    /// Resolve a single instance by id, without health filtering.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `id` is empty
    /// - `DiscoveryFailed` on backend error, including an unknown id
    async fn get_service(&self, id: &str) -> Result<ServiceInstance, RegistryError>;

    /// One healthy instance of `name`, chosen uniformly at random.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no healthy instance exists
    /// - any error of [`discovery`](Self::discovery)
    async fn random_one(&self, name: &str) -> Result<ServiceInstance, RegistryError>;

    /// Stop every heartbeat and deregister every tracked instance.
    ///
    /// Idempotent; individual deregistration failures are logged and ignored.
    ///
    /// # Errors
    ///
    /// Never fails; the `Result` keeps the signature uniform with the rest of
    /// the API.
    async fn close(&self) -> Result<(), RegistryError>;
}
