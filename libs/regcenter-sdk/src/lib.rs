//! Service Registry SDK
//!
//! This crate provides the public API for the service registry:
//!
//! - [`RegistryApi`] - Public API trait for consumers
//! - [`ServiceInstance`] - Advertisable instance model
//! - [`RegistryError`] - Error types
//!
//! ## Usage
//!
//! ```ignore
//! use regcenter_sdk::{RegistryApi, ServiceInstance};
//!
//! let instance = ServiceInstance::new("svc-1", "order-svc", "10.0.0.5", 8080)
//!     .with_tag("v1")
//!     .with_weight(10);
//! registry.register(instance).await?;
//!
//! // Resolve one healthy peer
//! let peer = registry.random_one("inventory-svc").await?;
//! println!("calling {}", peer.endpoint());
//!
//! registry.close().await?;
//! ```

pub mod api;
pub mod error;
pub mod models;

pub use api::RegistryApi;
pub use error::{BoxError, RegistryError};
pub use models::ServiceInstance;
