/// Boxed cause carried by backend-facing error variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by the service registry.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("invalid registry configuration: {0}")]
    ConfigInvalid(String),

    #[error("failed to connect to coordination backend: {source}")]
    ConnectionFailed {
        #[source]
        source: BoxError,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to register instance '{id}': {source}")]
    RegistrationFailed {
        id: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to deregister instance '{id}': {source}")]
    DeregistrationFailed {
        id: String,
        #[source]
        source: BoxError,
    },

    #[error("discovery failed for '{target}': {source}")]
    DiscoveryFailed {
        target: String,
        #[source]
        source: BoxError,
    },

    #[error("no healthy instance of service '{0}'")]
    NotFound(String),

    #[error("registry is closed")]
    Closed,
}

impl RegistryError {
    #[must_use]
    pub fn connection(source: impl Into<BoxError>) -> Self {
        Self::ConnectionFailed {
            source: source.into(),
        }
    }

    #[must_use]
    pub fn registration(id: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::RegistrationFailed {
            id: id.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn deregistration(id: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::DeregistrationFailed {
            id: id.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn discovery(target: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::DiscoveryFailed {
            target: target.into(),
            source: source.into(),
        }
    }
}
