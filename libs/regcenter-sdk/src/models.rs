use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Weight given to instances built with [`ServiceInstance::new`].
pub const DEFAULT_WEIGHT: i32 = 1;

/// An instance of a logical service as advertised to, and reported by,
/// the coordination backend.
///
/// `enable` and `healthy` are informational: they are filled in by discovery
/// and ignored on registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServiceInstance {
    /// Unique per registry, assigned by the caller.
    pub id: String,
    /// Logical service name shared by all instances of the service.
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
    #[serde(default)]
    pub weight: i32,
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub healthy: bool,
}

impl ServiceInstance {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            port,
            tags: Vec::new(),
            meta: HashMap::new(),
            weight: DEFAULT_WEIGHT,
            enable: false,
            healthy: false,
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    /// `address:port`, suitable for building a client URI.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
