//! Agent configuration.
//!
//! Layering, lowest to highest precedence:
//! 1. built-in defaults
//! 2. a YAML file: `--config <path>`, or `<config dir>/<Env>.yaml` when the
//!    `Env` variable is set; skipped entirely when `ConfigInject=true`
//! 3. `APP__*` environment variables (`APP__REGISTRY__ADDRESS=consul:8500`)
//!
//! Top-level keys the agent does not know are kept in a free-form record and
//! can be read with [`AgentConfig::get`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

use regcenter::{RegistryConfig, ServiceInstance};

use crate::logging::LoggingConfig;

/// Variable naming the environment whose YAML file is loaded.
pub const ENV_VAR: &str = "Env";
/// When `true`, configuration comes from the environment only.
pub const CONFIG_INJECT_VAR: &str = "ConfigInject";
/// Directory searched for `<Env>.yaml`.
pub const DEFAULT_CONFIG_DIR: &str = "./config";

const ENV_PREFIX: &str = "APP__";

/// Key read through [`AgentConfig::get`] when `instance_id` is not set.
pub const INSTANCE_ID_KEY: &str = "INSTANCE_ID";

/// Which coordination backend the agent talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Consul,
    /// Process-local registry; useful for dry runs.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub app_name: String,
    pub app_port: u16,
    /// Registered instance id. Falls back to the `INSTANCE_ID` variable or
    /// record key, then to an id generated from `app_name`.
    pub instance_id: Option<String>,
    /// Advertised address; the local outbound IP when absent.
    pub address: Option<String>,
    pub tags: Vec<String>,
    pub meta: HashMap<String, String>,
    pub weight: i32,
    pub backend: BackendKind,
    pub registry: RegistryConfig,
    pub logging: LoggingConfig,
    #[serde(flatten)]
    pub record: BTreeMap<String, serde_json::Value>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            app_name: "regcenter-agent".to_owned(),
            app_port: 8080,
            instance_id: None,
            address: None,
            tags: Vec::new(),
            meta: HashMap::new(),
            weight: 1,
            backend: BackendKind::default(),
            registry: RegistryConfig::default(),
            logging: LoggingConfig::default(),
            record: BTreeMap::new(),
        }
    }
}

/// Where the YAML layer comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    EnvironmentOnly,
}

impl ConfigSource {
    /// Pick the YAML layer from the CLI override and the process environment.
    ///
    /// # Errors
    /// Returns an error if an explicitly requested file does not exist.
    pub fn resolve(cli_path: Option<&Path>, config_dir: &Path) -> Result<Self> {
        if let Some(path) = cli_path {
            if !path.is_file() {
                bail!("config file does not exist: {}", path.display());
            }
            return Ok(Self::File(path.to_path_buf()));
        }

        if std::env::var(CONFIG_INJECT_VAR).is_ok_and(|v| v.eq_ignore_ascii_case("true")) {
            return Ok(Self::EnvironmentOnly);
        }

        match std::env::var(ENV_VAR) {
            Ok(env) if !env.trim().is_empty() => {
                let path = config_dir.join(format!("{}.yaml", env.trim()));
                if !path.is_file() {
                    bail!(
                        "config file for environment '{}' does not exist: {}",
                        env.trim(),
                        path.display()
                    );
                }
                Ok(Self::File(path))
            }
            _ => Ok(Self::EnvironmentOnly),
        }
    }
}

impl AgentConfig {
    /// Load the layered configuration.
    ///
    /// # Errors
    /// Returns an error if the YAML file or an environment value cannot be
    /// deserialized into the configuration.
    pub fn load(source: &ConfigSource) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let ConfigSource::File(path) = source {
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment.extract().with_context(|| match source {
            ConfigSource::File(path) => format!("invalid configuration in {}", path.display()),
            ConfigSource::EnvironmentOnly => "invalid configuration in environment".to_owned(),
        })?;
        Ok(config)
    }

    /// Look up `key`: the process environment first, then the free-form
    /// config record, then `default`.
    #[must_use]
    pub fn get(&self, key: &str, default: &str) -> String {
        if let Ok(value) = std::env::var(key)
            && !value.is_empty()
        {
            return value;
        }
        self.record
            .get(key)
            .or_else(|| self.record.get(&key.to_ascii_lowercase()))
            .and_then(scalar_to_string)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_owned())
    }

    /// The instance this process advertises.
    #[must_use]
    pub fn service_instance(&self) -> ServiceInstance {
        let id = self
            .instance_id
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(|| Some(self.get(INSTANCE_ID_KEY, "")).filter(|id| !id.is_empty()))
            .unwrap_or_else(|| format!("{}-{}", self.app_name, uuid::Uuid::new_v4()));
        let address = regcenter::net::advertise_address(self.address.as_deref());

        let mut instance = ServiceInstance::new(id, &self.app_name, address, self.app_port)
            .with_tags(self.tags.iter().cloned())
            .with_weight(self.weight);
        instance.meta.clone_from(&self.meta);
        instance
    }
}

fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
