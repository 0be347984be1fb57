//! Connection parameters for the coordination backend.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::secret::AclToken;
use regcenter_sdk::RegistryError;

/// Per-call and connect timeout applied when unset.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Heartbeat period applied when unset.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
/// Grace period before the backend drops a failing instance, applied when unset.
pub const DEFAULT_DEREGISTER_CRITICAL_SERVICE_AFTER: Duration = Duration::from_secs(30);

/// Consul agent address used when none is configured.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:8500";

/// Registry configuration.
///
/// Zero durations mean "use the default" and are replaced by
/// [`with_defaults`](Self::with_defaults) when the registry is built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Backend endpoint: `host:port` or a full `http(s)://` URL.
    pub address: String,
    #[serde(skip_serializing)]
    pub token: Option<AclToken>,
    #[serde(with = "crate::humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "crate::humantime_serde")]
    pub heartbeat_interval: Duration,
    #[serde(with = "crate::humantime_serde")]
    pub deregister_critical_service_after: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_owned(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            deregister_critical_service_after: DEFAULT_DEREGISTER_CRITICAL_SERVICE_AFTER,
        }
    }
}

impl RegistryConfig {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = AclToken::new(token);
        self.token = (!token.is_empty()).then_some(token);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_deregister_critical_service_after(mut self, after: Duration) -> Self {
        self.deregister_critical_service_after = after;
        self
    }

    /// Replace every zero duration with its default.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        if self.heartbeat_interval.is_zero() {
            self.heartbeat_interval = DEFAULT_HEARTBEAT_INTERVAL;
        }
        if self.deregister_critical_service_after.is_zero() {
            self.deregister_critical_service_after = DEFAULT_DEREGISTER_CRITICAL_SERVICE_AFTER;
        }
        self
    }

    /// TTL of the liveness check: two heartbeat periods.
    #[must_use]
    pub fn check_ttl(&self) -> Duration {
        self.heartbeat_interval.saturating_mul(2)
    }

    /// Parse `address` into the backend base URL, defaulting the scheme to `http`.
    ///
    /// # Errors
    /// Returns `ConfigInvalid` if the address is empty, unparsable, not
    /// `http`/`https`, or has no host.
    pub fn base_url(&self) -> Result<Url, RegistryError> {
        let address = self.address.trim();
        if address.is_empty() {
            return Err(RegistryError::ConfigInvalid(
                "backend address must not be empty".to_owned(),
            ));
        }

        let candidate = if address.contains("://") {
            address.to_owned()
        } else {
            format!("http://{address}")
        };

        let url = Url::parse(&candidate).map_err(|e| {
            RegistryError::ConfigInvalid(format!("invalid backend address '{address}': {e}"))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(RegistryError::ConfigInvalid(format!(
                "unsupported scheme '{}' in backend address",
                url.scheme()
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(RegistryError::ConfigInvalid(format!(
                "backend address '{address}' has no host"
            )));
        }
        Ok(url)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn zero_durations_are_defaulted() {
        let cfg = RegistryConfig::new("consul:8500")
            .with_timeout(Duration::ZERO)
            .with_heartbeat_interval(Duration::ZERO)
            .with_deregister_critical_service_after(Duration::ZERO)
            .with_defaults();

        assert_eq!(cfg.timeout, Duration::from_secs(5));
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(cfg.deregister_critical_service_after, Duration::from_secs(30));
        assert_eq!(cfg.check_ttl(), Duration::from_secs(20));
    }

    #[test]
    fn explicit_durations_survive_defaulting() {
        let cfg = RegistryConfig::new("consul:8500")
            .with_heartbeat_interval(Duration::from_secs(3))
            .with_defaults();
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(3));
        assert_eq!(cfg.check_ttl(), Duration::from_secs(6));
    }

    #[test]
    fn base_url_adds_http_scheme() {
        let url = RegistryConfig::new("10.1.2.3:8500").base_url().unwrap();
        assert_eq!(url.as_str(), "http://10.1.2.3:8500/");

        let url = RegistryConfig::new("https://consul.internal")
            .base_url()
            .unwrap();
        assert_eq!(url.scheme(), "https");
    }

    #[test]
    fn base_url_rejects_unusable_addresses() {
        for bad in ["", "   ", "ftp://consul:21", "http://"] {
            let err = RegistryConfig::new(bad).base_url().unwrap_err();
            assert!(
                matches!(err, RegistryError::ConfigInvalid(_)),
                "expected ConfigInvalid for {bad:?}, got {err}"
            );
        }
    }

    #[test]
    fn empty_token_is_dropped() {
        assert!(RegistryConfig::new("c:1").with_token("").token.is_none());
        assert!(RegistryConfig::new("c:1").with_token("t").token.is_some());
    }

    #[test]
    fn yaml_durations_and_missing_keys() {
        let yaml = "address: consul:8500\nheartbeat_interval: 2s\ntimeout: 0s\n";
        let cfg: RegistryConfig = serde_saphyr::from_str(yaml).unwrap();
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(
            cfg.deregister_critical_service_after,
            DEFAULT_DEREGISTER_CRITICAL_SERVICE_AFTER
        );
        assert_eq!(cfg.with_defaults().timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn token_is_not_serialized() {
        let cfg = RegistryConfig::new("c:1").with_token("secret");
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("secret"));
    }
}
