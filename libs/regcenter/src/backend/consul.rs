//! Consul agent HTTP backend.
//!
//! Talks to the local agent endpoints (`/v1/agent/...`) for registration and
//! TTL updates and to the catalog health endpoint for discovery. Every call is
//! bounded by the configured timeout; there are no retries.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{
    BackendError, CheckStatus, CoordinationBackend, ServiceRecord, ServiceRegistration,
};
use crate::config::RegistryConfig;
use crate::secret::AclToken;

const TOKEN_HEADER: &str = "X-Consul-Token";
const BODY_PREVIEW_LIMIT: usize = 256;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// [`CoordinationBackend`] backed by a Consul agent.
#[derive(Clone)]
pub struct ConsulBackend {
    client: HttpClient,
    base: Url,
    token: Option<AclToken>,
    timeout: Duration,
}

impl std::fmt::Debug for ConsulBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsulBackend")
            .field("base", &self.base.as_str())
            .field("token", &self.token)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ConsulBackend {
    /// Build a client for the agent at `config.address`.
    ///
    /// Zero durations in `config` are treated as their defaults.
    ///
    /// # Errors
    /// Returns `InvalidEndpoint` if the address cannot be turned into a base URL.
    pub fn new(config: &RegistryConfig) -> Result<Self, BackendError> {
        let config = config.clone().with_defaults();
        let base = config
            .base_url()
            .map_err(|e| BackendError::InvalidEndpoint {
                address: config.address.clone(),
                reason: e.to_string(),
            })?;
        Self::with_base_url(base, &config)
    }

    /// Build a client from an already validated base URL and a defaulted
    /// configuration.
    pub(crate) fn with_base_url(base: Url, config: &RegistryConfig) -> Result<Self, BackendError> {
        if base.cannot_be_a_base() {
            return Err(BackendError::InvalidEndpoint {
                address: config.address.clone(),
                reason: "address cannot carry a path".to_owned(),
            });
        }

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build::<_, Full<Bytes>>(connector);

        Ok(Self {
            client,
            base,
            token: config.token.clone(),
            timeout: config.timeout,
        })
    }

    /// Base URL every `v1/...` path is appended to.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `base/v1/<segments>`, each segment percent-encoded on its own.
    fn endpoint(&self, segments: &[&str], query: Option<&str>) -> String {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("v1").extend(segments);
        }
        url.set_query(query);
        url.into()
    }

    async fn call(
        &self,
        method: Method,
        uri: String,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Bytes), BackendError> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = &self.token {
            builder = builder.header(TOKEN_HEADER, token.expose());
        }
        let request = match body {
            Some(json) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Full::new(Bytes::from(json)))?,
            None => builder.body(Full::new(Bytes::new()))?,
        };

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| BackendError::Transport(Box::new(e)))?;
            let status = response.status();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| BackendError::Transport(Box::new(e)))?
                .to_bytes();
            Ok::<_, BackendError>((status, body))
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| BackendError::Timeout(self.timeout))?
    }

    async fn call_ok(
        &self,
        method: Method,
        uri: String,
        body: Option<Vec<u8>>,
    ) -> Result<Bytes, BackendError> {
        let (status, body) = self.call(method, uri, body).await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(status_error(status, &body))
        }
    }
}

fn status_error(status: StatusCode, body: &[u8]) -> BackendError {
    let text = String::from_utf8_lossy(body);
    let body_preview = text.chars().take(BODY_PREVIEW_LIMIT).collect::<String>();
    BackendError::Status {
        status,
        body_preview: body_preview.trim().to_owned(),
    }
}

/// Consul parses durations with Go syntax: whole seconds as `"20s"`, whole
/// milliseconds as `"1500ms"`, anything finer as nanoseconds.
fn go_duration(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else if d.subsec_nanos() % 1_000_000 == 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}ns", d.as_nanos())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    address: &'a str,
    port: u16,
    tags: &'a [String],
    meta: &'a HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    weights: Option<AgentWeights>,
    check: AgentServiceCheck<'a>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct AgentWeights {
    passing: i32,
    warning: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceCheck<'a> {
    #[serde(rename = "CheckID")]
    check_id: &'a str,
    #[serde(rename = "TTL")]
    ttl: String,
    deregister_critical_service_after: String,
    status: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CheckUpdate {
    status: &'static str,
    output: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    service: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    meta: Option<HashMap<String, String>>,
    #[serde(default)]
    weights: Option<AgentWeights>,
}

impl AgentService {
    fn into_record(self, fallback_address: Option<String>) -> ServiceRecord {
        let address = if self.address.is_empty() {
            fallback_address.unwrap_or_default()
        } else {
            self.address
        };
        ServiceRecord {
            id: self.id,
            name: self.service,
            address,
            port: self.port,
            tags: self.tags.unwrap_or_default(),
            meta: self.meta.unwrap_or_default(),
            weight: self.weights.map_or(0, |w| w.passing),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceEntry {
    #[serde(default)]
    node: Option<NodeInfo>,
    service: AgentService,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeInfo {
    #[serde(default)]
    address: String,
}

#[async_trait]
impl CoordinationBackend for ConsulBackend {
    async fn probe(&self) -> Result<(), BackendError> {
        let uri = self.endpoint(&["agent", "self"], None);
        self.call_ok(Method::GET, uri, None).await?;
        Ok(())
    }

    async fn register_service(
        &self,
        registration: &ServiceRegistration,
    ) -> Result<(), BackendError> {
        let payload = AgentServiceRegistration {
            id: &registration.id,
            name: &registration.name,
            address: &registration.address,
            port: registration.port,
            tags: &registration.tags,
            meta: &registration.meta,
            // The agent rejects a passing weight below 1; leave it to apply
            // its own default instead.
            weights: (registration.weight >= 1).then_some(AgentWeights {
                passing: registration.weight,
                warning: registration.weight,
            }),
            check: AgentServiceCheck {
                check_id: &registration.check.check_id,
                ttl: go_duration(registration.check.ttl),
                deregister_critical_service_after: go_duration(
                    registration.check.deregister_critical_service_after,
                ),
                status: registration.check.status.as_str(),
            },
        };
        let body = serde_json::to_vec(&payload)?;
        let uri = self.endpoint(&["agent", "service", "register"], None);
        self.call_ok(Method::PUT, uri, Some(body)).await?;
        tracing::debug!(
            service_id = %registration.id,
            service_name = %registration.name,
            "Consul registration accepted"
        );
        Ok(())
    }

    async fn deregister_service(&self, id: &str) -> Result<(), BackendError> {
        let uri = self.endpoint(&["agent", "service", "deregister", id], None);
        self.call_ok(Method::PUT, uri, None).await?;
        Ok(())
    }

    async fn renew_liveness(
        &self,
        check_id: &str,
        status: CheckStatus,
    ) -> Result<(), BackendError> {
        let uri = self.endpoint(&["agent", "check", "update", check_id], None);
        let body = serde_json::to_vec(&CheckUpdate {
            status: status.as_str(),
            output: "",
        })?;
        self.call_ok(Method::PUT, uri, Some(body)).await?;
        Ok(())
    }

    async fn query_healthy_instances(
        &self,
        name: &str,
    ) -> Result<Vec<ServiceRecord>, BackendError> {
        let uri = self.endpoint(&["health", "service", name], Some("passing=true"));
        let body = self.call_ok(Method::GET, uri, None).await?;
        let entries: Vec<ServiceEntry> = serde_json::from_slice(&body)?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                let node_address = entry.node.map(|n| n.address);
                entry.service.into_record(node_address)
            })
            .collect())
    }

    async fn get_instance(&self, id: &str) -> Result<ServiceRecord, BackendError> {
        let uri = self.endpoint(&["agent", "service", id], None);
        let (status, body) = self.call(Method::GET, uri, None).await?;
        if status == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound(id.to_owned()));
        }
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        let service: AgentService = serde_json::from_slice(&body)?;
        Ok(service.into_record(None))
    }
}
