#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Consul wire format, checked against an HTTP mock of the agent API.

use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;

use regcenter::{
    BackendError, CheckStatus, ConsulBackend, CoordinationBackend, Registry, RegistryApi,
    RegistryConfig, RegistryError, ServiceInstance, ServiceRegistration,
};

fn backend_for(server: &MockServer) -> ConsulBackend {
    ConsulBackend::new(&RegistryConfig::new(server.base_url()).with_token("acl-token")).unwrap()
}

fn registration() -> ServiceRegistration {
    let instance = ServiceInstance::new("svc-1", "order-svc", "10.0.0.5", 8080)
        .with_tag("v1")
        .with_meta("zone", "eu-1")
        .with_weight(5);
    ServiceRegistration::for_instance(
        &instance,
        Duration::from_secs(20),
        Duration::from_millis(1500),
    )
}

#[tokio::test]
async fn probe_hits_agent_self_with_token() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/agent/self")
            .header("x-consul-token", "acl-token");
        then.status(200).json_body(json!({"Config": {}}));
    });

    backend_for(&server).probe().await.unwrap();
    mock.assert();
}

#[tokio::test]
async fn register_sends_ttl_check_in_go_duration_syntax() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(PUT)
            .path("/v1/agent/service/register")
            .header("content-type", "application/json")
            .json_body(json!({
                "ID": "svc-1",
                "Name": "order-svc",
                "Address": "10.0.0.5",
                "Port": 8080,
                "Tags": ["v1"],
                "Meta": {"zone": "eu-1"},
                "Weights": {"Passing": 5, "Warning": 5},
                "Check": {
                    "CheckID": "service:svc-1",
                    "TTL": "20s",
                    "DeregisterCriticalServiceAfter": "1500ms",
                    "Status": "passing"
                }
            }));
        then.status(200);
    });

    backend_for(&server)
        .register_service(&registration())
        .await
        .unwrap();
    mock.assert();
}

#[tokio::test]
async fn default_instance_registers_with_positive_weight() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v1/agent/self");
        then.status(200).json_body(json!({}));
    });
    let register = server.mock(|when, then| {
        when.method(PUT)
            .path("/v1/agent/service/register")
            .body_includes(r#""Weights":{"Passing":1,"Warning":1}"#);
        then.status(200);
    });

    let registry = Registry::connect(RegistryConfig::new(server.base_url()))
        .await
        .unwrap();
    registry
        .register(ServiceInstance::new("svc-1", "order-svc", "10.0.0.5", 8080))
        .await
        .unwrap();

    register.assert();
}

#[tokio::test]
async fn non_positive_weight_is_left_to_the_agent() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(PUT)
            .path("/v1/agent/service/register")
            .json_body(json!({
                "ID": "svc-1",
                "Name": "order-svc",
                "Address": "10.0.0.5",
                "Port": 8080,
                "Tags": [],
                "Meta": {},
                "Check": {
                    "CheckID": "service:svc-1",
                    "TTL": "20s",
                    "DeregisterCriticalServiceAfter": "30s",
                    "Status": "passing"
                }
            }));
        then.status(200);
    });

    let instance = ServiceInstance::new("svc-1", "order-svc", "10.0.0.5", 8080).with_weight(0);
    let registration = ServiceRegistration::for_instance(
        &instance,
        Duration::from_secs(20),
        Duration::from_secs(30),
    );
    backend_for(&server)
        .register_service(&registration)
        .await
        .unwrap();
    mock.assert();
}

#[tokio::test]
async fn renew_updates_check_to_passing() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(PUT)
            .path("/v1/agent/check/update/service:svc-1")
            .json_body(json!({"Status": "passing", "Output": ""}));
        then.status(200);
    });

    backend_for(&server)
        .renew_liveness("service:svc-1", CheckStatus::Passing)
        .await
        .unwrap();
    mock.assert();
}

#[tokio::test]
async fn deregister_targets_the_service_id() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(PUT)
            .path("/v1/agent/service/deregister/svc-1")
            .header("x-consul-token", "acl-token");
        then.status(200);
    });

    backend_for(&server)
        .deregister_service("svc-1")
        .await
        .unwrap();
    mock.assert();
}

#[tokio::test]
async fn health_query_requests_passing_only() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/health/service/order-svc")
            .query_param("passing", "true");
        then.status(200).json_body(json!([
            {
                "Node": {"Node": "n1", "Address": "192.168.1.10"},
                "Service": {
                    "ID": "svc-1",
                    "Service": "order-svc",
                    "Address": "10.0.0.5",
                    "Port": 8080,
                    "Tags": ["v1"],
                    "Meta": {"zone": "eu-1"},
                    "Weights": {"Passing": 5, "Warning": 1}
                },
                "Checks": []
            },
            {
                "Node": {"Node": "n2", "Address": "192.168.1.11"},
                "Service": {
                    "ID": "svc-2",
                    "Service": "order-svc",
                    "Address": "",
                    "Port": 8081,
                    "Tags": null,
                    "Meta": null
                },
                "Checks": []
            }
        ]));
    });

    let records = backend_for(&server)
        .query_healthy_instances("order-svc")
        .await
        .unwrap();
    mock.assert();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].address, "10.0.0.5");
    assert_eq!(records[0].weight, 5);
    assert_eq!(records[0].tags, vec!["v1"]);
    assert_eq!(records[1].address, "192.168.1.11");
    assert!(records[1].tags.is_empty());
}

#[tokio::test]
async fn get_instance_maps_404_to_not_found() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v1/agent/service/ghost");
        then.status(404).body("unknown service ID: ghost");
    });

    let err = backend_for(&server).get_instance("ghost").await.unwrap_err();
    assert!(matches!(err, BackendError::NotFound(ref id) if id == "ghost"));
}

#[tokio::test]
async fn get_instance_decodes_agent_service() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v1/agent/service/svc-1");
        then.status(200).json_body(json!({
            "ID": "svc-1",
            "Service": "order-svc",
            "Address": "10.0.0.5",
            "Port": 8080,
            "Tags": [],
            "Meta": {},
            "Weights": {"Passing": 2, "Warning": 2}
        }));
    });

    let record = backend_for(&server).get_instance("svc-1").await.unwrap();
    assert_eq!(record.name, "order-svc");
    assert_eq!(record.port, 8080);
    assert_eq!(record.weight, 2);
}

#[tokio::test]
async fn non_success_status_carries_body_preview() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(PUT).path("/v1/agent/service/register");
        then.status(400).body("Invalid check: TTL must be > 0");
    });

    let err = backend_for(&server)
        .register_service(&registration())
        .await
        .unwrap_err();
    match err {
        BackendError::Status {
            status,
            body_preview,
        } => {
            assert_eq!(status.as_u16(), 400);
            assert!(body_preview.contains("TTL must be > 0"));
        }
        other => panic!("expected status error, got {other}"),
    }
}

#[tokio::test]
async fn slow_agent_hits_the_call_timeout() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v1/agent/self");
        then.status(200).delay(Duration::from_millis(500));
    });

    let cfg = RegistryConfig::new(server.base_url()).with_timeout(Duration::from_millis(100));
    let err = ConsulBackend::new(&cfg).unwrap().probe().await.unwrap_err();
    assert!(matches!(err, BackendError::Timeout(_)));
}

#[tokio::test]
async fn connect_fails_when_probe_is_rejected() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v1/agent/self");
        then.status(403).body("ACL not found");
    });

    let err = Registry::connect(RegistryConfig::new(server.base_url()))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::ConnectionFailed { .. }));
}

#[tokio::test]
async fn connect_rejects_unusable_address() {
    let err = Registry::connect(RegistryConfig::new(""))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::ConfigInvalid(_)));
}

#[tokio::test]
async fn registry_round_trip_over_consul() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v1/agent/self");
        then.status(200).json_body(json!({}));
    });
    let register = server.mock(|when, then| {
        when.method(PUT).path("/v1/agent/service/register");
        then.status(200);
    });
    let deregister = server.mock(|when, then| {
        when.method(PUT).path("/v1/agent/service/deregister/svc-1");
        then.status(200);
    });

    let registry = Registry::connect(RegistryConfig::new(server.base_url()))
        .await
        .unwrap();
    registry
        .register(ServiceInstance::new("svc-1", "order-svc", "10.0.0.5", 8080))
        .await
        .unwrap();
    registry.close().await.unwrap();
    registry.close().await.unwrap();

    register.assert_calls(1);
    deregister.assert_calls(1);
}

#[tokio::test]
async fn connect_builds_backend_from_defaulted_config() {
    let server = MockServer::start();
    let probe = server.mock(|when, then| {
        when.method(GET).path("/v1/agent/self");
        then.status(200).json_body(json!({}));
    });

    let config = RegistryConfig::new(server.base_url())
        .with_timeout(Duration::ZERO)
        .with_heartbeat_interval(Duration::ZERO)
        .with_deregister_critical_service_after(Duration::ZERO);
    let registry = Registry::connect(config).await.unwrap();

    assert_eq!(registry.config().timeout, Duration::from_secs(5));
    assert_eq!(registry.config().heartbeat_interval, Duration::from_secs(10));
    assert_eq!(
        registry.config().deregister_critical_service_after,
        Duration::from_secs(30)
    );
    probe.assert_calls(1);
}
