//! Kubernetes binding tests against a mock API server
mod common;

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kubetunnel::k8s::{KubeDialer, KubeDirectory, PodDirectory, PodSummary};
use kubetunnel::tunnel::{TargetResolver, TcpForwarder};
use kubetunnel::{
    LabelQuery, LookupScope, ResolvedTarget, SessionState, TunnelConfig, TunnelError,
    TunnelSession, TunnelSpec,
};

use common::{init_tracing, spawn_echo_server, LoopbackDialerFactory};

fn pod(name: &str, namespace: &str) -> serde_json::Value {
    json!({
        "metadata": { "name": name, "namespace": namespace },
        "status": { "phase": "Running" }
    })
}

fn pod_list(items: Vec<serde_json::Value>) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "PodList",
        "metadata": { "resourceVersion": "1" },
        "items": items
    })
}

fn client_for(server: &MockServer) -> kube::Client {
    let config = kube::Config::new(server.uri().parse().unwrap());
    kube::Client::try_from(config).unwrap()
}

async fn mock_pods(server: &MockServer, api_path: &str, items: Vec<serde_json::Value>) {
    Mock::given(method("GET"))
        .and(path(api_path))
        .and(query_param("labelSelector", "app=web"))
        .and(query_param("fieldSelector", "status.phase=Running"))
        .respond_with(ResponseTemplate::new(200).set_body_json(pod_list(items)))
        .mount(server)
        .await;
}

// ============================================================================
// Directory
// ============================================================================

#[tokio::test]
async fn test_list_running_in_namespace() {
    init_tracing();
    let server = MockServer::start().await;
    mock_pods(&server, "/api/v1/namespaces/ns1/pods", vec![pod("web-7f9c", "ns1")]).await;

    let directory = KubeDirectory::new(client_for(&server));
    let selector = LabelQuery::new().label("app", "web");
    let pods = directory.list_running(Some("ns1"), &selector).await.unwrap();

    assert_eq!(pods, vec![PodSummary::new("web-7f9c", "ns1", "Running")]);
}

#[tokio::test]
async fn test_list_running_all_namespaces() {
    let server = MockServer::start().await;
    mock_pods(&server, "/api/v1/pods", vec![pod("web-1", "ns1"), pod("web-2", "ns2")]).await;

    let directory = KubeDirectory::new(client_for(&server));
    let selector = LabelQuery::new().label("app", "web");
    let pods = directory.list_running(None, &selector).await.unwrap();

    assert_eq!(pods.len(), 2);
    assert_eq!(pods[1].namespace, "ns2");
}

#[tokio::test]
async fn test_list_forbidden_is_directory_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/namespaces/ns1/pods"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "apiVersion": "v1",
            "kind": "Status",
            "status": "Failure",
            "message": "pods is forbidden",
            "reason": "Forbidden",
            "code": 403
        })))
        .mount(&server)
        .await;

    let directory = KubeDirectory::new(client_for(&server));
    let err = directory.list_running(Some("ns1"), &LabelQuery::new().label("app", "web"))
        .await
        .unwrap_err();

    assert!(matches!(err, TunnelError::Directory(_)));
    assert!(err.to_string().contains("listing pods"));
}

#[tokio::test]
async fn test_resolver_ambiguous_over_api() {
    let server = MockServer::start().await;
    mock_pods(&server, "/api/v1/pods", vec![pod("web-1", "ns1"), pod("web-2", "ns2")]).await;

    let resolver = TargetResolver::new(
        Arc::new(KubeDirectory::new(client_for(&server))),
        LookupScope::AllNamespaces,
    );
    let spec = TunnelSpec::by_labels(LabelQuery::new().label("app", "web"), "ns1", 80);

    let err = resolver.resolve(&spec).await.unwrap_err();
    assert!(matches!(err, TunnelError::AmbiguousTarget { count: 2, .. }));
}

// ============================================================================
// Session with the API-backed directory
// ============================================================================

#[tokio::test]
async fn test_session_resolves_through_api() {
    let server = MockServer::start().await;
    mock_pods(&server, "/api/v1/namespaces/ns1/pods", vec![pod("web-7f9c", "ns1")]).await;
    let upstream = spawn_echo_server().await;

    let session = TunnelSession::from_parts(
        TunnelSpec::by_labels(LabelQuery::new().label("app", "web"), "ns1", 80),
        TunnelConfig::default(),
        Arc::new(KubeDirectory::new(client_for(&server))),
        LoopbackDialerFactory::new(upstream),
        Arc::new(TcpForwarder),
    );

    session.start(&CancellationToken::new()).await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.target(), Some(ResolvedTarget::new("web-7f9c", "ns1")));
    session.stop();
}

#[tokio::test]
async fn test_session_not_found_through_api() {
    let server = MockServer::start().await;
    mock_pods(&server, "/api/v1/namespaces/ns1/pods", vec![]).await;
    let upstream = spawn_echo_server().await;

    let session = TunnelSession::from_parts(
        TunnelSpec::by_labels(LabelQuery::new().label("app", "web"), "ns1", 80),
        TunnelConfig::default(),
        Arc::new(KubeDirectory::new(client_for(&server))),
        LoopbackDialerFactory::new(upstream),
        Arc::new(TcpForwarder),
    );

    let err = session.start(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, TunnelError::NotFound { ref selector } if selector == "app=web"));
    assert_eq!(session.state(), SessionState::New);
}

// ============================================================================
// Dialer
// ============================================================================

#[tokio::test]
async fn test_dialer_upgrade_url() {
    let config = kube::Config::new("https://cluster.example:6443".parse().unwrap());
    let target = ResolvedTarget::new("web-7f9c", "ns1");

    let dialer = KubeDialer::build(&config, &target).unwrap();

    assert_eq!(
        dialer.upgrade_url(),
        "https://cluster.example:6443/api/v1/namespaces/ns1/pods/web-7f9c/portforward"
    );
}

#[tokio::test]
async fn test_dialer_negotiation_failure() {
    use kubetunnel::k8s::StreamDialer;

    let server = MockServer::start().await;
    Mock::given(path("/api/v1/namespaces/ns1/pods/web-7f9c/portforward"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = kube::Config::new(server.uri().parse().unwrap());
    let dialer = KubeDialer::build(&config, &ResolvedTarget::new("web-7f9c", "ns1")).unwrap();

    let err = dialer.negotiate(80).await.unwrap_err();
    assert!(matches!(err, TunnelError::Stream(_)));
    assert!(err.to_string().contains("ns1/web-7f9c"));
}
