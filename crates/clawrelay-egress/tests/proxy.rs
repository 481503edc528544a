//! Egress pipeline against a real local upstream

use axum::{
    extract::Request,
    http::{header::AUTHORIZATION, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect},
    routing::{any, get},
    Router,
};
use clawrelay_egress::{
    EgressError, EgressProxy, HostBlocklist, NetworkPolicy, ProxyTarget,
};
use clawrelay_store::{
    DeploymentStore, InMemoryDeploymentStore, InMemorySecretStore, NewDeployment,
};
use clawrelay_vault::{generate_key, SecretCipher, SecretVault};
use reqwest::Method;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

async fn echo(request: Request) -> impl IntoResponse {
    let headers = request.headers();
    let api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let relay_token_seen = headers.contains_key("x-relay-token");

    (
        StatusCode::CREATED,
        [("x-upstream", "yes"), ("connection", "close")],
        format!(
            "{} {}?{} key={} host={} relay_token_seen={}",
            request.method(),
            request.uri().path(),
            request.uri().query().unwrap_or(""),
            api_key,
            host,
            relay_token_seen
        ),
    )
}

async fn start_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/redirect", get(|| async { Redirect::temporary("/elsewhere") }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        )
        .fallback(any(echo));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct Harness {
    proxy: EgressProxy,
    vault: Arc<SecretVault>,
    deployments: Arc<InMemoryDeploymentStore>,
}

async fn harness(global_allowlist: &[&str], timeout: Duration) -> Harness {
    let deployments = Arc::new(InMemoryDeploymentStore::new());
    deployments
        .insert(NewDeployment {
            id: "dep-1".to_string(),
            relay_token: "relay-token-1".to_string(),
            webhook_secret: None,
        })
        .await
        .unwrap();

    let vault = Arc::new(SecretVault::new(
        Arc::new(InMemorySecretStore::new()),
        SecretCipher::from_base64_key(&generate_key()).unwrap(),
    ));

    // The upstream lives on loopback, so run without the default blocklist
    let policy = NetworkPolicy::new(
        HostBlocklist::parse(Vec::<String>::new()).unwrap(),
        global_allowlist.iter().map(|s| s.to_string()).collect(),
        vault.clone(),
    );

    let proxy = EgressProxy::new(deployments.clone(), vault.clone(), policy, timeout).unwrap();
    Harness {
        proxy,
        vault,
        deployments,
    }
}

fn agent_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-relay-token", "relay-token-1".parse().unwrap());
    headers.insert("x-api-key", api_key.parse().unwrap());
    headers.insert("host", "relay.internal".parse().unwrap());
    headers
}

#[tokio::test]
async fn test_authenticate_by_relay_token() {
    let h = harness(&[], Duration::from_secs(5)).await;

    let deployment = h.proxy.authenticate(&agent_headers("x")).await.unwrap();
    assert_eq!(deployment.id, "dep-1");

    let mut wrong = HeaderMap::new();
    wrong.insert("x-relay-token", "nope".parse().unwrap());
    assert!(matches!(
        h.proxy.authenticate(&wrong).await,
        Err(EgressError::Unauthorized)
    ));
    assert!(matches!(
        h.proxy.authenticate(&HeaderMap::new()).await,
        Err(EgressError::Unauthorized)
    ));
    assert!(h.deployments.find_by_id("dep-1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_placeholder_substituted_for_scoped_host() {
    let upstream = start_upstream().await;
    let h = harness(&[], Duration::from_secs(5)).await;
    h.vault
        .store(
            "dep-1",
            "ANTHROPIC_KEY",
            "sk-ant-real",
            &["127.0.0.1".to_string()],
        )
        .await
        .unwrap();

    let deployment = h.proxy.authenticate(&agent_headers("")).await.unwrap();
    let target = ProxyTarget::from_proxy_path(
        &format!("/proxy/http/127.0.0.1:{}/v1/messages", upstream.port()),
        Some("beta=true"),
    )
    .unwrap();

    let response = h
        .proxy
        .forward(
            &deployment,
            Method::POST,
            &target,
            &agent_headers("CLAW_SE_ANTHROPIC_KEY"),
            reqwest::Body::from("{}"),
        )
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 201);
    assert_eq!(response.headers().get("x-upstream").unwrap(), "yes");
    let body = response.text().await.unwrap();
    assert_eq!(
        body,
        format!(
            "POST /v1/messages?beta=true key=sk-ant-real host=127.0.0.1:{} relay_token_seen=false",
            upstream.port()
        )
    );
}

#[tokio::test]
async fn test_mismatched_host_lists_unresolved_secret() {
    let h = harness(&["127.0.0.1"], Duration::from_secs(5)).await;
    h.vault
        .store(
            "dep-1",
            "ANTHROPIC_KEY",
            "sk-ant-real",
            &["*.anthropic.com".to_string()],
        )
        .await
        .unwrap();

    let target = ProxyTarget::from_proxy_path("/proxy/http/127.0.0.1:9/v1", None).unwrap();
    let result = h
        .proxy
        .prepare(
            "dep-1",
            &target,
            &agent_headers("CLAW_SE_ANTHROPIC_KEY CLAW_SE_MISSING CLAW_SE_ANTHROPIC_KEY"),
        )
        .await;

    match result {
        Err(EgressError::UnresolvedSecrets(names)) => {
            assert_eq!(names, vec!["ANTHROPIC_KEY", "MISSING"]);
        }
        other => panic!("Expected unresolved secrets, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_placeholder_in_non_ascii_header_value() {
    let h = harness(&["127.0.0.1"], Duration::from_secs(5)).await;
    let target = ProxyTarget::from_proxy_path("/proxy/http/127.0.0.1:9/v1", None).unwrap();
    let mut headers = agent_headers("plain");
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_bytes(b"Bearer CLAW_SE_ANTHROPIC_KEY \xe9").unwrap(),
    );

    match h.proxy.prepare("dep-1", &target, &headers).await {
        Err(EgressError::UnresolvedSecrets(names)) => {
            assert_eq!(names, vec!["ANTHROPIC_KEY"]);
        }
        other => panic!("Expected unresolved secrets, got {:?}", other.map(|_| ())),
    }

    h.vault
        .store(
            "dep-1",
            "ANTHROPIC_KEY",
            "sk-ant-real",
            &["127.0.0.1".to_string()],
        )
        .await
        .unwrap();

    let prepared = h.proxy.prepare("dep-1", &target, &headers).await.unwrap();
    assert_eq!(
        prepared.get(AUTHORIZATION).unwrap().as_bytes(),
        b"Bearer sk-ant-real \xe9"
    );
}

#[tokio::test]
async fn test_host_without_secret_or_allowlist_is_denied() {
    let h = harness(&[], Duration::from_secs(5)).await;
    let target = ProxyTarget::from_proxy_path("/proxy/https/example.com/", None).unwrap();

    let err = h
        .proxy
        .prepare("dep-1", &target, &agent_headers("plain"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
    assert!(err
        .to_string()
        .contains("no matching secret and not globally allowed"));
}

#[tokio::test]
async fn test_blocklist_wins_over_secret_hosts() {
    let deployments = Arc::new(InMemoryDeploymentStore::new());
    let vault = Arc::new(SecretVault::new(
        Arc::new(InMemorySecretStore::new()),
        SecretCipher::from_base64_key(&generate_key()).unwrap(),
    ));
    vault
        .store("dep-1", "META", "x", &["169.254.169.254".to_string()])
        .await
        .unwrap();
    let policy = NetworkPolicy::new(HostBlocklist::default(), Vec::new(), vault.clone());
    let proxy = EgressProxy::new(deployments, vault, policy, Duration::from_secs(5)).unwrap();

    // Decimal spelling of 169.254.169.254
    let target = ProxyTarget::from_proxy_path("/proxy/http/2852039166/latest", None).unwrap();
    assert_eq!(target.host(), "169.254.169.254");

    let err = proxy
        .prepare("dep-1", &target, &HeaderMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EgressError::Forbidden { ref reason, .. } if reason == "blocked"));
}

#[tokio::test]
async fn test_redirects_are_not_followed() {
    let upstream = start_upstream().await;
    let h = harness(&["127.0.0.1"], Duration::from_secs(5)).await;
    let deployment = h.proxy.authenticate(&agent_headers("")).await.unwrap();
    let target = ProxyTarget::from_proxy_path(
        &format!("/proxy/http/127.0.0.1:{}/redirect", upstream.port()),
        None,
    )
    .unwrap();

    let response = h
        .proxy
        .forward(
            &deployment,
            Method::GET,
            &target,
            &agent_headers("plain"),
            reqwest::Body::from(""),
        )
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 307);
    assert_eq!(response.headers().get("location").unwrap(), "/elsewhere");
}

#[tokio::test]
async fn test_upstream_timeout_maps_to_504() {
    let upstream = start_upstream().await;
    let h = harness(&["127.0.0.1"], Duration::from_millis(200)).await;
    let deployment = h.proxy.authenticate(&agent_headers("")).await.unwrap();
    let target = ProxyTarget::from_proxy_path(
        &format!("/proxy/http/127.0.0.1:{}/slow", upstream.port()),
        None,
    )
    .unwrap();

    let err = h
        .proxy
        .forward(
            &deployment,
            Method::GET,
            &target,
            &agent_headers("plain"),
            reqwest::Body::from(""),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EgressError::UpstreamTimeout));
    assert_eq!(err.status_code(), 504);
}

#[tokio::test]
async fn test_unreachable_upstream_maps_to_502() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let h = harness(&["127.0.0.1"], Duration::from_secs(5)).await;
    let deployment = h.proxy.authenticate(&agent_headers("")).await.unwrap();
    let target =
        ProxyTarget::from_proxy_path(&format!("/proxy/http/127.0.0.1:{}/", port), None).unwrap();

    let err = h
        .proxy
        .forward(
            &deployment,
            Method::GET,
            &target,
            &agent_headers("plain"),
            reqwest::Body::from(""),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 502);
}
