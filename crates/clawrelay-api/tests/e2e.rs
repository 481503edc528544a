//! Full relay over real sockets: a WebSocket agent and an HTTP webhook caller

use clawrelay_api::{ApiServer, ApiServerConfig, AppState};
use clawrelay_control::{TunnelProtocol, TunnelRegistry};
use clawrelay_egress::{EgressProxy, HostBlocklist, NetworkPolicy, DEFAULT_UPSTREAM_TIMEOUT};
use clawrelay_store::{
    DeploymentStatus, DeploymentStore, InMemoryDeploymentStore, InMemorySecretStore,
    NewDeployment,
};
use clawrelay_vault::{generate_key, SecretCipher, SecretVault};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type AgentSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_relay() -> (SocketAddr, Arc<AppState>) {
    let deployments = Arc::new(InMemoryDeploymentStore::new());
    deployments
        .insert(NewDeployment {
            id: "dep-1".to_string(),
            relay_token: "token-1".to_string(),
            webhook_secret: None,
        })
        .await
        .unwrap();

    let cipher = SecretCipher::from_base64_key(&generate_key()).unwrap();
    let vault = Arc::new(SecretVault::new(Arc::new(InMemorySecretStore::new()), cipher));
    let policy = NetworkPolicy::new(HostBlocklist::default(), Vec::new(), vault.clone());
    let egress = Arc::new(
        EgressProxy::new(deployments.clone(), vault.clone(), policy, DEFAULT_UPSTREAM_TIMEOUT)
            .unwrap(),
    );
    let protocol = Arc::new(TunnelProtocol::with_timeout(
        Arc::new(TunnelRegistry::default()),
        Duration::from_secs(5),
    ));

    let server = ApiServer::new(
        ApiServerConfig::default(),
        deployments,
        protocol,
        vault,
        egress,
    );
    let state = server.state().clone();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve(listener, std::future::pending()));
    (addr, state)
}

async fn connect_agent(addr: SocketAddr, token: &str) -> AgentSocket {
    let url = format!("ws://{}/relay/tunnel?token={}", addr, token);
    let (socket, _) = connect_async(url).await.unwrap();
    socket
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn wait_for_status(state: &AppState, expected: DeploymentStatus) {
    for _ in 0..200 {
        let deployment = state.deployments.find_by_id("dep-1").await.unwrap().unwrap();
        if deployment.status == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("deployment never reached {}", expected);
}

/// Answer every tunnel request with `tag` in the body until the socket closes
fn run_agent(mut socket: AgentSocket, tag: &'static str) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(Ok(message)) = socket.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            let frame: Value = serde_json::from_str(&text).unwrap();
            if frame.get("type").is_some() {
                continue;
            }
            let reply = json!({
                "id": frame["id"],
                "status": 200,
                "headers": {"content-type": "application/json"},
                "body": json!({"agent": tag, "echo": frame["body"]}).to_string(),
            });
            if socket.send(Message::Text(reply.to_string())).await.is_err() {
                break;
            }
        }
    })
}

async fn post_webhook(addr: SocketAddr, body: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{}/relay/hook/dep-1", addr))
        .header("content-type", "application/json")
        .body(body.to_string())
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_webhook_round_trip_through_agent() {
    let (addr, state) = start_relay().await;

    let agent = connect_agent(addr, "token-1").await;
    wait_until(|| state.registry.is_connected("dep-1")).await;
    let _agent = run_agent(agent, "first");

    let response = post_webhook(addr, r#"{"update_id":1}"#).await;
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["agent"], "first");
    assert_eq!(body["echo"], r#"{"update_id":1}"#);
}

#[tokio::test]
async fn test_reconnect_replaces_previous_socket() {
    let (addr, state) = start_relay().await;

    let first = connect_agent(addr, "token-1").await;
    wait_until(|| state.registry.is_connected("dep-1")).await;
    let first_id = state.registry.get("dep-1").unwrap().connection_id();
    let first_task = run_agent(first, "first");

    let second = connect_agent(addr, "token-1").await;
    wait_until(|| {
        state
            .registry
            .get("dep-1")
            .map(|c| c.connection_id() != first_id)
            .unwrap_or(false)
    })
    .await;
    let _second_task = run_agent(second, "second");

    // The replaced socket is closed by the relay
    tokio::time::timeout(Duration::from_secs(5), first_task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.registry.len(), 1);

    let body: Value = post_webhook(addr, "{}").await.json().await.unwrap();
    assert_eq!(body["agent"], "second");
}

#[tokio::test]
async fn test_agent_disconnect_makes_webhook_unavailable() {
    let (addr, state) = start_relay().await;

    let mut agent = connect_agent(addr, "token-1").await;
    wait_until(|| state.registry.is_connected("dep-1")).await;
    agent.close(None).await.unwrap();
    wait_until(|| !state.registry.is_connected("dep-1")).await;

    let response = post_webhook(addr, "{}").await;
    assert_eq!(response.status(), 503);
}

#[tokio::test]
async fn test_tunnel_lifecycle_updates_deployment_status() {
    let (addr, state) = start_relay().await;
    let deployment = state.deployments.find_by_id("dep-1").await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Provisioning);

    let first = connect_agent(addr, "token-1").await;
    wait_for_status(&state, DeploymentStatus::Running).await;
    let first_id = state.registry.get("dep-1").unwrap().connection_id();
    let first_task = run_agent(first, "first");

    // A replaced socket does not mark the deployment stopped
    let mut second = connect_agent(addr, "token-1").await;
    tokio::time::timeout(Duration::from_secs(5), first_task)
        .await
        .unwrap()
        .unwrap();
    wait_until(|| {
        state
            .registry
            .get("dep-1")
            .map(|c| c.connection_id() != first_id)
            .unwrap_or(false)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let deployment = state.deployments.find_by_id("dep-1").await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Running);

    second.close(None).await.unwrap();
    wait_for_status(&state, DeploymentStatus::Stopped).await;
}

#[tokio::test]
async fn test_heartbeat_gets_pong() {
    let (addr, state) = start_relay().await;

    let mut agent = connect_agent(addr, "token-1").await;
    wait_until(|| state.registry.is_connected("dep-1")).await;

    agent
        .send(Message::Text(r#"{"type":"ping"}"#.to_string()))
        .await
        .unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), agent.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply, Message::Text(r#"{"type":"pong"}"#.to_string()));
}

#[tokio::test]
async fn test_invalid_token_is_refused_before_upgrade() {
    let (addr, state) = start_relay().await;

    let url = format!("ws://{}/relay/tunnel?token=bogus", addr);
    assert!(connect_async(url).await.is_err());
    assert!(state.registry.is_empty());
}
