//! Forward / handle_message behavior against in-process connections

use clawrelay_control::{
    ForwardError, ForwardRequest, TunnelConnection, TunnelProtocol, TunnelRegistry,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn setup() -> (TunnelProtocol, Arc<TunnelRegistry>) {
    let registry = Arc::new(TunnelRegistry::default());
    (TunnelProtocol::new(registry.clone()), registry)
}

fn connect(
    registry: &TunnelRegistry,
    deployment_id: &str,
) -> (Arc<TunnelConnection>, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(16);
    let conn = Arc::new(TunnelConnection::new(deployment_id, tx));
    registry.register(conn.clone());
    (conn, rx)
}

fn webhook_request() -> ForwardRequest {
    let mut request = ForwardRequest {
        method: "POST".to_string(),
        path: "/webhook".to_string(),
        body: r#"{"update_id":1}"#.to_string(),
        ..Default::default()
    };
    request
        .headers
        .insert("content-type".to_string(), "application/json".to_string());
    request
}

/// Read the next request frame the relay pushed to the agent
async fn next_request(rx: &mut mpsc::Receiver<String>) -> Value {
    let text = rx.recv().await.expect("request frame");
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn test_forward_without_tunnel_is_not_connected() {
    let (protocol, _registry) = setup();
    let result = protocol.forward("dep-1", webhook_request()).await;
    assert_eq!(result, Err(ForwardError::NotConnected));
}

#[tokio::test]
async fn test_forward_round_trip() {
    let (protocol, registry) = setup();
    let (conn, mut rx) = connect(&registry, "dep-1");
    let protocol = Arc::new(protocol);

    let call = {
        let protocol = protocol.clone();
        tokio::spawn(async move { protocol.forward("dep-1", webhook_request()).await })
    };

    let request = next_request(&mut rx).await;
    assert_eq!(request["method"], "POST");
    assert_eq!(request["path"], "/webhook");
    assert_eq!(request["headers"]["content-type"], "application/json");
    assert_eq!(request["body"], r#"{"update_id":1}"#);
    let id = request["id"].as_str().unwrap().to_string();
    assert_eq!(conn.pending().count(), 1);

    let reply = json!({"id": id, "status": 200, "headers": {"x-agent": "1"}, "body": "ok"});
    protocol.handle_message(&conn, &reply.to_string()).await;

    let response = call.await.unwrap().unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "ok");
    assert_eq!(response.headers.get("x-agent").map(String::as_str), Some("1"));
    assert_eq!(conn.pending().count(), 0);
}

#[tokio::test]
async fn test_out_of_order_replies_are_correlated_by_id() {
    let (protocol, registry) = setup();
    let (conn, mut rx) = connect(&registry, "dep-1");
    let protocol = Arc::new(protocol);

    let first = {
        let protocol = protocol.clone();
        tokio::spawn(async move { protocol.forward("dep-1", webhook_request()).await })
    };
    let first_id = next_request(&mut rx).await["id"].as_str().unwrap().to_string();

    let second = {
        let protocol = protocol.clone();
        tokio::spawn(async move { protocol.forward("dep-1", webhook_request()).await })
    };
    let second_id = next_request(&mut rx).await["id"].as_str().unwrap().to_string();

    let reply = json!({"id": second_id, "status": 202, "headers": {}, "body": "second"});
    protocol.handle_message(&conn, &reply.to_string()).await;
    let reply = json!({"id": first_id, "status": 201, "headers": {}, "body": "first"});
    protocol.handle_message(&conn, &reply.to_string()).await;

    assert_eq!(first.await.unwrap().unwrap().body, "first");
    assert_eq!(second.await.unwrap().unwrap().body, "second");
}

#[tokio::test(start_paused = true)]
async fn test_forward_times_out_and_clears_pending() {
    let registry = Arc::new(TunnelRegistry::default());
    let protocol = TunnelProtocol::with_timeout(registry.clone(), Duration::from_secs(30));
    let (conn, _rx) = connect(&registry, "dep-1");

    let result = protocol.forward("dep-1", webhook_request()).await;

    assert_eq!(result, Err(ForwardError::Timeout));
    assert_eq!(conn.pending().count(), 0);
}

#[tokio::test]
async fn test_send_failure_resolves_immediately() {
    let (protocol, registry) = setup();
    let (conn, rx) = connect(&registry, "dep-1");
    drop(rx);

    let result = protocol.forward("dep-1", webhook_request()).await;
    assert!(matches!(result, Err(ForwardError::SendFailed(_))));
    assert_eq!(conn.pending().count(), 0);
}

#[tokio::test]
async fn test_replacement_fails_in_flight_request_with_reconnecting() {
    let (protocol, registry) = setup();
    let (_old, mut rx) = connect(&registry, "dep-1");
    let protocol = Arc::new(protocol);

    let call = {
        let protocol = protocol.clone();
        tokio::spawn(async move { protocol.forward("dep-1", webhook_request()).await })
    };
    next_request(&mut rx).await;

    let (_new, _rx2) = connect(&registry, "dep-1");

    assert_eq!(call.await.unwrap(), Err(ForwardError::Reconnecting));
}

#[tokio::test]
async fn test_reply_on_replaced_connection_is_ignored() {
    let (protocol, registry) = setup();
    let (old, _rx_old) = connect(&registry, "dep-1");
    let (new, mut rx_new) = connect(&registry, "dep-1");
    let protocol = Arc::new(protocol);

    let call = {
        let protocol = protocol.clone();
        tokio::spawn(async move { protocol.forward("dep-1", webhook_request()).await })
    };
    let id = next_request(&mut rx_new).await["id"].as_str().unwrap().to_string();

    // Same id, wrong socket
    protocol
        .handle_message(&old, &json!({"id": id, "status": 500, "headers": {}, "body": ""}).to_string())
        .await;
    assert_eq!(new.pending().count(), 1);

    protocol
        .handle_message(&new, &json!({"id": id, "status": 200, "headers": {}, "body": ""}).to_string())
        .await;
    assert_eq!(call.await.unwrap().unwrap().status, 200);
}

#[tokio::test]
async fn test_ping_is_answered_with_pong() {
    let (protocol, registry) = setup();
    let (conn, mut rx) = connect(&registry, "dep-1");

    protocol.handle_message(&conn, r#"{"type":"ping"}"#).await;

    assert_eq!(rx.recv().await.as_deref(), Some(r#"{"type":"pong"}"#));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_malformed_and_unknown_frames_are_dropped() {
    let (protocol, registry) = setup();
    let (conn, mut rx) = connect(&registry, "dep-1");
    let _pending = conn.pending().register("known");

    for frame in [
        "garbage",
        r#"{"id":"known","status":"200"}"#,
        r#"{"id":"known","status":200,"headers":{"a":1}}"#,
        r#"{"type":"subscribe"}"#,
        r#"{"id":"known","status":200}"#,
        r#"{"id":"unknown","status":200,"headers":{},"body":""}"#,
    ] {
        protocol.handle_message(&conn, frame).await;
    }

    assert_eq!(conn.pending().count(), 1);
    assert!(rx.try_recv().is_err());
    assert!(!conn.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_keep_connection_alive() {
    let registry = Arc::new(TunnelRegistry::new(Duration::from_secs(300)));
    let protocol = TunnelProtocol::new(registry.clone());
    let (conn, _rx) = connect(&registry, "dep-1");

    for _ in 0..4 {
        tokio::time::advance(Duration::from_secs(100)).await;
        protocol.handle_message(&conn, r#"{"type":"pong"}"#).await;
        assert!(registry.reap().is_empty());
    }

    tokio::time::advance(Duration::from_secs(301)).await;
    assert_eq!(registry.reap(), vec!["dep-1".to_string()]);
}
