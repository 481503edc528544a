//! Agent tunnel endpoint: WebSocket upgrade and the per-socket tasks
//!
//! Each socket gets a writer task draining the connection's outbound queue
//! and a reader loop feeding text frames to [`TunnelProtocol::handle_message`].

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use clawrelay_control::{ForwardError, TunnelConnection, TunnelProtocol};
use clawrelay_proto::MAX_MESSAGE_SIZE;
use clawrelay_store::{DeploymentStatus, DeploymentStore};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::models::api_error;
use crate::AppState;

/// Outbound frames buffered per connection before senders wait
const OUTBOUND_QUEUE: usize = 256;

#[derive(Debug, Deserialize)]
pub struct TunnelQuery {
    pub token: Option<String>,
}

/// `GET /relay/tunnel?token=...`
///
/// The token is checked before the upgrade so a bad token gets a plain 401.
pub async fn tunnel_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TunnelQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        return api_error(StatusCode::UNAUTHORIZED, "Missing relay token", "UNAUTHORIZED")
            .into_response();
    };

    let deployment = match state.deployments.find_by_relay_token(&token).await {
        Ok(Some(deployment)) => deployment,
        Ok(None) => {
            warn!("Tunnel upgrade rejected: unknown relay token");
            return api_error(StatusCode::UNAUTHORIZED, "Invalid relay token", "UNAUTHORIZED")
                .into_response();
        }
        Err(e) => {
            warn!("Tunnel upgrade failed: deployment lookup error: {}", e);
            return api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Deployment lookup failed",
                "STORE_ERROR",
            )
            .into_response();
        }
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let protocol = state.protocol.clone();
    let deployments = state.deployments.clone();
    upgrade
        .max_message_size(MAX_MESSAGE_SIZE)
        .max_frame_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| run_tunnel(socket, protocol, deployments, deployment.id))
}

/// Record a tunnel status change; failures are logged, never fatal
async fn record_status(
    deployments: &dyn DeploymentStore,
    deployment_id: &str,
    status: DeploymentStatus,
) {
    match deployments.set_status(deployment_id, status).await {
        Ok(true) => {
            debug!(deployment_id = %deployment_id, status = %status, "Deployment status updated")
        }
        Ok(false) => {
            warn!(deployment_id = %deployment_id, "Status update for missing deployment")
        }
        Err(e) => {
            warn!(deployment_id = %deployment_id, "Failed to update deployment status: {}", e)
        }
    }
}

/// Serve one agent socket until it closes or is replaced
///
/// The deployment is marked `running` once registered and `stopped` when the
/// socket ends without a newer one having taken its place.
pub async fn run_tunnel(
    socket: WebSocket,
    protocol: Arc<TunnelProtocol>,
    deployments: Arc<dyn DeploymentStore>,
    deployment_id: String,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);

    let connection = Arc::new(TunnelConnection::new(deployment_id.clone(), tx));
    let connection_id = connection.connection_id();
    protocol.registry().register(connection.clone());
    record_status(deployments.as_ref(), &deployment_id, DeploymentStatus::Running).await;

    let writer = {
        let connection = connection.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = connection.closed() => break,
                    frame = rx.recv() => match frame {
                        Some(text) => {
                            if let Err(e) = sink.send(Message::Text(text.into())).await {
                                debug!(deployment_id = %connection.deployment_id(), "Tunnel write failed: {}", e);
                                connection.shutdown(ForwardError::Disconnected);
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            // Best effort: the peer may already be gone
            let _ = sink.send(Message::Close(None)).await;
        })
    };

    loop {
        tokio::select! {
            _ = connection.closed() => break,
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    protocol.handle_message(&connection, text.as_str()).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!(deployment_id = %deployment_id, "Dropping binary tunnel frame");
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => connection.touch(),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(deployment_id = %deployment_id, "Tunnel read failed: {}", e);
                    break;
                }
            },
        }
    }

    // No-op if this socket was already replaced by a newer one
    protocol.registry().unregister(&deployment_id, connection_id);
    connection.shutdown(ForwardError::Disconnected);
    let _ = writer.await;

    if !protocol.registry().is_connected(&deployment_id) {
        record_status(deployments.as_ref(), &deployment_id, DeploymentStatus::Stopped).await;
    }

    info!(
        deployment_id = %deployment_id,
        connection_id = %connection_id,
        "Tunnel closed"
    );
}
