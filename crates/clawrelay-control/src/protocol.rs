//! Request/reply exchange over a tunnel
//!
//! `forward` sends a request to a deployment's agent and waits for the reply
//! correlated by id. `handle_message` is fed every text frame a tunnel socket
//! receives, together with the connection that received it.

use crate::connection::TunnelConnection;
use crate::registry::TunnelRegistry;
use crate::ForwardError;
use clawrelay_proto::{
    encode, AgentFrame, HeaderFields, Heartbeat, TunnelRequest, TunnelResponse,
    DEFAULT_REQUEST_TIMEOUT,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// An HTTP-shaped request to deliver to an agent
#[derive(Debug, Clone, Default)]
pub struct ForwardRequest {
    pub method: String,
    pub path: String,
    pub headers: HeaderFields,
    pub body: String,
}

pub struct TunnelProtocol {
    registry: Arc<TunnelRegistry>,
    request_timeout: Duration,
}

impl TunnelProtocol {
    pub fn new(registry: Arc<TunnelRegistry>) -> Self {
        Self::with_timeout(registry, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(registry: Arc<TunnelRegistry>, request_timeout: Duration) -> Self {
        Self {
            registry,
            request_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<TunnelRegistry> {
        &self.registry
    }

    /// Send `request` to the agent of `deployment_id` and wait for its reply
    pub async fn forward(
        &self,
        deployment_id: &str,
        request: ForwardRequest,
    ) -> Result<TunnelResponse, ForwardError> {
        let connection = self
            .registry
            .get(deployment_id)
            .ok_or(ForwardError::NotConnected)?;

        let request_id = Uuid::new_v4().to_string();
        let frame = encode(&TunnelRequest {
            id: request_id.clone(),
            method: request.method,
            path: request.path,
            headers: request.headers,
            body: request.body,
        })
        .map_err(|e| ForwardError::SendFailed(e.to_string()))?;

        let mut reply = connection.pending().register(&request_id);
        debug!(
            deployment_id = %deployment_id,
            request_id = %request_id,
            "Forwarding request through tunnel"
        );

        if let Err(e) = connection.send(frame).await {
            if connection.pending().cancel(&request_id) {
                warn!(deployment_id = %deployment_id, request_id = %request_id, "{}", e);
                return Err(e);
            }
            // Teardown claimed the entry first; report its outcome instead
            return reply.await.unwrap_or(Err(ForwardError::Disconnected));
        }

        match tokio::time::timeout(self.request_timeout, &mut reply).await {
            Ok(resolution) => resolution.unwrap_or(Err(ForwardError::Disconnected)),
            Err(_) => {
                if connection.pending().cancel(&request_id) {
                    warn!(
                        deployment_id = %deployment_id,
                        request_id = %request_id,
                        timeout_secs = self.request_timeout.as_secs(),
                        "Tunnel request timed out"
                    );
                    Err(ForwardError::Timeout)
                } else {
                    // A reply or teardown claimed it just as the timer fired
                    reply.await.unwrap_or(Err(ForwardError::Disconnected))
                }
            }
        }
    }

    /// Dispatch one text frame received on `connection`
    pub async fn handle_message(&self, connection: &TunnelConnection, text: &str) {
        let frame = match AgentFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    deployment_id = %connection.deployment_id(),
                    "Dropping malformed tunnel frame: {}",
                    e
                );
                return;
            }
        };

        match frame {
            AgentFrame::Heartbeat(Heartbeat::Ping) => {
                connection.touch();
                match encode(&Heartbeat::Pong) {
                    Ok(pong) => {
                        if let Err(e) = connection.send(pong).await {
                            debug!(deployment_id = %connection.deployment_id(), "Failed to send pong: {}", e);
                        }
                    }
                    Err(e) => warn!("Failed to encode pong: {}", e),
                }
            }
            AgentFrame::Heartbeat(Heartbeat::Pong) => connection.touch(),
            AgentFrame::Response(response) => {
                connection.touch();
                let request_id = response.id.clone();
                if !connection.pending().resolve(&request_id, response) {
                    debug!(
                        deployment_id = %connection.deployment_id(),
                        request_id = %request_id,
                        "Discarding reply for unknown request"
                    );
                }
            }
        }
    }
}
