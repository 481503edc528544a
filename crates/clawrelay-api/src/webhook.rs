//! Webhook bridge: chat-platform deliveries forwarded through the tunnel

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, Response, StatusCode},
    response::IntoResponse,
};
use clawrelay_control::{ForwardError, ForwardRequest};
use clawrelay_egress::is_hop_by_hop;
use clawrelay_proto::{HeaderFields, TunnelResponse};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::middleware::secrets_match;
use crate::models::{api_error, ApiError, ErrorResponse};
use crate::AppState;

/// Header the chat platform echoes with the configured webhook secret
pub const WEBHOOK_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Relay an inbound webhook to the deployment's agent
#[utoipa::path(
    post,
    path = "/relay/hook/{deployment_id}",
    params(
        ("deployment_id" = String, Path, description = "Deployment ID")
    ),
    request_body(content = String, description = "Raw webhook payload"),
    responses(
        (status = 200, description = "Agent reply, passed through"),
        (status = 403, description = "Webhook secret mismatch", body = ErrorResponse),
        (status = 404, description = "Unknown deployment", body = ErrorResponse),
        (status = 502, description = "Tunnel failed before the agent replied", body = ErrorResponse),
        (status = 503, description = "Agent not connected", body = ErrorResponse),
        (status = 504, description = "Agent did not reply in time", body = ErrorResponse)
    ),
    tag = "relay"
)]
pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    Path(deployment_id): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response<Body>, ApiError> {
    let deployment = state
        .deployments
        .find_by_id(&deployment_id)
        .await
        .map_err(|e| {
            warn!(deployment_id = %deployment_id, "Deployment lookup failed: {}", e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Deployment lookup failed",
                "STORE_ERROR",
            )
        })?
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                format!("Deployment '{}' not found", deployment_id),
                "NOT_FOUND",
            )
        })?;

    if let Some(expected) = deployment.webhook_secret.as_deref() {
        let presented = headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !secrets_match(expected, presented) {
            warn!(deployment_id = %deployment_id, "Webhook secret mismatch");
            return Err(api_error(
                StatusCode::FORBIDDEN,
                "Invalid webhook secret",
                "FORBIDDEN",
            ));
        }
    }

    let request = ForwardRequest {
        method: method.to_string(),
        path: state.webhook_path.clone(),
        headers: forwarded_headers(&headers),
        body: String::from_utf8_lossy(&body).into_owned(),
    };

    let response = state
        .protocol
        .forward(&deployment_id, request)
        .await
        .map_err(|e| forward_error(&deployment_id, e))?;

    info!(
        deployment_id = %deployment_id,
        status = response.status,
        "Webhook delivered"
    );
    Ok(tunnel_response(response))
}

/// Only content headers and the verification header cross the tunnel
fn forwarded_headers(headers: &HeaderMap) -> HeaderFields {
    headers
        .iter()
        .filter(|(name, _)| {
            name.as_str().starts_with("content-") || name.as_str() == WEBHOOK_SECRET_HEADER
        })
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn forward_error(deployment_id: &str, error: ForwardError) -> ApiError {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
    let code = match &error {
        ForwardError::NotConnected => "AGENT_NOT_CONNECTED",
        ForwardError::Timeout => "AGENT_TIMEOUT",
        _ => "TUNNEL_ERROR",
    };
    debug!(deployment_id = %deployment_id, "Webhook not delivered: {}", error);
    api_error(status, error.to_string(), code)
}

/// Turn an agent reply into the HTTP response for the webhook caller
pub(crate) fn tunnel_response(reply: TunnelResponse) -> Response<Body> {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, reply.body).into_response();

    let headers = response.headers_mut();
    for (name, value) in reply.headers {
        if is_hop_by_hop(&name) || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => debug!(header = %name, "Dropping invalid header from agent reply"),
        }
    }

    response
}
