//! `/proxy/...` handler: HTTP glue around [`clawrelay_egress::EgressProxy`]

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{HeaderMap, Method, Response, StatusCode, Uri},
};
use clawrelay_egress::{EgressError, ProxyTarget, USAGE_EXAMPLE};
use std::sync::Arc;
use tracing::debug;

use crate::models::{api_error, ApiError};
use crate::AppState;

/// Forward an agent's outbound call after policy checks and secret substitution
///
/// The path is taken from the raw URI so percent-encoding in the upstream
/// path survives untouched.
pub async fn handle_proxy(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Result<Response<Body>, ApiError> {
    let deployment = state
        .egress
        .authenticate(&headers)
        .await
        .map_err(egress_error)?;

    let target = ProxyTarget::from_proxy_path(uri.path(), uri.query()).map_err(|e| {
        debug!(path = %uri.path(), "Rejected proxy path: {}", e);
        api_error(
            StatusCode::BAD_REQUEST,
            format!("{}. Usage: {}", e, USAGE_EXAMPLE),
            "INVALID_TARGET",
        )
    })?;

    let upstream_body = if body.size_hint().exact() == Some(0) {
        reqwest::Body::from(Vec::new())
    } else {
        reqwest::Body::wrap_stream(body.into_data_stream())
    };

    let upstream = state
        .egress
        .forward(&deployment, method, &target, &headers, upstream_body)
        .await
        .map_err(egress_error)?;

    let status = upstream.status();
    let response_headers = clawrelay_egress::filter_response_headers(upstream.headers());

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

fn egress_error(error: EgressError) -> ApiError {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let code = match &error {
        EgressError::Unauthorized => "UNAUTHORIZED",
        EgressError::InvalidTarget(_) => "INVALID_TARGET",
        EgressError::Forbidden { .. } => "FORBIDDEN",
        EgressError::UnresolvedSecrets(_) => "UNRESOLVED_SECRETS",
        EgressError::UpstreamTimeout => "UPSTREAM_TIMEOUT",
        EgressError::Upstream(_) => "UPSTREAM_ERROR",
        EgressError::Internal(_) => "INTERNAL_ERROR",
    };
    let message = match &error {
        EgressError::InvalidTarget(e) => format!("{}. Usage: {}", e, USAGE_EXAMPLE),
        other => other.to_string(),
    };
    api_error(status, message, code)
}
