//! Internal-secret middleware
//!
//! Operator endpoints (`/relay/status`, secret admin) require the
//! `X-Relay-Internal-Secret` header to equal the configured secret. With no
//! secret configured these endpoints always answer 401.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::models::{api_error, ApiError};

pub const INTERNAL_SECRET_HEADER: &str = "x-relay-internal-secret";

#[derive(Clone)]
pub struct InternalAuth {
    secret: Option<Arc<str>>,
}

impl InternalAuth {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()).map(Arc::from),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    fn verify(&self, presented: Option<&str>) -> bool {
        match (&self.secret, presented) {
            (Some(expected), Some(presented)) => secrets_match(expected, presented),
            _ => false,
        }
    }
}

/// Constant-time string comparison
pub fn secrets_match(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

pub async fn require_internal_secret(
    State(auth): State<InternalAuth>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(INTERNAL_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());

    if !auth.verify(presented) {
        warn!(
            path = %request.uri().path(),
            configured = auth.is_configured(),
            "Rejected request without valid internal secret"
        );
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            "Missing or invalid internal secret",
            "UNAUTHORIZED",
        ));
    }

    Ok(next.run(request).await)
}
