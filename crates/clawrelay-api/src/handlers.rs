use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use clawrelay_vault::VaultError;
use std::sync::Arc;
use tracing::{debug, info, warn};
use utoipa::OpenApi;

use crate::models::*;
use crate::{ApiDoc, AppState};

/// Health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_tunnels: state.registry.len(),
    })
}

/// Connected agents and their in-flight request counts
#[utoipa::path(
    get,
    path = "/relay/status",
    responses(
        (status = 200, description = "Live tunnels", body = RelayStatusResponse),
        (status = 401, description = "Missing or invalid internal secret", body = ErrorResponse)
    ),
    params(
        ("X-Relay-Internal-Secret" = String, Header, description = "Internal secret")
    ),
    tag = "relay"
)]
pub async fn relay_status(State(state): State<Arc<AppState>>) -> Json<RelayStatusResponse> {
    Json(state.registry.stats().into())
}

/// List a deployment's secrets (names and scopes only)
#[utoipa::path(
    get,
    path = "/relay/deployments/{id}/secrets",
    params(
        ("id" = String, Path, description = "Deployment ID"),
        ("X-Relay-Internal-Secret" = String, Header, description = "Internal secret")
    ),
    responses(
        (status = 200, description = "Secrets of the deployment", body = SecretList),
        (status = 401, description = "Missing or invalid internal secret", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "secrets"
)]
pub async fn list_secrets(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SecretList>, ApiError> {
    debug!(deployment_id = %id, "Listing secrets");

    let secrets = state.vault.list(&id).await.map_err(vault_error)?;
    Ok(Json(SecretList {
        secrets: secrets.into_iter().map(SecretInfo::from).collect(),
    }))
}

/// Create or replace a secret
#[utoipa::path(
    put,
    path = "/relay/deployments/{id}/secrets/{name}",
    params(
        ("id" = String, Path, description = "Deployment ID"),
        ("name" = String, Path, description = "Secret name (letters, digits, underscores)"),
        ("X-Relay-Internal-Secret" = String, Header, description = "Internal secret")
    ),
    request_body = PutSecretRequest,
    responses(
        (status = 200, description = "Secret stored", body = SecretInfo),
        (status = 400, description = "Invalid secret name", body = ErrorResponse),
        (status = 401, description = "Missing or invalid internal secret", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "secrets"
)]
pub async fn put_secret(
    State(state): State<Arc<AppState>>,
    Path((id, name)): Path<(String, String)>,
    Json(req): Json<PutSecretRequest>,
) -> Result<Json<SecretInfo>, ApiError> {
    let summary = state
        .vault
        .store(&id, &name, &req.value, &req.allowed_hosts)
        .await
        .map_err(vault_error)?;

    Ok(Json(summary.into()))
}

/// Delete one secret
#[utoipa::path(
    delete,
    path = "/relay/deployments/{id}/secrets/{name}",
    params(
        ("id" = String, Path, description = "Deployment ID"),
        ("name" = String, Path, description = "Secret name"),
        ("X-Relay-Internal-Secret" = String, Header, description = "Internal secret")
    ),
    responses(
        (status = 204, description = "Secret deleted"),
        (status = 401, description = "Missing or invalid internal secret", body = ErrorResponse),
        (status = 404, description = "Secret not found", body = ErrorResponse)
    ),
    tag = "secrets"
)]
pub async fn delete_secret(
    State(state): State<Arc<AppState>>,
    Path((id, name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    if state.vault.delete(&id, &name).await.map_err(vault_error)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Secret '{}' not found", name),
            "NOT_FOUND",
        ))
    }
}

/// Delete every secret of a deployment (teardown)
#[utoipa::path(
    delete,
    path = "/relay/deployments/{id}/secrets",
    params(
        ("id" = String, Path, description = "Deployment ID"),
        ("X-Relay-Internal-Secret" = String, Header, description = "Internal secret")
    ),
    responses(
        (status = 200, description = "Secrets deleted", body = DeleteSecretsResponse),
        (status = 401, description = "Missing or invalid internal secret", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "secrets"
)]
pub async fn delete_all_secrets(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteSecretsResponse>, ApiError> {
    let deleted = state.vault.delete_all(&id).await.map_err(vault_error)?;
    info!(deployment_id = %id, deleted, "Deployment secrets removed");
    Ok(Json(DeleteSecretsResponse { deleted }))
}

/// OpenAPI document for the JSON endpoints
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

fn vault_error(error: VaultError) -> ApiError {
    match error {
        VaultError::InvalidName(_) => {
            api_error(StatusCode::BAD_REQUEST, error.to_string(), "INVALID_NAME")
        }
        other => {
            warn!("Secret operation failed: {}", other);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Secret operation failed",
                "VAULT_ERROR",
            )
        }
    }
}
