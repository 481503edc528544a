//! Request and response bodies of the HTTP surface

use axum::{http::StatusCode, Json};
use chrono::{DateTime, Utc};
use clawrelay_control::{RegistryStats, TunnelStats};
use clawrelay_vault::SecretSummary;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Error half of every handler result
pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: Some(code.to_string()),
        }),
    )
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
    /// Active tunnels count
    pub active_tunnels: usize,
}

/// One live tunnel as reported by `/relay/status`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStatus {
    /// Deployment ID
    pub id: String,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Requests awaiting an agent reply
    pub pending_count: usize,
}

impl From<TunnelStats> for TunnelStatus {
    fn from(stats: TunnelStats) -> Self {
        Self {
            id: stats.id,
            connected_at: stats.connected_at,
            last_activity: stats.last_activity,
            pending_count: stats.pending_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RelayStatusResponse {
    pub connections: usize,
    pub tunnels: Vec<TunnelStatus>,
}

impl From<RegistryStats> for RelayStatusResponse {
    fn from(stats: RegistryStats) -> Self {
        Self {
            connections: stats.connections,
            tunnels: stats.tunnels.into_iter().map(TunnelStatus::from).collect(),
        }
    }
}

/// Secret metadata; values are never returned
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretInfo {
    /// Uppercase secret name
    pub name: String,
    /// Host patterns the secret may be sent to
    pub allowed_hosts: Vec<String>,
    /// Token the agent uses in place of the value
    pub placeholder: String,
}

impl From<SecretSummary> for SecretInfo {
    fn from(summary: SecretSummary) -> Self {
        Self {
            name: summary.name,
            allowed_hosts: summary.allowed_hosts,
            placeholder: summary.placeholder,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SecretList {
    pub secrets: Vec<SecretInfo>,
}

/// Create or replace a secret
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PutSecretRequest {
    /// Plaintext value (encrypted before it is stored)
    pub value: String,
    /// Exact hostnames or `*.suffix` patterns
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeleteSecretsResponse {
    /// Number of secrets removed
    pub deleted: u64,
}
