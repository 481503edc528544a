//! Egress proxy pipeline: authenticate, authorize, substitute, forward

use crate::headers::prepare_upstream_headers;
use crate::policy::NetworkPolicy;
use crate::target::{ProxyTarget, TargetError};
use clawrelay_store::{Deployment, DeploymentStore, StoreError};
use clawrelay_vault::{
    replace_placeholders_in_bytes, scan_bytes_for_placeholders, SecretVault, VaultError,
};
use http::header::{HeaderMap, HeaderValue, PROXY_AUTHORIZATION};
use reqwest::{redirect, Method};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const RELAY_TOKEN_HEADER: &str = "x-relay-token";

/// Default wait for upstream response headers
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum EgressError {
    #[error("Missing or invalid relay token")]
    Unauthorized,

    #[error(transparent)]
    InvalidTarget(#[from] TargetError),

    #[error("Access to {host} denied: {reason}")]
    Forbidden { host: String, reason: String },

    #[error("Unresolved secret placeholders: {}", .0.join(", "))]
    UnresolvedSecrets(Vec<String>),

    #[error("Upstream did not respond in time")]
    UpstreamTimeout,

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EgressError {
    pub fn status_code(&self) -> u16 {
        match self {
            EgressError::Unauthorized => 401,
            EgressError::InvalidTarget(_) => 400,
            EgressError::Forbidden { .. } | EgressError::UnresolvedSecrets(_) => 403,
            EgressError::UpstreamTimeout => 504,
            EgressError::Upstream(_) => 502,
            EgressError::Internal(_) => 500,
        }
    }
}

impl From<StoreError> for EgressError {
    fn from(e: StoreError) -> Self {
        EgressError::Internal(e.to_string())
    }
}

impl From<VaultError> for EgressError {
    fn from(e: VaultError) -> Self {
        EgressError::Internal(e.to_string())
    }
}

/// Relay token from `X-Relay-Token` or `Proxy-Authorization: Bearer`
pub fn relay_token(headers: &HeaderMap) -> Option<String> {
    let direct = headers
        .get(RELAY_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = direct {
        return Some(token.to_string());
    }

    let value = headers.get(PROXY_AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

pub struct EgressProxy {
    client: reqwest::Client,
    deployments: Arc<dyn DeploymentStore>,
    vault: Arc<SecretVault>,
    policy: NetworkPolicy,
    upstream_timeout: Duration,
}

impl EgressProxy {
    pub fn new(
        deployments: Arc<dyn DeploymentStore>,
        vault: Arc<SecretVault>,
        policy: NetworkPolicy,
        upstream_timeout: Duration,
    ) -> Result<Self, EgressError> {
        // Redirects are returned to the agent as-is; following one could land
        // on a host the policy never saw.
        let client = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|e| EgressError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            deployments,
            vault,
            policy,
            upstream_timeout,
        })
    }

    pub fn policy(&self) -> &NetworkPolicy {
        &self.policy
    }

    /// Resolve the calling deployment from its relay token
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Deployment, EgressError> {
        let token = relay_token(headers).ok_or(EgressError::Unauthorized)?;
        self.deployments
            .find_by_relay_token(&token)
            .await?
            .ok_or(EgressError::Unauthorized)
    }

    /// Apply the network policy; denial carries the readable reason
    pub async fn authorize(
        &self,
        deployment_id: &str,
        target: &ProxyTarget,
    ) -> Result<(), EgressError> {
        let decision = self.policy.check_access(deployment_id, target.host()).await?;
        if decision.allowed {
            Ok(())
        } else {
            warn!(
                deployment_id = %deployment_id,
                host = %target.host(),
                reason = %decision.reason,
                "Egress request denied"
            );
            Err(EgressError::Forbidden {
                host: target.host().to_string(),
                reason: decision.reason.to_string(),
            })
        }
    }

    /// Replace every placeholder in header values with its secret
    ///
    /// Fails if any referenced secret is missing or not scoped to the target
    /// host, so a literal placeholder is never sent upstream.
    pub async fn substitute_secrets(
        &self,
        deployment_id: &str,
        target: &ProxyTarget,
        headers: &mut HeaderMap,
    ) -> Result<usize, EgressError> {
        let mut names = Vec::new();
        for value in headers.values() {
            for name in scan_bytes_for_placeholders(value.as_bytes()) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        if names.is_empty() {
            return Ok(0);
        }

        let mut resolved = HashMap::new();
        let mut unresolved = BTreeSet::new();
        for name in names {
            match self
                .vault
                .resolve(deployment_id, &name, target.host())
                .await?
            {
                Some(value) => {
                    resolved.insert(name, value);
                }
                None => {
                    unresolved.insert(name);
                }
            }
        }

        if !unresolved.is_empty() {
            let names: Vec<String> = unresolved.into_iter().collect();
            warn!(
                deployment_id = %deployment_id,
                host = %target.host(),
                secrets = ?names,
                "Unresolved secret placeholders"
            );
            return Err(EgressError::UnresolvedSecrets(names));
        }

        for value in headers.values_mut() {
            let replaced = replace_placeholders_in_bytes(value.as_bytes(), |name| {
                resolved.get(name).map(String::as_str)
            });
            if replaced != value.as_bytes() {
                let sensitive = value.is_sensitive();
                let mut substituted = HeaderValue::from_bytes(&replaced).map_err(|_| {
                    EgressError::Internal("secret value is not a valid header value".to_string())
                })?;
                substituted.set_sensitive(sensitive);
                *value = substituted;
            }
        }

        debug!(
            deployment_id = %deployment_id,
            host = %target.host(),
            count = resolved.len(),
            "Substituted secret placeholders"
        );
        Ok(resolved.len())
    }

    /// Policy check, header preparation and substitution for one request
    pub async fn prepare(
        &self,
        deployment_id: &str,
        target: &ProxyTarget,
        incoming: &HeaderMap,
    ) -> Result<HeaderMap, EgressError> {
        self.authorize(deployment_id, target).await?;

        let mut headers = prepare_upstream_headers(incoming, target)
            .map_err(|e| EgressError::Internal(e.to_string()))?;
        self.substitute_secrets(deployment_id, target, &mut headers)
            .await?;
        Ok(headers)
    }

    /// Send the prepared request; resolves once response headers arrive
    pub async fn send(
        &self,
        method: Method,
        target: &ProxyTarget,
        headers: HeaderMap,
        body: reqwest::Body,
    ) -> Result<reqwest::Response, EgressError> {
        let request = self
            .client
            .request(method, target.url().clone())
            .headers(headers)
            .body(body)
            .send();

        match tokio::time::timeout(self.upstream_timeout, request).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) if e.is_timeout() => Err(EgressError::UpstreamTimeout),
            Ok(Err(e)) => Err(EgressError::Upstream(e.to_string())),
            Err(_) => Err(EgressError::UpstreamTimeout),
        }
    }

    /// Full pipeline for an authenticated deployment
    pub async fn forward(
        &self,
        deployment: &Deployment,
        method: Method,
        target: &ProxyTarget,
        incoming: &HeaderMap,
        body: reqwest::Body,
    ) -> Result<reqwest::Response, EgressError> {
        let headers = self.prepare(&deployment.id, target, incoming).await?;
        let method_name = method.to_string();

        let result = self.send(method, target, headers, body).await;
        match &result {
            Ok(response) => info!(
                deployment_id = %deployment.id,
                method = %method_name,
                host = %target.host(),
                status = response.status().as_u16(),
                "Egress request forwarded"
            ),
            Err(e) => warn!(
                deployment_id = %deployment.id,
                method = %method_name,
                host = %target.host(),
                "Egress request failed: {}",
                e
            ),
        }
        result
    }
}
