//! HTTP surface of the relay
//!
//! One axum router serves the webhook bridge, the agent tunnel endpoint, the
//! egress proxy and the internal operator routes.

pub mod handlers;
pub mod middleware;
pub mod models;
pub mod proxy;
pub mod tunnel_socket;
pub mod webhook;

use axum::{
    middleware as axum_middleware,
    routing::{any, get, post, put},
    Router,
};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::OpenApi;

use clawrelay_control::{TunnelProtocol, TunnelRegistry};
use clawrelay_egress::EgressProxy;
use clawrelay_store::DeploymentStore;
use clawrelay_vault::SecretVault;

pub use middleware::{InternalAuth, INTERNAL_SECRET_HEADER};
pub use webhook::WEBHOOK_SECRET_HEADER;

/// Path agents receive forwarded webhooks on unless configured otherwise
pub const DEFAULT_WEBHOOK_PATH: &str = "/webhook";

/// Application state shared across handlers
pub struct AppState {
    pub deployments: Arc<dyn DeploymentStore>,
    pub registry: Arc<TunnelRegistry>,
    pub protocol: Arc<TunnelProtocol>,
    pub vault: Arc<SecretVault>,
    pub egress: Arc<EgressProxy>,
    /// Path placed in forwarded webhook frames
    pub webhook_path: String,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Clawrelay API",
        version = "0.1.0",
        description = "Webhook relay, agent tunnel and egress gateway",
    ),
    paths(
        handlers::health_check,
        handlers::relay_status,
        handlers::list_secrets,
        handlers::put_secret,
        handlers::delete_secret,
        handlers::delete_all_secrets,
        webhook::handle_webhook,
    ),
    components(
        schemas(
            models::ErrorResponse,
            models::HealthResponse,
            models::TunnelStatus,
            models::RelayStatusResponse,
            models::SecretInfo,
            models::SecretList,
            models::PutSecretRequest,
            models::DeleteSecretsResponse,
        )
    ),
    tags(
        (name = "relay", description = "Webhook delivery and tunnel status"),
        (name = "secrets", description = "Per-deployment secret management"),
        (name = "system", description = "System health and info endpoints")
    )
)]
pub struct ApiDoc;

/// API server configuration
pub struct ApiServerConfig {
    /// Address to bind the API server
    pub bind_addr: SocketAddr,
    /// Path agents receive webhooks on
    pub webhook_path: String,
    /// Shared secret for operator routes; `None` locks them
    pub internal_secret: Option<String>,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            webhook_path: DEFAULT_WEBHOOK_PATH.to_string(),
            internal_secret: None,
        }
    }
}

/// API Server
pub struct ApiServer {
    config: ApiServerConfig,
    state: Arc<AppState>,
    auth: InternalAuth,
}

impl ApiServer {
    pub fn new(
        config: ApiServerConfig,
        deployments: Arc<dyn DeploymentStore>,
        protocol: Arc<TunnelProtocol>,
        vault: Arc<SecretVault>,
        egress: Arc<EgressProxy>,
    ) -> Self {
        if config.internal_secret.as_deref().unwrap_or("").is_empty() {
            warn!("No internal secret configured; operator routes will reject every request");
        }

        let state = Arc::new(AppState {
            deployments,
            registry: protocol.registry().clone(),
            protocol,
            vault,
            egress,
            webhook_path: config.webhook_path.clone(),
        });
        let auth = InternalAuth::new(config.internal_secret.clone());

        Self {
            config,
            state,
            auth,
        }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        // Operator routes (require X-Relay-Internal-Secret)
        let internal_router = Router::new()
            .route("/relay/status", get(handlers::relay_status))
            .route(
                "/relay/deployments/{id}/secrets",
                get(handlers::list_secrets).delete(handlers::delete_all_secrets),
            )
            .route(
                "/relay/deployments/{id}/secrets/{name}",
                put(handlers::put_secret).delete(handlers::delete_secret),
            )
            .route_layer(axum_middleware::from_fn_with_state(
                self.auth.clone(),
                middleware::require_internal_secret,
            ));

        // Authenticated by their own credentials (webhook secret, relay token)
        let public_router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/relay/openapi.json", get(handlers::openapi_json))
            .route(
                "/relay/hook/{deployment_id}",
                post(webhook::handle_webhook),
            )
            .route("/relay/tunnel", get(tunnel_socket::tunnel_upgrade))
            .route("/proxy", any(proxy::handle_proxy))
            .route("/proxy/", any(proxy::handle_proxy))
            .route("/proxy/{*path}", any(proxy::handle_proxy));

        public_router
            .merge(internal_router)
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Serve on an already-bound listener until `shutdown` completes
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), anyhow::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();

        if let Ok(addr) = listener.local_addr() {
            info!("Relay listening on {}", addr);
            info!("OpenAPI document: http://{}/relay/openapi.json", addr);
        }

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }

    /// Bind the configured address and serve until Ctrl+C
    pub async fn start(self) -> Result<(), anyhow::Error> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await
    }
}
