//! Agent configuration

use crate::reconnect::ReconnectConfig;
use crate::AgentError;
use clawrelay_proto::{DEFAULT_HEARTBEAT_INTERVAL, TUNNEL_PATH};
use std::time::Duration;
use url::Url;

/// Default limit for one call to the local service
pub const DEFAULT_LOCAL_TIMEOUT: Duration = Duration::from_secs(25);

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Relay base URL (`https://relay.example.com`, `ws://127.0.0.1:8080`, ...)
    pub relay_url: Url,
    /// Relay token of this deployment
    pub token: String,
    /// Local HTTP service tunnel requests are replayed against
    pub forward_url: Url,
    pub heartbeat_interval: Duration,
    pub local_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl AgentConfig {
    pub fn new(relay_url: &str, token: &str, forward_url: &str) -> Result<Self, AgentError> {
        let relay_url =
            Url::parse(relay_url).map_err(|e| AgentError::InvalidUrl(format!("{}: {}", relay_url, e)))?;
        let forward_url = Url::parse(forward_url)
            .map_err(|e| AgentError::InvalidUrl(format!("{}: {}", forward_url, e)))?;

        if !matches!(forward_url.scheme(), "http" | "https") {
            return Err(AgentError::InvalidUrl(format!(
                "forward URL must be http or https, got {}",
                forward_url.scheme()
            )));
        }
        if token.is_empty() {
            return Err(AgentError::MissingToken);
        }

        Ok(Self {
            relay_url,
            token: token.to_string(),
            forward_url,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            local_timeout: DEFAULT_LOCAL_TIMEOUT,
            reconnect: ReconnectConfig::default(),
        })
    }

    /// WebSocket URL of the relay's tunnel endpoint, token included
    pub fn tunnel_url(&self) -> Result<Url, AgentError> {
        let scheme = match self.relay_url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(AgentError::InvalidUrl(format!(
                    "unsupported relay scheme '{}'",
                    other
                )))
            }
        };

        let mut url = self.relay_url.clone();
        url.set_scheme(scheme)
            .map_err(|_| AgentError::InvalidUrl(self.relay_url.to_string()))?;
        url.set_path(TUNNEL_PATH);
        url.set_fragment(None);
        url.query_pairs_mut().clear().append_pair("token", &self.token);
        Ok(url)
    }
}
