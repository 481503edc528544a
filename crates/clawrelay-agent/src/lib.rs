//! Agent-side tunnel client
//!
//! Runs next to an agent, keeps a WebSocket open to the relay and replays
//! every tunnelled webhook against a local HTTP service.

pub mod client;
pub mod config;
pub mod forwarder;
pub mod reconnect;

pub use client::TunnelClient;
pub use config::{AgentConfig, DEFAULT_LOCAL_TIMEOUT};
pub use forwarder::LocalForwarder;
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectManager};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Relay token is required")]
    MissingToken,

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error(transparent)]
    Reconnect(#[from] ReconnectError),
}
