use thiserror::Error;

/// Why a forwarded request did not produce an agent reply
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ForwardError {
    #[error("Agent is not connected")]
    NotConnected,

    #[error("Failed to send request to agent: {0}")]
    SendFailed(String),

    #[error("Agent did not respond in time")]
    Timeout,

    #[error("Agent reconnected before responding")]
    Reconnecting,

    #[error("Agent disconnected before responding")]
    Disconnected,

    #[error("Agent connection went stale")]
    Stale,
}

impl ForwardError {
    /// HTTP status surfaced to the original caller
    pub fn status_code(&self) -> u16 {
        match self {
            ForwardError::NotConnected => 503,
            ForwardError::Timeout => 504,
            ForwardError::SendFailed(_)
            | ForwardError::Reconnecting
            | ForwardError::Disconnected
            | ForwardError::Stale => 502,
        }
    }
}
