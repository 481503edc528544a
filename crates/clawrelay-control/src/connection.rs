//! A live tunnel to one deployment's agent

use crate::pending::PendingRequests;
use crate::ForwardError;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Relay-side handle of an agent's tunnel socket
///
/// Frames queued with [`send`](Self::send) are drained by the socket's writer
/// task. [`shutdown`](Self::shutdown) fails all pending requests and signals
/// both socket tasks to stop.
pub struct TunnelConnection {
    deployment_id: String,
    connection_id: Uuid,
    outbound: mpsc::Sender<String>,
    close: CancellationToken,
    pending: PendingRequests,
    connected_at: DateTime<Utc>,
    epoch: Instant,
    /// Milliseconds since `epoch` of the last frame seen from the agent
    last_activity_ms: AtomicU64,
}

impl TunnelConnection {
    pub fn new(deployment_id: impl Into<String>, outbound: mpsc::Sender<String>) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            connection_id: Uuid::new_v4(),
            outbound,
            close: CancellationToken::new(),
            pending: PendingRequests::new(),
            connected_at: Utc::now(),
            epoch: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Record activity from the agent
    pub fn touch(&self) {
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        self.last_activity_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> Instant {
        self.epoch + Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed))
    }

    /// Wall-clock time of the last activity
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        let ms = self.last_activity_ms.load(Ordering::Relaxed);
        self.connected_at + chrono::Duration::milliseconds(ms as i64)
    }

    /// How long the connection has been idle as of `now`
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    /// Queue a text frame for the writer task
    pub async fn send(&self, frame: String) -> Result<(), ForwardError> {
        if self.close.is_cancelled() {
            return Err(ForwardError::SendFailed("connection closed".to_string()));
        }

        tokio::select! {
            _ = self.close.cancelled() => {
                Err(ForwardError::SendFailed("connection closed".to_string()))
            }
            result = self.outbound.send(frame) => {
                result.map_err(|_| ForwardError::SendFailed("socket writer has stopped".to_string()))
            }
        }
    }

    /// Fail all pending requests with `reason` and signal the socket to close.
    /// Later calls only keep the first reason.
    pub fn shutdown(&self, reason: ForwardError) {
        let failed = self.pending.fail_all(reason.clone());
        if !self.close.is_cancelled() {
            debug!(
                deployment_id = %self.deployment_id,
                connection_id = %self.connection_id,
                failed,
                "Closing tunnel connection: {}",
                reason
            );
            self.close.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Completes once the connection has been shut down
    pub async fn closed(&self) {
        self.close.cancelled().await
    }
}

impl std::fmt::Debug for TunnelConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelConnection")
            .field("deployment_id", &self.deployment_id)
            .field("connection_id", &self.connection_id)
            .field("connected_at", &self.connected_at)
            .field("pending", &self.pending.count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
