//! Pending requests tracker
//!
//! Correlates requests sent down a tunnel with the replies coming back.
//! Removing an entry from the map is the claim: whichever of reply, timeout
//! or teardown removes it first is the only one that resolves it.

use crate::ForwardError;
use clawrelay_proto::TunnelResponse;
use dashmap::DashMap;
use std::sync::OnceLock;
use tokio::sync::oneshot;
use tracing::debug;

/// Outcome delivered to a waiting caller
pub type Resolution = Result<TunnelResponse, ForwardError>;

/// Tracks requests awaiting a reply on one connection
#[derive(Default)]
pub struct PendingRequests {
    /// Maps request id -> resolver
    requests: DashMap<String, oneshot::Sender<Resolution>>,
    /// Set once by `fail_all`; later registrations fail immediately
    closed: OnceLock<ForwardError>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request and return the receiver for its resolution
    pub fn register(&self, request_id: &str) -> oneshot::Receiver<Resolution> {
        let (tx, rx) = oneshot::channel();
        self.requests.insert(request_id.to_string(), tx);

        // A teardown that raced this insert may have drained the map already
        if let Some(reason) = self.closed.get() {
            self.fail(request_id, reason.clone());
        } else {
            debug!(request_id = %request_id, "Registered pending request");
        }

        rx
    }

    /// Deliver a reply. Returns false if the id is unknown or already claimed.
    pub fn resolve(&self, request_id: &str, response: TunnelResponse) -> bool {
        self.settle(request_id, Ok(response))
    }

    /// Fail one request. Returns false if the id is unknown or already claimed.
    pub fn fail(&self, request_id: &str, error: ForwardError) -> bool {
        self.settle(request_id, Err(error))
    }

    /// Remove a request without resolving it (the caller gave up)
    pub fn cancel(&self, request_id: &str) -> bool {
        let removed = self.requests.remove(request_id).is_some();
        if removed {
            debug!(request_id = %request_id, "Cancelled pending request");
        }
        removed
    }

    /// Fail every pending request and refuse new ones; returns how many failed
    pub fn fail_all(&self, error: ForwardError) -> usize {
        let _ = self.closed.set(error.clone());

        let ids: Vec<String> = self.requests.iter().map(|e| e.key().clone()).collect();
        ids.iter()
            .filter(|id| self.fail(id, error.clone()))
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get().is_some()
    }

    pub fn count(&self) -> usize {
        self.requests.len()
    }

    fn settle(&self, request_id: &str, resolution: Resolution) -> bool {
        match self.requests.remove(request_id) {
            // A dropped receiver still counts as claimed
            Some((_, tx)) => {
                let _ = tx.send(resolution);
                true
            }
            None => false,
        }
    }
}
