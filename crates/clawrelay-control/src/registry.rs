//! Tunnel registry: the live connection per deployment
//!
//! Holds at most one [`TunnelConnection`] per deployment id. Register,
//! unregister and reap all go through the map's per-key entry lock, so
//! unrelated deployments never contend with each other.

use crate::connection::TunnelConnection;
use crate::ForwardError;
use chrono::{DateTime, Utc};
use clawrelay_proto::DEFAULT_STALE_AFTER;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Snapshot of one live tunnel
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStats {
    pub id: String,
    pub connection_id: Uuid,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub pending_count: usize,
}

/// Snapshot of the whole registry
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub connections: usize,
    pub tunnels: Vec<TunnelStats>,
}

pub struct TunnelRegistry {
    connections: DashMap<String, Arc<TunnelConnection>>,
    stale_after: Duration,
}

impl TunnelRegistry {
    pub fn new(stale_after: Duration) -> Self {
        info!(stale_after_secs = stale_after.as_secs(), "Creating tunnel registry");
        Self {
            connections: DashMap::new(),
            stale_after,
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Install a connection, replacing any existing one for the same deployment
    ///
    /// A replaced connection has its pending requests failed with
    /// [`ForwardError::Reconnecting`] and is closed before the new one becomes
    /// visible. Returns the replaced connection, if any.
    pub fn register(&self, connection: Arc<TunnelConnection>) -> Option<Arc<TunnelConnection>> {
        let deployment_id = connection.deployment_id().to_string();

        match self.connections.entry(deployment_id.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get().shutdown(ForwardError::Reconnecting);
                let old = entry.insert(connection.clone());
                info!(
                    deployment_id = %deployment_id,
                    connection_id = %connection.connection_id(),
                    old_connection_id = %old.connection_id(),
                    "Tunnel re-registered (replaced previous connection)"
                );
                Some(old)
            }
            Entry::Vacant(entry) => {
                info!(
                    deployment_id = %deployment_id,
                    connection_id = %connection.connection_id(),
                    "Tunnel registered"
                );
                entry.insert(connection);
                None
            }
        }
    }

    /// Remove the connection for `deployment_id` only if it is `connection_id`
    ///
    /// A socket that was already replaced must not remove its successor.
    pub fn unregister(&self, deployment_id: &str, connection_id: Uuid) -> bool {
        match self
            .connections
            .remove_if(deployment_id, |_, conn| conn.connection_id() == connection_id)
        {
            Some((_, conn)) => {
                conn.shutdown(ForwardError::Disconnected);
                info!(
                    deployment_id = %deployment_id,
                    connection_id = %connection_id,
                    "Tunnel unregistered"
                );
                true
            }
            None => {
                debug!(
                    deployment_id = %deployment_id,
                    connection_id = %connection_id,
                    "Unregister skipped: connection is no longer current"
                );
                false
            }
        }
    }

    pub fn get(&self, deployment_id: &str) -> Option<Arc<TunnelConnection>> {
        self.connections
            .get(deployment_id)
            .map(|entry| entry.value().clone())
    }

    pub fn is_connected(&self, deployment_id: &str) -> bool {
        self.connections.contains_key(deployment_id)
    }

    /// Refresh the activity clock of the current connection
    pub fn touch(&self, deployment_id: &str) -> bool {
        match self.connections.get(deployment_id) {
            Some(entry) => {
                entry.value().touch();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut tunnels: Vec<TunnelStats> = self
            .connections
            .iter()
            .map(|entry| {
                let conn = entry.value();
                TunnelStats {
                    id: entry.key().clone(),
                    connection_id: conn.connection_id(),
                    connected_at: conn.connected_at(),
                    last_activity: conn.last_activity_at(),
                    pending_count: conn.pending().count(),
                }
            })
            .collect();
        tunnels.sort_by(|a, b| a.id.cmp(&b.id));

        RegistryStats {
            connections: tunnels.len(),
            tunnels,
        }
    }

    /// Remove every connection idle for longer than the threshold
    pub fn reap(&self) -> Vec<String> {
        self.reap_at(Instant::now())
    }

    /// Reap as of `now`; returns the deployment ids that were removed
    pub fn reap_at(&self, now: Instant) -> Vec<String> {
        let candidates: Vec<(String, Uuid)> = self
            .connections
            .iter()
            .filter(|entry| entry.value().idle_for(now) > self.stale_after)
            .map(|entry| (entry.key().clone(), entry.value().connection_id()))
            .collect();

        let mut reaped = Vec::new();
        for (deployment_id, connection_id) in candidates {
            // Re-check under the entry lock: the socket may have been replaced
            // or touched since the scan.
            let removed = self.connections.remove_if(&deployment_id, |_, conn| {
                conn.connection_id() == connection_id && conn.idle_for(now) > self.stale_after
            });

            if let Some((_, conn)) = removed {
                conn.shutdown(ForwardError::Stale);
                warn!(
                    deployment_id = %deployment_id,
                    connection_id = %connection_id,
                    idle_secs = conn.idle_for(now).as_secs(),
                    "Reaped stale tunnel"
                );
                reaped.push(deployment_id);
            }
        }

        reaped
    }

    /// Run [`reap`](Self::reap) every `interval` on a background task
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let reaped = registry.reap();
                if !reaped.is_empty() {
                    info!(count = reaped.len(), "Reaper removed stale tunnels");
                }
            }
        })
    }
}

impl Default for TunnelRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER)
    }
}
