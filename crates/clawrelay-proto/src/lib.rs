//! Tunnel Protocol Definitions
//!
//! JSON frames exchanged between the relay and agents over the tunnel
//! WebSocket, plus the timing and sizing constants both sides agree on.

pub mod messages;

pub use messages::*;

use std::time::Duration;

/// Path agents connect to for the tunnel upgrade
pub const TUNNEL_PATH: &str = "/relay/tunnel";

/// Maximum size of a single tunnel message (1MB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// How long a forwarded request waits for the agent's reply
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A connection with no activity for this long is considered dead
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// How often the relay sweeps for stale connections
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// How often agents send `{"type":"ping"}`
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
