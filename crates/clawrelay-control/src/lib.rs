//! Relay-side tunnel control
//!
//! - [`TunnelRegistry`]: one live [`TunnelConnection`] per deployment, reaper
//! - [`TunnelProtocol`]: forward requests and dispatch agent frames
//! - [`PendingRequests`]: request id → waiting caller

pub mod connection;
pub mod error;
pub mod pending;
pub mod protocol;
pub mod registry;

pub use connection::TunnelConnection;
pub use error::ForwardError;
pub use pending::{PendingRequests, Resolution};
pub use protocol::{ForwardRequest, TunnelProtocol};
pub use registry::{RegistryStats, TunnelRegistry, TunnelStats};
