//! Outbound proxy for agents
//!
//! Agents call `/proxy/{scheme}/{host}/{path}` with their relay token and
//! placeholder tokens in place of credentials. The proxy checks the network
//! policy, swaps placeholders for secrets scoped to the target host, and
//! streams the upstream response back unmodified.

pub mod headers;
pub mod policy;
pub mod proxy;
pub mod target;

pub use headers::{filter_response_headers, is_hop_by_hop, prepare_upstream_headers};
pub use policy::{
    parse_host_list, AccessDecision, AccessReason, HostBlocklist, NetworkPolicy,
    PolicyConfigError, DEFAULT_BLOCKLIST,
};
pub use proxy::{relay_token, EgressError, EgressProxy, DEFAULT_UPSTREAM_TIMEOUT};
pub use target::{ProxyTarget, Scheme, TargetError, USAGE_EXAMPLE};
