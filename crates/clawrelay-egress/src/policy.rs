//! Network policy for egress requests
//!
//! Decision order, first match wins:
//! 1. static blocklist → deny
//! 2. the deployment's secret host patterns → allow
//! 3. the global allowlist → allow
//! 4. deny

use clawrelay_vault::{host_matches, SecretVault, VaultError};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Hosts that are never reachable through the proxy unless overridden
pub const DEFAULT_BLOCKLIST: &[&str] = &[
    "localhost",
    "*.localhost",
    "127.0.0.0/8",
    "0.0.0.0",
    "::1",
    "169.254.0.0/16",
    "metadata.google.internal",
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "fc00::/7",
    "fe80::/10",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyConfigError {
    #[error("Invalid CIDR notation: {0}")]
    InvalidCidr(String),

    #[error("Invalid host pattern: {0}")]
    InvalidPattern(String),
}

/// Represents an IP network (CIDR)
#[derive(Debug, Clone, PartialEq, Eq)]
struct IpNetwork {
    addr: IpAddr,
    prefix_len: u8,
}

impl IpNetwork {
    fn parse(s: &str) -> Result<Self, PolicyConfigError> {
        let (ip_str, prefix_str) = s
            .split_once('/')
            .ok_or_else(|| PolicyConfigError::InvalidCidr(s.to_string()))?;
        let addr =
            IpAddr::from_str(ip_str).map_err(|_| PolicyConfigError::InvalidCidr(s.to_string()))?;
        let prefix_len = prefix_str
            .parse::<u8>()
            .map_err(|_| PolicyConfigError::InvalidCidr(s.to_string()))?;

        if prefix_len > max_prefix(&addr) {
            return Err(PolicyConfigError::InvalidCidr(s.to_string()));
        }

        Ok(Self { addr, prefix_len })
    }

    fn single(addr: IpAddr) -> Self {
        Self {
            prefix_len: max_prefix(&addr),
            addr,
        }
    }

    fn contains(&self, ip: &IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net_ip), IpAddr::V4(test_ip)) => {
                if self.prefix_len == 0 {
                    return true;
                }
                let mask = !0u32 << (32 - self.prefix_len);
                (u32::from(net_ip) & mask) == (u32::from(*test_ip) & mask)
            }
            (IpAddr::V6(net_ip), IpAddr::V6(test_ip)) => {
                if self.prefix_len == 0 {
                    return true;
                }
                let mask = !0u128 << (128 - self.prefix_len);
                (u128::from(net_ip) & mask) == (u128::from(*test_ip) & mask)
            }
            _ => false,
        }
    }
}

fn max_prefix(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    Exact(String),
    /// `*.example.com`: the suffix itself or any subdomain
    Subdomains(String),
    /// `10.*`: stored with the trailing dot
    Prefix(String),
    Network(IpNetwork),
}

impl HostPattern {
    fn parse(raw: &str) -> Result<Self, PolicyConfigError> {
        let pattern = normalize_host(raw);

        if pattern.contains('/') {
            return IpNetwork::parse(&pattern).map(HostPattern::Network);
        }
        if let Ok(addr) = IpAddr::from_str(&pattern) {
            return Ok(HostPattern::Network(IpNetwork::single(addr)));
        }
        if let Some(suffix) = pattern.strip_prefix("*.") {
            if suffix.is_empty() || suffix.contains('*') {
                return Err(PolicyConfigError::InvalidPattern(raw.to_string()));
            }
            return Ok(HostPattern::Subdomains(suffix.to_string()));
        }
        if let Some(prefix) = pattern.strip_suffix(".*") {
            if prefix.is_empty() || prefix.contains('*') {
                return Err(PolicyConfigError::InvalidPattern(raw.to_string()));
            }
            return Ok(HostPattern::Prefix(format!("{}.", prefix)));
        }
        if pattern.contains('*') {
            return Err(PolicyConfigError::InvalidPattern(raw.to_string()));
        }

        Ok(HostPattern::Exact(pattern))
    }

    fn matches(&self, host: &str, ip: Option<&IpAddr>) -> bool {
        match self {
            HostPattern::Exact(exact) => host == exact,
            HostPattern::Subdomains(suffix) => {
                host == suffix
                    || host
                        .strip_suffix(suffix.as_str())
                        .is_some_and(|head| head.ends_with('.'))
            }
            HostPattern::Prefix(prefix) => host.starts_with(prefix.as_str()),
            HostPattern::Network(network) => ip.is_some_and(|ip| network.contains(ip)),
        }
    }
}

fn normalize_host(host: &str) -> String {
    host.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

/// Static list of hosts the proxy refuses to reach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBlocklist {
    patterns: Vec<HostPattern>,
}

impl HostBlocklist {
    pub fn parse<I, S>(entries: I) -> Result<Self, PolicyConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = entries
            .into_iter()
            .filter(|entry| !entry.as_ref().trim().is_empty())
            .map(|entry| HostPattern::parse(entry.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Parse a comma-separated list (the `EGRESS_BLOCKLIST` format)
    pub fn from_comma_separated(value: &str) -> Result<Self, PolicyConfigError> {
        Self::parse(value.split(','))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn is_blocked(&self, host: &str) -> bool {
        let host = normalize_host(host);
        let ip = IpAddr::from_str(&host).ok();
        // ::ffff:127.0.0.1 must not slip past the IPv4 ranges
        let mapped = match ip {
            Some(IpAddr::V6(v6)) => v6.to_ipv4_mapped().map(IpAddr::V4),
            _ => None,
        };

        self.patterns.iter().any(|pattern| {
            pattern.matches(&host, ip.as_ref())
                || mapped
                    .as_ref()
                    .is_some_and(|v4| pattern.matches(&v4.to_string(), Some(v4)))
        })
    }
}

impl Default for HostBlocklist {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_BLOCKLIST
                .iter()
                .filter_map(|entry| HostPattern::parse(entry).ok())
                .collect(),
        }
    }
}

/// Why a host was allowed or denied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessReason {
    Blocked,
    PerDeployment,
    Global,
    NotAllowed,
}

impl fmt::Display for AccessReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccessReason::Blocked => "blocked",
            AccessReason::PerDeployment => "per-deployment",
            AccessReason::Global => "global",
            AccessReason::NotAllowed => "no matching secret and not globally allowed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: AccessReason,
}

impl AccessDecision {
    fn allow(reason: AccessReason) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    fn deny(reason: AccessReason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

pub struct NetworkPolicy {
    blocklist: HostBlocklist,
    global_allowlist: Vec<String>,
    vault: Arc<SecretVault>,
}

impl NetworkPolicy {
    pub fn new(blocklist: HostBlocklist, global_allowlist: Vec<String>, vault: Arc<SecretVault>) -> Self {
        Self {
            blocklist,
            global_allowlist,
            vault,
        }
    }

    pub fn blocklist(&self) -> &HostBlocklist {
        &self.blocklist
    }

    /// Decide given the deployment's host patterns
    pub fn decide<S: AsRef<str>>(&self, host: &str, deployment_patterns: &[S]) -> AccessDecision {
        if self.blocklist.is_blocked(host) {
            AccessDecision::deny(AccessReason::Blocked)
        } else if host_matches(host, deployment_patterns) {
            AccessDecision::allow(AccessReason::PerDeployment)
        } else if host_matches(host, self.global_allowlist.as_slice()) {
            AccessDecision::allow(AccessReason::Global)
        } else {
            AccessDecision::deny(AccessReason::NotAllowed)
        }
    }

    /// Decide for `deployment_id`, loading its patterns from the vault
    pub async fn check_access(
        &self,
        deployment_id: &str,
        host: &str,
    ) -> Result<AccessDecision, VaultError> {
        // Blocked hosts never need the store round-trip
        if self.blocklist.is_blocked(host) {
            return Ok(AccessDecision::deny(AccessReason::Blocked));
        }

        let patterns = self.vault.allowed_hosts(deployment_id).await?;
        let decision = self.decide(host, patterns.as_slice());
        debug!(
            deployment_id = %deployment_id,
            host = %host,
            allowed = decision.allowed,
            reason = %decision.reason,
            "Egress policy decision"
        );
        Ok(decision)
    }
}

/// Split a comma-separated host list, dropping blanks
pub fn parse_host_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim().to_ascii_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect()
}
