//! Upstream target parsed from `/proxy/{scheme}/{host}/{rest...}`

use std::fmt;
use thiserror::Error;
use url::{Host, Url};

pub const PROXY_PREFIX: &str = "/proxy/";

pub const USAGE_EXAMPLE: &str = "/proxy/https/api.anthropic.com/v1/messages";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("Invalid proxy path, expected /proxy/{{scheme}}/{{host}}/{{path}}")]
    InvalidPath,

    #[error("Unsupported scheme '{0}', expected http or https")]
    UnsupportedScheme(String),

    #[error("Invalid target host '{0}'")]
    InvalidHost(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated upstream destination
///
/// The host is canonicalized by the URL parser, so alternate IPv4 spellings
/// (`2130706433`, `0x7f.1`) arrive at the policy check as dotted quads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    scheme: Scheme,
    host: String,
    port: Option<u16>,
    url: Url,
}

impl ProxyTarget {
    /// Parse a raw request path (still percent-encoded) and query string
    pub fn from_proxy_path(path: &str, query: Option<&str>) -> Result<Self, TargetError> {
        let remainder = path
            .strip_prefix(PROXY_PREFIX)
            .ok_or(TargetError::InvalidPath)?;

        let mut parts = remainder.splitn(3, '/');
        let scheme = parts.next().unwrap_or_default();
        let authority = parts.next().ok_or(TargetError::InvalidPath)?;
        let rest = parts.next().unwrap_or_default();

        Self::parse(scheme, authority, rest, query)
    }

    /// Build a target from its components; `rest` excludes the leading slash
    pub fn parse(
        scheme: &str,
        authority: &str,
        rest: &str,
        query: Option<&str>,
    ) -> Result<Self, TargetError> {
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            "" => return Err(TargetError::InvalidPath),
            other => return Err(TargetError::UnsupportedScheme(other.to_string())),
        };

        if authority.is_empty() {
            return Err(TargetError::InvalidPath);
        }
        if authority.contains(['@', '\\', '?', '#']) {
            return Err(TargetError::InvalidHost(authority.to_string()));
        }

        let mut url = Url::parse(&format!("{}://{}/{}", scheme, authority, rest))
            .map_err(|_| TargetError::InvalidHost(authority.to_string()))?;
        url.set_query(query.filter(|q| !q.is_empty()));

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            _ => return Err(TargetError::InvalidHost(authority.to_string())),
        };
        let port = url.port();

        Ok(Self {
            scheme,
            host,
            port,
            url,
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Canonical host without brackets or port
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Explicit, non-default port
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Value for the upstream `Host` header
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        match self.port {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_target() {
        let target =
            ProxyTarget::from_proxy_path("/proxy/https/api.anthropic.com/v1/messages", None)
                .unwrap();
        assert_eq!(target.scheme(), Scheme::Https);
        assert_eq!(target.host(), "api.anthropic.com");
        assert_eq!(target.port(), None);
        assert_eq!(
            target.url().as_str(),
            "https://api.anthropic.com/v1/messages"
        );
        assert_eq!(target.host_header(), "api.anthropic.com");
    }

    #[test]
    fn test_query_and_port_preserved() {
        let target = ProxyTarget::from_proxy_path(
            "/proxy/http/Example.COM:8080/search",
            Some("q=rust&page=2"),
        )
        .unwrap();
        assert_eq!(target.host(), "example.com");
        assert_eq!(target.port(), Some(8080));
        assert_eq!(target.host_header(), "example.com:8080");
        assert_eq!(
            target.url().as_str(),
            "http://example.com:8080/search?q=rust&page=2"
        );
    }

    #[test]
    fn test_host_only_target() {
        let target = ProxyTarget::from_proxy_path("/proxy/https/example.com", None).unwrap();
        assert_eq!(target.url().as_str(), "https://example.com/");
    }

    #[test]
    fn test_percent_encoding_kept() {
        let target =
            ProxyTarget::from_proxy_path("/proxy/https/example.com/a%2Fb/c%20d", None).unwrap();
        assert_eq!(target.url().path(), "/a%2Fb/c%20d");
    }

    #[test]
    fn test_alternate_ip_spellings_are_canonicalized() {
        for raw in ["2130706433", "0x7f.1", "127.1", "0177.0.0.1"] {
            let target =
                ProxyTarget::from_proxy_path(&format!("/proxy/http/{}/x", raw), None).unwrap();
            assert_eq!(target.host(), "127.0.0.1", "{} should canonicalize", raw);
        }

        let v6 = ProxyTarget::from_proxy_path("/proxy/http/[::1]:9000/x", None).unwrap();
        assert_eq!(v6.host(), "::1");
        assert_eq!(v6.host_header(), "[::1]:9000");
    }

    #[test]
    fn test_rejects_malformed_paths() {
        assert_eq!(
            ProxyTarget::from_proxy_path("/proxy/", None),
            Err(TargetError::InvalidPath)
        );
        assert_eq!(
            ProxyTarget::from_proxy_path("/proxy/https", None),
            Err(TargetError::InvalidPath)
        );
        assert_eq!(
            ProxyTarget::from_proxy_path("/proxy/https//x", None),
            Err(TargetError::InvalidPath)
        );
        assert_eq!(
            ProxyTarget::from_proxy_path("/proxy/ftp/example.com/x", None),
            Err(TargetError::UnsupportedScheme("ftp".to_string()))
        );
        assert!(matches!(
            ProxyTarget::from_proxy_path("/proxy/https/user@example.com/x", None),
            Err(TargetError::InvalidHost(_))
        ));
        assert!(matches!(
            ProxyTarget::from_proxy_path("/proxy/https/exa mple.com/x", None),
            Err(TargetError::InvalidHost(_))
        ));
        assert!(ProxyTarget::from_proxy_path("/elsewhere", None).is_err());
    }
}
