//! Header preparation for proxied requests and responses

use crate::target::ProxyTarget;
use http::header::{HeaderMap, HeaderValue, CONNECTION, HOST};

/// Headers that describe a single hop and are never forwarded
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "x-relay-token",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}

/// Header names listed in `Connection` are hop-by-hop for this message only
fn connection_listed(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let listed = connection_listed(headers);
    let mut filtered = HeaderMap::with_capacity(headers.len());

    for (name, value) in headers {
        let name_str = name.as_str();
        if is_hop_by_hop(name_str) || listed.iter().any(|l| l == name_str) {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }

    filtered
}

/// Headers for the upstream request: hop-by-hop and `host` removed, then
/// `host` set to the target (with its explicit port, if any)
pub fn prepare_upstream_headers(
    incoming: &HeaderMap,
    target: &ProxyTarget,
) -> Result<HeaderMap, http::header::InvalidHeaderValue> {
    let mut headers = strip_hop_by_hop(incoming);
    headers.remove(HOST);
    headers.insert(HOST, HeaderValue::from_str(&target.host_header())?);
    Ok(headers)
}

/// Upstream response headers minus hop-by-hop
pub fn filter_response_headers(upstream: &HeaderMap) -> HeaderMap {
    strip_hop_by_hop(upstream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(path: &str) -> ProxyTarget {
        ProxyTarget::from_proxy_path(path, None).unwrap()
    }

    #[test]
    fn test_hop_by_hop_names() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("X-Relay-Token"));
        assert!(is_hop_by_hop("proxy-authorization"));
        assert!(!is_hop_by_hop("authorization"));
        assert!(!is_hop_by_hop("content-type"));
    }

    #[test]
    fn test_prepare_upstream_headers() {
        let mut incoming = HeaderMap::new();
        incoming.insert("host", HeaderValue::from_static("relay.example.com"));
        incoming.insert("x-relay-token", HeaderValue::from_static("secret"));
        incoming.insert("proxy-authorization", HeaderValue::from_static("Bearer t"));
        incoming.insert("connection", HeaderValue::from_static("keep-alive, x-trace"));
        incoming.insert("x-trace", HeaderValue::from_static("1"));
        incoming.insert("authorization", HeaderValue::from_static("Bearer upstream"));
        incoming.append("accept", HeaderValue::from_static("text/plain"));
        incoming.append("accept", HeaderValue::from_static("application/json"));

        let headers =
            prepare_upstream_headers(&incoming, &target("/proxy/https/api.example.com:8443/v1"))
                .unwrap();

        assert_eq!(headers.get("host").unwrap(), "api.example.com:8443");
        assert!(headers.get("x-relay-token").is_none());
        assert!(headers.get("proxy-authorization").is_none());
        assert!(headers.get("connection").is_none());
        assert!(headers.get("x-trace").is_none());
        assert_eq!(headers.get("authorization").unwrap(), "Bearer upstream");
        assert_eq!(headers.get_all("accept").iter().count(), 2);
    }

    #[test]
    fn test_response_filter_keeps_content_headers() {
        let mut upstream = HeaderMap::new();
        upstream.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        upstream.insert("content-type", HeaderValue::from_static("text/event-stream"));
        upstream.insert("set-cookie", HeaderValue::from_static("a=b"));

        let filtered = filter_response_headers(&upstream);
        assert!(filtered.get("transfer-encoding").is_none());
        assert_eq!(filtered.get("content-type").unwrap(), "text/event-stream");
        assert_eq!(filtered.get("set-cookie").unwrap(), "a=b");
    }
}
