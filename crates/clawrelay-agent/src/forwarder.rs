//! Replays tunnel requests against the local service

use clawrelay_proto::{HeaderFields, TunnelRequest, TunnelResponse};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::AgentError;

// Framing and connection headers are recomputed on each hop
const SKIPPED_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_skipped(name: &str) -> bool {
    SKIPPED_HEADERS
        .iter()
        .any(|skipped| skipped.eq_ignore_ascii_case(name))
}

pub struct LocalForwarder {
    client: reqwest::Client,
    base: Url,
}

impl LocalForwarder {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| AgentError::Http(e.to_string()))?;
        Ok(Self { client, base })
    }

    fn target(&self, path: &str) -> String {
        format!("{}{}", self.base.as_str().trim_end_matches('/'), path)
    }

    /// Call the local service; any local failure becomes a 502 reply
    pub async fn handle(&self, request: TunnelRequest) -> TunnelResponse {
        let id = request.id.clone();
        match self.call(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(request_id = %id, "Local service call failed: {}", e);
                TunnelResponse::new(id, 502, format!("Local service unavailable: {}", e))
            }
        }
    }

    async fn call(&self, request: TunnelRequest) -> Result<TunnelResponse, reqwest::Error> {
        let method = Method::from_bytes(request.method.as_bytes()).unwrap_or(Method::POST);
        let url = self.target(&request.path);
        debug!(request_id = %request.id, method = %method, url = %url, "Forwarding to local service");

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            if is_skipped(name) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }

        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .body(request.body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers: HeaderFields = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_skipped(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        Ok(TunnelResponse {
            id: request.id,
            status,
            headers,
            body,
        })
    }
}
