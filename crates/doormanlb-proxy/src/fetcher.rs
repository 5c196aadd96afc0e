//! Upstream fetching: one buffered GET against a chosen base URL.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::{header, request::Parts, HeaderMap};

use doormanlb_common::{DoormanError, Result, UpstreamResponse};

/// Upper bound on a buffered upstream body. Larger responses are
/// rejected as bad gateway.
pub const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

/// The parts of an inbound request the engine needs: path, raw query
/// and the headers to forward upstream.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub path: String,
    pub raw_query: Option<String>,
    pub headers: HeaderMap,
}

impl InboundRequest {
    pub fn new(path: impl Into<String>, raw_query: Option<String>) -> Self {
        Self {
            path: path.into(),
            raw_query,
            headers: HeaderMap::new(),
        }
    }

    pub fn from_parts(parts: &Parts) -> Self {
        Self {
            path: parts.uri.path().to_string(),
            raw_query: parts.uri.query().map(str::to_string),
            headers: parts.headers.clone(),
        }
    }
}

/// Seam between the coordination engine and the upstream transport.
#[async_trait]
pub trait ResponseFetcher: Send + Sync {
    /// Executes a single buffered GET for `request` against
    /// `upstream_base_url` and returns the full response.
    async fn fetch(
        &self,
        upstream_base_url: &str,
        request: &InboundRequest,
    ) -> Result<UpstreamResponse>;
}

/// HTTP client implementation of [`ResponseFetcher`].
pub struct ProxyClient {
    http: reqwest::Client,
}

impl ProxyClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for ProxyClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResponseFetcher for ProxyClient {
    async fn fetch(
        &self,
        upstream_base_url: &str,
        request: &InboundRequest,
    ) -> Result<UpstreamResponse> {
        let target = build_target_url(upstream_base_url, &request.path, request.raw_query.as_deref())?;

        // The Host of the upstream target must win over the inbound one.
        let mut headers = request.headers.clone();
        headers.remove(header::HOST);

        let response = self
            .http
            .get(target)
            .headers(headers)
            .send()
            .await
            .map_err(|e| DoormanError::BadGateway(format!("performing upstream request: {e}")))?;

        let status_code = response.status().as_u16();

        let mut header: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                header
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DoormanError::BadGateway(format!("reading upstream response: {e}")))?;
        if body.len() > MAX_RESPONSE_SIZE {
            return Err(DoormanError::BadGateway(format!(
                "upstream response of {} bytes exceeds limit of {MAX_RESPONSE_SIZE}",
                body.len()
            )));
        }

        Ok(UpstreamResponse::new(status_code, header, body.to_vec()))
    }
}

/// Resolves the inbound path and raw query against the upstream base
/// URL, replacing the base's own path and query.
fn build_target_url(base_url: &str, path: &str, raw_query: Option<&str>) -> Result<url::Url> {
    let base = url::Url::parse(base_url).map_err(|e| {
        DoormanError::BadRequest(format!("invalid upstream service url {base_url:?}: {e}"))
    })?;

    let mut target = base.join(path).map_err(|e| {
        DoormanError::BadRequest(format!("resolving path {path:?} against {base_url:?}: {e}"))
    })?;
    target.set_query(raw_query);

    Ok(target)
}
