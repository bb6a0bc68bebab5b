use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use reqwest::Client;

use crate::config::{HttpCfg, UpstreamCfg};
use crate::error::{CoreResult, DeltaFixError};

/// Request headers copied verbatim to the upstream; everything else is dropped.
pub const FORWARDED_HEADERS: [&str; 5] = [
    "content-type",
    "x-api-key",
    "anthropic-version",
    "authorization",
    "accept",
];

/// Raw upstream body, yielded chunk by chunk as it arrives.
pub type ByteStream = BoxStream<'static, CoreResult<Bytes>>;

/// A request ready to be sent to the gateway.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Path plus optional query, e.g. `/v1/messages?beta=true`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl UpstreamResponse {
    /// Drain the body into memory; used for pass-through and error replies.
    pub async fn collect_body(self) -> CoreResult<Bytes> {
        let mut body = self.body;
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(out))
    }
}

/// Sends requests to the gateway. Implemented by [`HttpClient`]; tests swap in
/// scripted upstreams.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, req: UpstreamRequest) -> CoreResult<UpstreamResponse>;
}

/// Keep only the allow-listed headers. When a body is present and the client
/// gave no content type, JSON is assumed.
pub fn forward_headers(inbound: &HeaderMap, has_body: bool) -> HeaderMap {
    let mut out = HeaderMap::new();
    for name in FORWARDED_HEADERS {
        for value in inbound.get_all(name) {
            out.append(name, value.clone());
        }
    }
    if has_body && !out.contains_key(header::CONTENT_TYPE) {
        out.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    out
}

/// Thin wrapper around reqwest::Client bound to one gateway base URL.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    base: String,
    user_agent: String,
}

impl HttpClient {
    pub fn new(upstream: &UpstreamCfg, http: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(http.connect_timeout_ms))
            .read_timeout(Duration::from_millis(http.read_timeout_ms));
        if let Some(n) = http.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| DeltaFixError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            base: upstream.base_url.trim_end_matches('/').to_string(),
            user_agent: concat!("deltafix/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url_for(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base, path_and_query)
    }
}

#[async_trait]
impl Upstream for HttpClient {
    async fn send(&self, req: UpstreamRequest) -> CoreResult<UpstreamResponse> {
        let url = self.url_for(&req.path_and_query);
        let mut builder = self
            .inner
            .request(req.method, &url)
            .headers(req.headers)
            .header(header::USER_AGENT, &self.user_agent);
        if !req.body.is_empty() {
            builder = builder.body(req.body);
        }

        let resp = builder.send().await.map_err(map_transport_error)?;
        let status = resp.status();
        let headers = resp.headers().clone();
        tracing::debug!(%url, status = status.as_u16(), "upstream responded");

        let body = resp.bytes_stream().map(|r| r.map_err(map_body_error)).boxed();
        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_transport_error(e: reqwest::Error) -> DeltaFixError {
    if e.is_timeout() {
        DeltaFixError::UpstreamTimeout(e.to_string())
    } else {
        DeltaFixError::UpstreamUnavailable(e.to_string())
    }
}

fn map_body_error(e: reqwest::Error) -> DeltaFixError {
    if e.is_timeout() {
        DeltaFixError::UpstreamTimeout(e.to_string())
    } else {
        DeltaFixError::UpstreamInterrupted(e.to_string())
    }
}

pub fn extract_request_id(headers: &HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 2] = ["x-request-id", "request-id"];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}
