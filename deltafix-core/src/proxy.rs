//! HTTP front end: accepts client requests, forwards them to the gateway and
//! relays the answer, routing streaming completions through the patching relay.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderValue, Method, Response, StatusCode, Uri, header};
use axum::response::IntoResponse;
use bytes::Bytes;
use tracing_futures::Instrument;

use crate::config::Config;
use crate::error::{CoreResult, DeltaFixError};
use crate::http_client::{
    HttpClient, Upstream, UpstreamRequest, UpstreamResponse, extract_request_id, forward_headers,
};
use crate::router::{Route, RouteResolver};
use crate::sse::relay::Relay;
use crate::telemetry::{self, ExchangeTrace};

const EVENT_STREAM: &str = "text/event-stream";
const APPLICATION_JSON: &str = "application/json";

/// Response headers copied from a successful pass-through reply.
const RELAYED_RESPONSE_HEADERS: [&str; 2] = ["content-type", "x-request-id"];

/// Shared state injected into axum handlers. Built once at startup, never mutated.
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<dyn Upstream>,
    pub routes: Arc<RouteResolver>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        cfg.validate()?;
        let upstream = HttpClient::new(&cfg.upstream, &cfg.http)?;
        Ok(Self {
            upstream: Arc::new(upstream),
            routes: Arc::new(RouteResolver::new(&cfg.routing)?),
            max_body_bytes: cfg.upstream.max_body_bytes,
        })
    }
}

impl IntoResponse for DeltaFixError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            DeltaFixError::UpstreamUnavailable(_) | DeltaFixError::UpstreamInterrupted(_) => {
                StatusCode::BAD_GATEWAY
            }
            DeltaFixError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "type": "error",
            "error": {"type": "api_error", "message": self.to_string()},
        });
        (
            status,
            [(header::CONTENT_TYPE, APPLICATION_JSON)],
            body.to_string(),
        )
            .into_response()
    }
}

/// Catch-all handler: every method and path is forwarded.
///
/// Oversized bodies never get here; the `DefaultBodyLimit` layer answers 413.
pub async fn proxy_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    let started = Instant::now();
    let path = uri.path().to_string();
    let span = tracing::info_span!(
        "proxy",
        method = %method,
        path = %path,
        mode = tracing::field::Empty,
        status = tracing::field::Empty,
    );
    let trace = ExchangeTrace::new().method(method.as_str()).path(&path);

    async move {
        let inbound = Inbound {
            method,
            uri,
            headers,
            body,
        };
        match dispatch(&state, inbound, trace.clone(), started).await {
            Ok(resp) => {
                tracing::Span::current().record("status", resp.status().as_u16());
                resp
            }
            Err(e) => {
                tracing::warn!(error = %e, kind = e.kind(), "request failed");
                telemetry::emit(
                    trace
                        .error_kind(e.kind())
                        .error_message(&e.to_string())
                        .latency_ms(started.elapsed().as_millis() as u64),
                );
                let resp = e.into_response();
                tracing::Span::current().record("status", resp.status().as_u16());
                resp
            }
        }
    }
    .instrument(span)
    .await
}

struct Inbound {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
}

async fn dispatch(
    state: &AppState,
    inbound: Inbound,
    trace: ExchangeTrace,
    started: Instant,
) -> CoreResult<Response<Body>> {
    let Inbound {
        method,
        uri,
        headers,
        body,
    } = inbound;

    let route = state.routes.resolve(uri.path(), &body);
    tracing::Span::current().record("mode", route.as_str());
    let trace = trace.mode(route.as_str());

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    let upstream_req = UpstreamRequest {
        method,
        headers: forward_headers(&headers, !body.is_empty()),
        path_and_query,
        body,
    };

    let resp = state.upstream.send(upstream_req).await?;
    let trace = trace
        .status(resp.status.as_u16())
        .upstream_request_id_opt(extract_request_id(&resp.headers));

    if !resp.status.is_success() {
        tracing::info!(status = resp.status.as_u16(), "relaying upstream error status");
        let reply = relay_error(resp).await?;
        telemetry::emit(trace.latency_ms(started.elapsed().as_millis() as u64));
        return Ok(reply);
    }

    match route {
        Route::Relay if is_event_stream(&resp.headers) => stream_reply(resp, trace),
        Route::Relay => {
            tracing::warn!("streaming request answered without an event stream; passing through");
            let reply = passthrough_reply(resp).await?;
            telemetry::emit(trace.latency_ms(started.elapsed().as_millis() as u64));
            Ok(reply)
        }
        Route::PassThrough => {
            let reply = passthrough_reply(resp).await?;
            telemetry::emit(trace.latency_ms(started.elapsed().as_millis() as u64));
            Ok(reply)
        }
    }
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with(EVENT_STREAM))
}

/// Upstream error status: status and body verbatim, content type preserved.
async fn relay_error(resp: UpstreamResponse) -> CoreResult<Response<Body>> {
    let status = resp.status;
    let content_type = resp
        .headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(APPLICATION_JSON));
    let body = resp.collect_body().await?;
    build_response(status, [(header::CONTENT_TYPE, content_type)], Body::from(body))
}

/// Plain forward: status and body as received, plus content-type and request id.
async fn passthrough_reply(resp: UpstreamResponse) -> CoreResult<Response<Body>> {
    let status = resp.status;
    let headers: Vec<_> = RELAYED_RESPONSE_HEADERS
        .into_iter()
        .filter_map(|name| {
            resp.headers
                .get(name)
                .map(|v| (header::HeaderName::from_static(name), v.clone()))
        })
        .collect();
    let body: Bytes = resp.collect_body().await?;
    build_response(status, headers, Body::from(body))
}

/// Streaming reply: events pass through the relay one chunk at a time.
fn stream_reply(resp: UpstreamResponse, trace: ExchangeTrace) -> CoreResult<Response<Body>> {
    let content_type = resp
        .headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(EVENT_STREAM));
    let mut headers = vec![
        (header::CONTENT_TYPE, content_type),
        (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
    ];
    if let Some(rid) = resp.headers.get("x-request-id") {
        headers.push((header::HeaderName::from_static("x-request-id"), rid.clone()));
    }

    let relay = Relay::new(resp.body, trace).instrument(tracing::Span::current());
    build_response(resp.status, headers, Body::from_stream(relay))
}

fn build_response<I>(status: StatusCode, headers: I, body: Body) -> CoreResult<Response<Body>>
where
    I: IntoIterator<Item = (header::HeaderName, HeaderValue)>,
{
    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder
        .body(body)
        .map_err(|e| DeltaFixError::Other(anyhow::anyhow!("response build failed: {e}")))
}

/// Build the axum router. There are no local routes; every path goes upstream.
pub fn build_router(state: AppState) -> Router {
    let max_body_bytes = state.max_body_bytes;
    Router::new()
        .fallback(proxy_handler)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}
