//! Shared helpers for unit tests.

use std::cell::RefCell;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use http::{HeaderMap, HeaderValue, StatusCode};

use crate::error::{CoreResult, DeltaFixError};
use crate::http_client::{Upstream, UpstreamRequest, UpstreamResponse};
use crate::telemetry::{self, ExchangeTrace, TelemetrySink};

thread_local! {
    static CAPTURED: RefCell<Vec<ExchangeTrace>> = const { RefCell::new(Vec::new()) };
}

struct ThreadLocalSink;

impl TelemetrySink for ThreadLocalSink {
    fn record(&self, trace: ExchangeTrace) {
        CAPTURED.with(|c| c.borrow_mut().push(trace));
    }
}

/// Install the capturing sink (once per process) and enable capture on this thread.
pub fn install_capture() {
    let _ = telemetry::set_telemetry_sink(Arc::new(ThreadLocalSink));
    telemetry::test_set_capture_enabled(true);
    CAPTURED.with(|c| c.borrow_mut().clear());
}

pub fn captured_traces() -> Vec<ExchangeTrace> {
    CAPTURED.with(|c| c.borrow().clone())
}

/// A body stream that yields the given chunks as-is.
pub fn chunked(chunks: Vec<Bytes>) -> impl Stream<Item = CoreResult<Bytes>> + Unpin + Send + 'static {
    futures_util::stream::iter(chunks.into_iter().map(Ok))
}

/// One scripted upstream reply.
pub enum Scripted {
    Reply {
        status: StatusCode,
        headers: Vec<(&'static str, &'static str)>,
        chunks: Vec<CoreResult<Bytes>>,
    },
    Fail(DeltaFixError),
}

/// In-process upstream that answers every request with the same script and
/// records what it was sent.
pub struct ScriptedUpstream {
    reply: Mutex<Option<Scripted>>,
    pub seen: Mutex<Vec<UpstreamRequest>>,
}

impl ScriptedUpstream {
    pub fn new(reply: Scripted) -> Self {
        Self {
            reply: Mutex::new(Some(reply)),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn event_stream(chunks: Vec<CoreResult<Bytes>>) -> Self {
        Self::new(Scripted::Reply {
            status: StatusCode::OK,
            headers: vec![("content-type", "text/event-stream")],
            chunks,
        })
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn send(&self, req: UpstreamRequest) -> CoreResult<UpstreamResponse> {
        self.seen.lock().unwrap().push(req);
        let reply = self
            .reply
            .lock()
            .unwrap()
            .take()
            .expect("scripted upstream called more than once");
        match reply {
            Scripted::Fail(e) => Err(e),
            Scripted::Reply {
                status,
                headers,
                chunks,
            } => {
                let mut map = HeaderMap::new();
                for (k, v) in headers {
                    map.insert(k, HeaderValue::from_static(v));
                }
                let body: BoxStream<'static, CoreResult<Bytes>> =
                    futures_util::stream::iter(chunks).boxed();
                Ok(UpstreamResponse {
                    status,
                    headers: map,
                    body,
                })
            }
        }
    }
}
