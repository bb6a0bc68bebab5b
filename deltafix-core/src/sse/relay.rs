use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use futures_util::stream::Stream;

use super::event::EventStream;
use super::lines::LineReader;
use super::patch::{PatchOutcome, PatchState};
use crate::error::CoreResult;
use crate::telemetry::{self, ExchangeTrace};

/// Running totals for one relayed stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub events: u64,
    pub patched: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finish {
    Completed,
    UpstreamError(&'static str),
}

/// Streams an upstream event-stream body to the client one event per chunk,
/// repairing first tool-input fragments on the way.
///
/// The relay is pull-driven: upstream is read only when the consumer asks for
/// the next chunk, so a slow client holds back upstream reads. It owns its
/// [`PatchState`], and dropping it drops the upstream body. A trace is emitted
/// on drop, which also covers the client going away mid-stream.
pub struct Relay<S> {
    events: EventStream<LineReader<S>>,
    state: PatchState,
    stats: RelayStats,
    finish: Option<Finish>,
    trace: ExchangeTrace,
    started: Instant,
}

impl<S> Relay<S>
where
    S: Stream<Item = CoreResult<Bytes>> + Unpin,
{
    /// `trace` carries the request-level fields; counts and outcome are filled in on drop.
    pub fn new(body: S, trace: ExchangeTrace) -> Self {
        Self {
            events: EventStream::new(LineReader::new(body)),
            state: PatchState::new(),
            stats: RelayStats::default(),
            finish: None,
            trace,
            started: Instant::now(),
        }
    }
}

impl<S> Relay<S> {
    pub fn stats(&self) -> RelayStats {
        self.stats
    }
}

impl<S> Stream for Relay<S>
where
    S: Stream<Item = CoreResult<Bytes>> + Unpin,
{
    type Item = CoreResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.finish.is_some() {
            return Poll::Ready(None);
        }
        match Pin::new(&mut this.events).poll_next(cx) {
            Poll::Ready(Some(Ok(mut event))) => {
                let outcome = this.state.apply(&mut event);
                this.stats.events += 1;
                if let PatchOutcome::Prepended { index } = outcome {
                    this.stats.patched += 1;
                    tracing::info!(index, event = this.stats.events, "repaired tool input fragment");
                }
                Poll::Ready(Some(Ok(event.to_bytes())))
            }
            Poll::Ready(Some(Err(e))) => {
                tracing::warn!(error = %e, events = this.stats.events, "upstream stream failed");
                this.finish = Some(Finish::UpstreamError(e.kind()));
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                tracing::debug!(
                    events = this.stats.events,
                    patched = this.stats.patched,
                    "upstream stream completed"
                );
                this.finish = Some(Finish::Completed);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for Relay<S> {
    fn drop(&mut self) {
        let mut trace = std::mem::take(&mut self.trace)
            .counts(self.stats.events, self.stats.patched)
            .latency_ms(self.started.elapsed().as_millis() as u64);
        trace = match self.finish {
            Some(Finish::Completed) => trace.outcome("completed"),
            Some(Finish::UpstreamError(kind)) => trace.outcome("upstream_error").error_kind(kind),
            None => {
                tracing::info!(events = self.stats.events, "client closed stream early");
                trace.outcome("client_closed")
            }
        };
        telemetry::emit(trace);
    }
}
