//! Per-request exchange records.
//!
//! The proxy hands one [`ExchangeTrace`] to the installed sink when an
//! exchange finishes. Nothing is recorded until a sink is installed; the
//! binary installs [`LogSink`].

pub mod types;

pub use types::*;

use std::sync::Arc;

use once_cell::sync::OnceCell;

/// Log target used by [`LogSink`], so exchange records can be filtered apart
/// from the rest of the proxy's logs (`RUST_LOG=deltafix::exchange=info`).
pub const EXCHANGE_TARGET: &str = "deltafix::exchange";

/// Receiver for exchange records. Called from request tasks and from response
/// bodies being dropped, so it must not block or panic.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record(&self, trace: ExchangeTrace);
}

/// Writes every record as one structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn record(&self, trace: ExchangeTrace) {
        let exchange = match serde_json::to_string(&trace) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(target: EXCHANGE_TARGET, error = %e, "exchange record not serializable");
                return;
            }
        };
        tracing::info!(
            target: EXCHANGE_TARGET,
            mode = trace.mode.as_deref(),
            path = trace.path.as_deref(),
            status = trace.status,
            outcome = trace.outcome.as_deref(),
            %exchange,
            "exchange finished"
        );
    }
}

static SINK: OnceCell<Arc<dyn TelemetrySink>> = OnceCell::new();

#[cfg(test)]
thread_local! {
    static CAPTURE_ON_THIS_THREAD: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Install the process-wide sink. The first call wins; later calls return `false`.
pub fn set_telemetry_sink(sink: Arc<dyn TelemetrySink>) -> bool {
    SINK.set(sink).is_ok()
}

/// Hand a finished record to the sink, if any.
///
/// Test builds only deliver records from threads that opted in with
/// [`test_set_capture_enabled`], since tests share the one global sink.
pub(crate) fn emit(trace: ExchangeTrace) {
    #[cfg(test)]
    {
        if !CAPTURE_ON_THIS_THREAD.with(|c| c.get()) {
            return;
        }
    }
    if let Some(sink) = SINK.get() {
        sink.record(trace);
    }
}

#[cfg(test)]
pub fn test_set_capture_enabled(enabled: bool) {
    CAPTURE_ON_THIS_THREAD.with(|c| c.set(enabled));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuf {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn log_sink_writes_one_structured_event() {
        let buf = SharedBuf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let trace = ExchangeTrace::new()
            .mode("relay")
            .method("POST")
            .path("/v1/messages")
            .status(200)
            .counts(6, 1)
            .outcome("completed");
        tracing::subscriber::with_default(subscriber, || LogSink.record(trace));

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(out.lines().count(), 1);
        assert!(out.contains(EXCHANGE_TARGET));
        assert!(out.contains("exchange finished"));
        assert!(out.contains(r#""outcome":"completed""#));
        assert!(out.contains(r#""patched":1"#));
        assert!(out.contains("status=200"));
    }
}
