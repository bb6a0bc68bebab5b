use serde::{Deserialize, Serialize};

/// One record per proxied request, emitted once the exchange is over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExchangeTrace {
    /// "relay" for patched event streams, "passthrough" otherwise.
    pub mode: Option<String>,

    pub method: Option<String>,
    pub path: Option<String>,

    /// Status code sent to the client.
    pub status: Option<u16>,

    /// Upstream's returned request id/correlation id.
    pub upstream_request_id: Option<String>,

    /// Events forwarded (relay mode only).
    pub events: Option<u64>,
    /// Events whose tool-input fragment was repaired (relay mode only).
    pub patched: Option<u64>,

    /// "completed", "client_closed" or "upstream_error".
    pub outcome: Option<String>,

    pub latency_ms: Option<u64>,

    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl ExchangeTrace {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn mode(mut self, mode: &str) -> Self {
        self.mode = Some(mode.to_string());
        self
    }
    pub fn method(mut self, method: &str) -> Self {
        self.method = Some(method.to_string());
        self
    }
    pub fn path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }
    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
    pub fn upstream_request_id_opt<S: AsRef<str>>(mut self, rid: Option<S>) -> Self {
        self.upstream_request_id = rid.map(|s| s.as_ref().to_string());
        self
    }
    pub fn counts(mut self, events: u64, patched: u64) -> Self {
        self.events = Some(events);
        self.patched = Some(patched);
        self
    }
    pub fn outcome(mut self, outcome: &str) -> Self {
        self.outcome = Some(outcome.to_string());
        self
    }
    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }
    pub fn error_kind(mut self, kind: &str) -> Self {
        self.error_kind = Some(kind.to_string());
        self
    }
    pub fn error_message(mut self, msg: &str) -> Self {
        self.error_message = Some(msg.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exchange_trace_serializes() {
        let trace = ExchangeTrace::new()
            .mode("relay")
            .method("POST")
            .path("/v1/messages")
            .status(200)
            .upstream_request_id_opt(Some("req_1"))
            .counts(12, 1)
            .outcome("completed")
            .latency_ms(42);

        let as_json = serde_json::to_value(&trace).unwrap();
        assert_eq!(as_json["mode"], json!("relay"));
        assert_eq!(as_json["path"], json!("/v1/messages"));
        assert_eq!(as_json["status"], json!(200));
        assert_eq!(as_json["events"], json!(12));
        assert_eq!(as_json["patched"], json!(1));
        assert_eq!(as_json["upstream_request_id"], json!("req_1"));
        assert_eq!(as_json["error_kind"], json!(null));
    }
}
