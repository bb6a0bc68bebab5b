use regex::Regex;
use serde::Deserialize;

use crate::config::RoutingCfg;
use crate::error::{CoreResult, DeltaFixError};

/// How an inbound request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Streaming completion: the upstream event stream goes through the patching relay.
    Relay,
    /// Anything else: forwarded and answered as-is.
    PassThrough,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Relay => "relay",
            Route::PassThrough => "passthrough",
        }
    }
}

#[derive(Deserialize)]
struct StreamFlag {
    #[serde(default)]
    stream: bool,
}

/// Whether a request body asks for a streamed response (`"stream": true`).
/// Bodies that are not a JSON object, or whose flag is not a boolean, do not.
pub fn wants_stream(body: &[u8]) -> bool {
    if body.is_empty() {
        return false;
    }
    serde_json::from_slice::<StreamFlag>(body)
        .map(|f| f.stream)
        .unwrap_or(false)
}

/// Decides per request between the relay and the plain forward, using the
/// compiled path patterns from config.
#[derive(Debug)]
pub struct RouteResolver {
    relay_paths: Vec<Regex>,
}

impl RouteResolver {
    /// Build a resolver by compiling regexes from config.
    pub fn new(cfg: &RoutingCfg) -> CoreResult<Self> {
        let mut relay_paths = Vec::with_capacity(cfg.relay_paths.len());
        for pattern in &cfg.relay_paths {
            let regex = Regex::new(pattern).map_err(|e| {
                DeltaFixError::Validation(format!("invalid relay path regex '{pattern}': {e}"))
            })?;
            relay_paths.push(regex);
        }
        Ok(Self { relay_paths })
    }

    pub fn is_relay_path(&self, path: &str) -> bool {
        self.relay_paths.iter().any(|r| r.is_match(path))
    }

    pub fn resolve(&self, path: &str, body: &[u8]) -> Route {
        if self.is_relay_path(path) && wants_stream(body) {
            Route::Relay
        } else {
            Route::PassThrough
        }
    }
}
