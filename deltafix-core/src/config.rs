use serde::{Deserialize, Serialize};
use std::{
    fs,
    net::{SocketAddr, ToSocketAddrs},
    path::Path,
};

use crate::error::{CoreResult, DeltaFixError};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ListenCfg {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ListenCfg {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    4001
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UpstreamCfg {
    /// Base URL of the inference gateway, without a trailing path.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Largest inbound request body accepted for forwarding.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for UpstreamCfg {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_base_url() -> String {
    "http://litellm:4000".to_string()
}
fn default_max_body_bytes() -> usize {
    32 * 1024 * 1024
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RoutingCfg {
    /// Regexes applied to the request path; a match makes a streaming
    /// request eligible for the delta-patching relay.
    #[serde(default = "default_relay_paths")]
    pub relay_paths: Vec<String>,
}

impl Default for RoutingCfg {
    fn default() -> Self {
        Self {
            relay_paths: default_relay_paths(),
        }
    }
}

fn default_relay_paths() -> Vec<String> {
    vec!["^/v1/messages".to_string()]
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Per-read timeout on the upstream connection in milliseconds (default 600000ms).
    /// Applies between body chunks, so long streams are fine as long as they keep moving.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_read_timeout_ms() -> u64 {
    600_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenCfg,
    #[serde(default)]
    pub upstream: UpstreamCfg,
    #[serde(default)]
    pub routing: RoutingCfg,
    /// HTTP client configuration (timeouts, pooling). Missing in older configs → defaults.
    #[serde(default)]
    pub http: HttpCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(DeltaFixError::from)?;
        let s = std::str::from_utf8(&bytes).map_err(|e| DeltaFixError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str::<Self>(s).map_err(|e| DeltaFixError::Other(e.into()))?
            }
            Some("toml") => {
                toml::from_str::<Self>(s).map_err(|e| DeltaFixError::Other(e.into()))?
            }
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| DeltaFixError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s).map_err(|e| DeltaFixError::Other(e.into()))
                })?,
        };
        Ok(cfg)
    }

    /// Reject settings the server cannot start with.
    pub fn validate(&self) -> CoreResult<()> {
        let base = self.upstream.base_url.trim();
        if base.is_empty() {
            return Err(DeltaFixError::Validation("upstream.base_url is empty".into()));
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(DeltaFixError::Validation(format!(
                "upstream.base_url '{base}' must start with http:// or https://"
            )));
        }
        if self.upstream.max_body_bytes == 0 {
            return Err(DeltaFixError::Validation(
                "upstream.max_body_bytes must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Resolve `listen.host` (IP literal, bracketed IPv6 or hostname) and
    /// `listen.port` to the first matching socket address.
    pub fn listen_addr(&self) -> CoreResult<SocketAddr> {
        let host = self.listen.host.trim();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        let invalid = |reason: String| {
            DeltaFixError::Validation(format!(
                "invalid listen address '{host}' port {}: {reason}",
                self.listen.port
            ))
        };
        let mut addrs = (host, self.listen.port)
            .to_socket_addrs()
            .map_err(|e| invalid(e.to_string()))?;
        addrs
            .next()
            .ok_or_else(|| invalid("host resolved to no addresses".into()))
    }
}
