pub mod config;
pub mod error;
pub mod http_client;
pub mod proxy;
pub mod router;
pub mod sse;
pub mod telemetry;
#[cfg(test)]
pub mod test_util;
