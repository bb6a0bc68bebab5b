use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use deltafix_core::{
    config::Config,
    proxy::{AppState, build_router},
    telemetry::{self, LogSink},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Relay to an Anthropic-compatible gateway that repairs tool-input deltas missing their opening brace",
    long_about = None
)]
struct Cli {
    /// Config file (JSON or TOML). Defaults apply when omitted.
    #[arg(long, env = "DELTAFIX_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Base URL of the upstream gateway
    #[arg(long, env = "UPSTREAM")]
    upstream: Option<String>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::from_path(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => Config::default(),
        };
        if let Some(host) = &self.host {
            cfg.listen.host = host.clone();
        }
        if let Some(port) = self.port {
            cfg.listen.port = port;
        }
        if let Some(upstream) = &self.upstream {
            cfg.upstream.base_url = upstream.clone();
        }
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    telemetry::set_telemetry_sink(Arc::new(LogSink));

    let cli = Cli::parse();
    let cfg = cli.load_config()?;
    let addr = cfg.listen_addr()?;
    let state = AppState::from_config(&cfg)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, upstream = %cfg.upstream.base_url, "deltafix listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("deltafix stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
