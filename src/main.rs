use clap::Parser;
use http_mcp_bridge::{BridgeConfig, start_bridge};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

/// HTTP to MCP bridge.
///
/// Exposes a remote server-push MCP event stream through plain
/// request/response HTTP: one long-lived stream per session, driven by
/// ordinary POST calls.
#[derive(Parser, Debug)]
#[command(name = "http_mcp_bridge")]
#[command(version, about)]
struct Args {
    /// Address to bind the HTTP server.
    #[arg(long, default_value = "127.0.0.1:8000")]
    bind_addr: SocketAddr,

    /// Remote event-stream URL sessions connect to, e.g. http://127.0.0.1:8081/sse
    #[arg(long)]
    remote_url: Url,

    /// Accepted for command-line compatibility with the predecessor tool;
    /// has no effect.
    #[arg(long)]
    reload: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    if args.reload {
        tracing::warn!("--reload has no effect; restart the process to pick up changes");
    }

    tracing::info!(
        "Starting HTTP bridge listening at {} with remote URL: {}",
        args.bind_addr,
        args.remote_url
    );

    let config = BridgeConfig {
        bind_addr: args.bind_addr,
        remote_url: args.remote_url,
    };
    start_bridge(config).await?;
    Ok(())
}
