use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use livedash::client::{CommandRegistry, StatsClient};
use livedash::config::Settings;
use livedash::protocol::Command;
use livedash::relay::{self, RelayBridge};

#[derive(Parser, Debug)]
#[command(name = "livedash")]
#[command(about = "Relay for near-real-time broadcast audience statistics")]
struct Args {
    /// Path to a TOML config file (optional, defaults apply without one)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stats server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Stats server port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// HTTP listen address (overrides config)
    #[arg(long)]
    listen: Option<String>,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_filter = format!("livedash={}", args.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting livedash v{}", env!("CARGO_PKG_VERSION"));

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        settings.stats_server.host = host;
    }
    if let Some(port) = args.port {
        settings.stats_server.port = port;
    }
    if let Some(listen) = args.listen {
        settings.relay.listen_addr = listen;
    }

    let overrides = relay::load_overrides(settings.relay.overrides_path.as_deref().map(Path::new))?;
    info!(
        overrides = overrides.len(),
        upstream = %settings.stats_http.base_url,
        "channel override table loaded"
    );

    let bridge = RelayBridge::new(settings.stats_http.base_url.clone(), overrides);
    let mut registry = CommandRegistry::new();
    bridge.install(&mut registry, Command::new(&settings.relay.aggregate_command)?);

    let server = relay::run_server(settings.relay.listen_addr.clone(), bridge);
    info!(listen = %settings.relay.listen_addr, "relay HTTP server started");

    let client = StatsClient::new(
        settings.stats_server.host.clone(),
        settings.stats_server.port,
        Duration::from_secs(settings.stats_server.reconnect_delay_secs),
        registry,
    );
    info!(
        host = %settings.stats_server.host,
        port = settings.stats_server.port,
        "connecting to stats server"
    );
    let client = client.spawn();

    // Both tasks run until the process is stopped.
    let _ = tokio::try_join!(server, client)?;
    Ok(())
}
