//! Range trading bot entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Range trading bot with an operator RPC endpoint.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via RANGEBOT_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // TLS provider must be installed before any stream connects.
    rangebot_ws::init_crypto();

    let args = Args::parse();

    rangebot_telemetry::init_logging()?;

    info!("Starting rangebot v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > RANGEBOT_CONFIG > default
    let config_path = args
        .config
        .or_else(|| std::env::var("RANGEBOT_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());
    info!(config_path = %config_path, "Loading configuration");

    let config = rangebot_bot::AppConfig::load(&config_path)?;
    info!(
        exchange_env = config.exchange.env.as_str(),
        port = config.rpc.port,
        ws_path = %config.rpc.path,
        "Configuration loaded"
    );

    let app = rangebot_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
