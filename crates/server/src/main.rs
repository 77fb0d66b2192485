use anyhow::Result;
use clap::Parser;
use coinlens_core::config::AppConfig;
use std::path::PathBuf;

mod api;
mod config;

#[derive(Parser, Debug)]
#[command(name = "coinlens")]
#[command(about = "Crypto market data tools over HTTP", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "COINLENS_CONFIG", default_value = "coinlens.toml")]
    config: PathBuf,

    /// Data directory for the response cache
    #[arg(short, long, env = "COINLENS_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Port to listen on
    #[arg(short, long, env = "COINLENS_PORT", default_value = "8080")]
    port: u16,

    /// Host to bind to
    #[arg(long, env = "COINLENS_HOST", default_value = "127.0.0.1")]
    host: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let args = Args::parse();

    tracing::info!("Starting CoinLens");
    tracing::info!("Data directory: {}", args.data_dir.display());

    // Load configuration
    let config = AppConfig::load(&args.config, args.data_dir)?;

    // Start API server
    let addr = format!("{}:{}", args.host, args.port);
    tracing::info!("Starting API server on {}", addr);

    api::serve(&addr, &config).await?;

    Ok(())
}
