// Standalone MCP server binary (JSON-RPC over stdio)

use anyhow::Result;
use clap::Parser;
use coinlens_core::config::AppConfig;
use coinlens_mcp::server::McpServer;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "coinlens-mcp")]
#[command(about = "Crypto market data tools for MCP clients", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "COINLENS_CONFIG", default_value = "coinlens.toml")]
    config: PathBuf,

    /// Data directory for the response cache
    #[arg(short, long, env = "COINLENS_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the protocol, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    tracing::info!("CoinLens MCP server starting");
    tracing::info!("Data directory: {}", args.data_dir.display());

    let config = AppConfig::load(&args.config, args.data_dir)?;
    let dispatcher = coinlens_mcp::build_dispatcher(&config)?;

    tracing::info!("Registered {} tools", dispatcher.list_tools().len());

    let server = Arc::new(McpServer::new(Arc::new(dispatcher)));
    server.serve_stdio().await?;

    Ok(())
}
