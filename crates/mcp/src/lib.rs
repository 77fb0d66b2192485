// CoinLens tool layer: registry, dispatcher and the MCP stdio transport

pub mod dispatcher;
pub mod protocol;
pub mod server;
pub mod tools;

pub use dispatcher::{Dispatcher, Envelope};
pub use server::McpServer;

use anyhow::{Context, Result};
use coinlens_core::config::{AppConfig, CacheBackend};
use coinlens_core::market::{MarketDefaults, MarketService};
use coinlens_core::provider::{ContractProvider, SpotProvider};
use coinlens_core::storage::{CacheStore, InMemoryCacheStore, RedbCacheStore};
use std::sync::Arc;
use tools::ToolRegistry;

/// Build a dispatcher over the configured upstream providers
pub fn build_dispatcher(config: &AppConfig) -> Result<Dispatcher> {
    let spot = coinlens_providers::spot_from_config(config)
        .context("Failed to create spot provider client")?;
    let contract = coinlens_providers::contract_from_config(config)
        .context("Failed to create contract provider client")?;

    build_dispatcher_with(config, Arc::new(spot), Arc::new(contract))
}

/// Build a dispatcher over the given providers, with cache and defaults from `config`
pub fn build_dispatcher_with(
    config: &AppConfig,
    spot: Arc<dyn SpotProvider>,
    contract: Arc<dyn ContractProvider>,
) -> Result<Dispatcher> {
    let market = Arc::new(MarketService::new(
        spot,
        contract,
        MarketDefaults::from(&config.market),
    ));

    let mut registry = ToolRegistry::new();
    tools::register_market_tools(&mut registry, market)?;

    let cache = open_cache(config)?;
    tracing::info!(
        tools = registry.len(),
        cache = cache.is_some(),
        ttl_secs = config.cache.ttl_secs,
        "Dispatcher ready"
    );

    Ok(Dispatcher::new(registry, cache, config.cache_ttl()))
}

fn open_cache(config: &AppConfig) -> Result<Option<Arc<dyn CacheStore>>> {
    if !config.cache.enabled {
        return Ok(None);
    }

    let cache: Arc<dyn CacheStore> = match config.cache.backend {
        CacheBackend::Redb => {
            let path = config.cache_path();
            tracing::info!(path = %path.display(), "Opening cache");
            Arc::new(RedbCacheStore::new(path).context("Failed to open cache store")?)
        }
        CacheBackend::Memory => Arc::new(InMemoryCacheStore::new()),
    };
    Ok(Some(cache))
}
