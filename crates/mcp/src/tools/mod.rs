pub mod contract;
mod registry;
pub mod spot;

pub use contract::{ContractInfoTool, ContractPositionsTool, ContractVolumeTool, KLineTool};
pub use registry::{
    OutputShape, ParamSpec, ParamType, RegisteredTool, RegistryError, ToolArgs, ToolHandler,
    ToolOutput, ToolRegistry, ToolSpec,
};
pub use spot::{
    BatchPricesTool, CoinDetailTool, CoinPriceTool, CommonCoinsPricesTool, GlobalMarketTool,
    MarketChartTool, SearchCoinsTool, TrendingCoinsTool,
};

use coinlens_core::market::MarketService;
use std::sync::Arc;

/// A handler that knows its own spec
pub trait CatalogTool: ToolHandler + 'static {
    fn spec(&self) -> ToolSpec;
}

fn register<T: CatalogTool>(registry: &mut ToolRegistry, tool: T) -> Result<(), RegistryError> {
    let spec = tool.spec();
    registry.register(spec, Arc::new(tool))
}

/// Register the full market tool catalog, in listing order
pub fn register_market_tools(
    registry: &mut ToolRegistry,
    market: Arc<MarketService>,
) -> Result<(), RegistryError> {
    register(registry, CoinPriceTool::new(market.clone()))?;
    register(registry, BatchPricesTool::new(market.clone()))?;
    register(registry, CommonCoinsPricesTool::new(market.clone()))?;
    register(registry, TrendingCoinsTool::new(market.clone()))?;
    register(registry, CoinDetailTool::new(market.clone()))?;
    register(registry, GlobalMarketTool::new(market.clone()))?;
    register(registry, SearchCoinsTool::new(market.clone()))?;
    register(registry, MarketChartTool::new(market.clone()))?;
    register(registry, ContractInfoTool::new(market.clone()))?;
    register(registry, KLineTool::new(market.clone()))?;
    register(registry, ContractPositionsTool::new(market.clone()))?;
    register(registry, ContractVolumeTool::new(market))?;

    tracing::debug!(tools = registry.len(), "Registered market tools");
    Ok(())
}

// Parameters shared across the catalog

fn currency_param(market: &MarketService) -> ParamSpec {
    ParamSpec::optional(
        "currency",
        ParamType::String,
        "Quote currency, e.g. usd, eur, cny, btc",
    )
    .with_default(market.defaults().currency.clone())
    .case_insensitive()
}

/// Currency parameter of the price tools, which quote in several at once
fn currencies_param(market: &MarketService) -> ParamSpec {
    ParamSpec::optional(
        "currency",
        ParamType::String,
        "Quote currency, or a comma-separated list such as cny,usd",
    )
    .with_default(market.defaults().currency.clone())
    .case_insensitive()
}

fn exact_param() -> ParamSpec {
    ParamSpec::optional(
        "exact",
        ParamType::Boolean,
        "Treat the coin as a canonical id and skip symbol/name lookup",
    )
    .with_default(false)
}

fn coin_id_param() -> ParamSpec {
    ParamSpec::required(
        "coin_id",
        ParamType::String,
        "Coin id (e.g. bitcoin), symbol (BTC) or name",
    )
    .case_insensitive()
}

fn symbol_param() -> ParamSpec {
    ParamSpec::required(
        "symbol",
        ParamType::String,
        "Contract symbol, e.g. BTC, BTCUSDT or BTC/USDT",
    )
    .case_insensitive()
}
