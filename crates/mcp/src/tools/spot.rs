// Spot market tools

use crate::tools::{
    coin_id_param, currencies_param, currency_param, exact_param, CatalogTool, OutputShape, ParamSpec, ParamType,
    ToolArgs, ToolHandler, ToolOutput, ToolSpec,
};
use coinlens_core::error::ToolResult;
use coinlens_core::market::{MarketService, MAX_CHART_DAYS, MAX_SEARCH_LIMIT};
use std::sync::Arc;

/// Current price of one coin
pub struct CoinPriceTool {
    market: Arc<MarketService>,
}

impl CoinPriceTool {
    pub fn new(market: Arc<MarketService>) -> Self {
        Self { market }
    }
}

impl CatalogTool for CoinPriceTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "get_coin_price",
            "Get the current price, market cap, 24h volume and 24h change of a coin; \
             several currencies return one entry each",
            OutputShape::MarketSnapshotOrList,
        )
        .param(coin_id_param())
        .param(currencies_param(&self.market))
        .param(exact_param())
    }
}

#[async_trait::async_trait]
impl ToolHandler for CoinPriceTool {
    async fn call(&self, args: ToolArgs) -> ToolResult<ToolOutput> {
        let snapshots = self
            .market
            .coin_price(
                args.required_str("coin_id")?,
                args.str("currency"),
                args.bool("exact").unwrap_or(false),
            )
            .await?;
        match snapshots.as_slice() {
            [single] => ToolOutput::new(single),
            several => ToolOutput::new(&several),
        }
    }
}

/// Prices for a list of coins with per-item error markers
pub struct BatchPricesTool {
    market: Arc<MarketService>,
}

impl BatchPricesTool {
    pub fn new(market: Arc<MarketService>) -> Self {
        Self { market }
    }
}

impl CatalogTool for BatchPricesTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "get_batch_prices",
            "Get current prices for several coins at once; unresolved coins are reported individually",
            OutputShape::BatchList,
        )
        .param(
            ParamSpec::required(
                "coin_ids",
                ParamType::StringList,
                "Coin ids, symbols or names (array or comma-separated string)",
            )
            .case_insensitive(),
        )
        .param(currencies_param(&self.market))
        .param(exact_param())
    }
}

#[async_trait::async_trait]
impl ToolHandler for BatchPricesTool {
    async fn call(&self, args: ToolArgs) -> ToolResult<ToolOutput> {
        let entries = self
            .market
            .batch_prices(
                &args.string_list("coin_ids"),
                args.str("currency"),
                args.bool("exact").unwrap_or(false),
            )
            .await?;
        ToolOutput::batch(&entries)
    }
}

/// Prices of the configured common-coin list
pub struct CommonCoinsPricesTool {
    market: Arc<MarketService>,
}

impl CommonCoinsPricesTool {
    pub fn new(market: Arc<MarketService>) -> Self {
        Self { market }
    }
}

impl CatalogTool for CommonCoinsPricesTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "get_common_coins_prices",
            "Get current prices of the most commonly watched coins",
            OutputShape::BatchList,
        )
        .param(currencies_param(&self.market))
    }
}

#[async_trait::async_trait]
impl ToolHandler for CommonCoinsPricesTool {
    async fn call(&self, args: ToolArgs) -> ToolResult<ToolOutput> {
        let entries = self.market.common_coins_prices(args.str("currency")).await?;
        ToolOutput::batch(&entries)
    }
}

pub struct TrendingCoinsTool {
    market: Arc<MarketService>,
}

impl TrendingCoinsTool {
    pub fn new(market: Arc<MarketService>) -> Self {
        Self { market }
    }
}

impl CatalogTool for TrendingCoinsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "get_trending_coins",
            "Get the coins currently trending in searches, priced in btc",
            OutputShape::MarketSnapshotList,
        )
    }
}

#[async_trait::async_trait]
impl ToolHandler for TrendingCoinsTool {
    async fn call(&self, _args: ToolArgs) -> ToolResult<ToolOutput> {
        ToolOutput::new(&self.market.trending().await?)
    }
}

pub struct CoinDetailTool {
    market: Arc<MarketService>,
}

impl CoinDetailTool {
    pub fn new(market: Arc<MarketService>) -> Self {
        Self { market }
    }
}

impl CatalogTool for CoinDetailTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "get_coin_detail",
            "Get detailed market data for a coin: supply, 24h range, all-time high, homepage",
            OutputShape::MarketSnapshot,
        )
        .param(coin_id_param())
        .param(currency_param(&self.market))
        .param(exact_param())
    }
}

#[async_trait::async_trait]
impl ToolHandler for CoinDetailTool {
    async fn call(&self, args: ToolArgs) -> ToolResult<ToolOutput> {
        let snapshot = self
            .market
            .coin_detail(
                args.required_str("coin_id")?,
                args.str("currency"),
                args.bool("exact").unwrap_or(false),
            )
            .await?;
        ToolOutput::new(&snapshot)
    }
}

pub struct GlobalMarketTool {
    market: Arc<MarketService>,
}

impl GlobalMarketTool {
    pub fn new(market: Arc<MarketService>) -> Self {
        Self { market }
    }
}

impl CatalogTool for GlobalMarketTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "get_global_market_data",
            "Get total market cap, 24h volume and market-cap dominance across all coins",
            OutputShape::MarketSnapshot,
        )
        .param(currency_param(&self.market))
    }
}

#[async_trait::async_trait]
impl ToolHandler for GlobalMarketTool {
    async fn call(&self, args: ToolArgs) -> ToolResult<ToolOutput> {
        ToolOutput::new(&self.market.global(args.str("currency")).await?)
    }
}

pub struct SearchCoinsTool {
    market: Arc<MarketService>,
}

impl SearchCoinsTool {
    pub fn new(market: Arc<MarketService>) -> Self {
        Self { market }
    }
}

impl CatalogTool for SearchCoinsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "search_coins",
            "Search coins by name or symbol and return the matches with current prices",
            OutputShape::BatchList,
        )
        .param(ParamSpec::required("query", ParamType::String, "Name or symbol to search for"))
        .param(
            ParamSpec::optional("limit", ParamType::Integer, "Maximum number of results")
                .with_default(10)
                .with_range(1, i64::from(MAX_SEARCH_LIMIT)),
        )
        .param(currency_param(&self.market))
    }
}

#[async_trait::async_trait]
impl ToolHandler for SearchCoinsTool {
    async fn call(&self, args: ToolArgs) -> ToolResult<ToolOutput> {
        let entries = self
            .market
            .search(
                args.required_str("query")?,
                args.u32("limit")?,
                args.str("currency"),
            )
            .await?;
        ToolOutput::batch(&entries)
    }
}

/// Historical price points
pub struct MarketChartTool {
    market: Arc<MarketService>,
}

impl MarketChartTool {
    pub fn new(market: Arc<MarketService>) -> Self {
        Self { market }
    }
}

impl CatalogTool for MarketChartTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "get_coin_market_chart",
            "Get historical price, market cap and volume points for a coin",
            OutputShape::MarketSnapshotList,
        )
        .param(coin_id_param())
        .param(currency_param(&self.market))
        .param(
            ParamSpec::optional("days", ParamType::Integer, "Number of days of history")
                .with_default(7)
                .with_range(1, i64::from(MAX_CHART_DAYS)),
        )
        .param(exact_param())
    }
}

#[async_trait::async_trait]
impl ToolHandler for MarketChartTool {
    async fn call(&self, args: ToolArgs) -> ToolResult<ToolOutput> {
        let points = self
            .market
            .market_chart(
                args.required_str("coin_id")?,
                args.str("currency"),
                args.u32("days")?,
                args.bool("exact").unwrap_or(false),
            )
            .await?;
        ToolOutput::new(&points)
    }
}
