// Upstream data source abstractions
//
// Implementations translate a normalized query into one provider's REST call
// and hand back normalized types, so the market layer never sees
// provider-native field names.

use crate::error::ProviderResult;
use crate::types::{
    CandleQuery, CoinId, CoinIdentifier, ContractSnapshot, ContractSpecs, ExchangeBreakdown,
    Interval, MarketSnapshot,
};

/// Spot market data source
#[async_trait::async_trait]
pub trait SpotProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Current prices for `ids` in every one of `currencies`, in one call
    ///
    /// Returns one snapshot per (id, currency) the provider could quote, ordered
    /// by id then currency; pairs it cannot quote are omitted.
    async fn prices(
        &self,
        ids: &[CoinId],
        currencies: &[String],
    ) -> ProviderResult<Vec<MarketSnapshot>>;

    /// Trending coins, priced in BTC
    async fn trending(&self) -> ProviderResult<Vec<MarketSnapshot>>;

    /// Full record for one coin
    async fn coin_detail(&self, id: &CoinId, currency: &str) -> ProviderResult<MarketSnapshot>;

    /// Whole-market totals as the `global` pseudo-coin
    async fn global(&self, currency: &str) -> ProviderResult<MarketSnapshot>;

    /// Coins matching a free-text query, in the provider's relevance order
    async fn search(&self, query: &str) -> ProviderResult<Vec<CoinIdentifier>>;

    /// Historical price points for the last `days` days, oldest first
    async fn market_chart(
        &self,
        id: &CoinId,
        currency: &str,
        days: u32,
    ) -> ProviderResult<Vec<MarketSnapshot>>;
}

/// Derivatives (perpetual contract) data source
#[async_trait::async_trait]
pub trait ContractProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// 24h ticker: last/mark price, funding rate, volume and amount
    async fn ticker(&self, symbol: &str) -> ProviderResult<ContractSnapshot>;

    /// Static contract rules
    async fn specs(&self, symbol: &str) -> ProviderResult<ContractSpecs>;

    /// Candles, oldest first
    async fn candles(&self, query: &CandleQuery) -> ProviderResult<Vec<ContractSnapshot>>;

    /// Total open interest with its per-exchange split
    async fn open_interest(&self, symbol: &str) -> ProviderResult<ContractSnapshot>;

    /// Long/short position ratio per exchange for the latest `period` bucket
    async fn position_ratio(
        &self,
        symbol: &str,
        period: Interval,
    ) -> ProviderResult<Vec<ExchangeBreakdown>>;
}
