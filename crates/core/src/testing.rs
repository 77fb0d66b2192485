// In-memory providers for tests of the market layer and its callers

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{ContractProvider, SpotProvider};
use crate::types::{
    CandleQuery, CoinId, CoinIdentifier, ContractSnapshot, ContractSpecs, ExchangeBreakdown,
    Interval, MarketSnapshot, Ohlc,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fixed timestamp so repeated calls serialize identically
pub fn fixed_time() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default()
}

#[derive(Default)]
pub struct StubSpotProvider {
    prices: BTreeMap<String, f64>,
    searches: HashMap<String, Vec<CoinIdentifier>>,
    failure: Option<ProviderError>,
    price_failure: Option<ProviderError>,
    calls: AtomicUsize,
    price_calls: AtomicUsize,
    search_calls: AtomicUsize,
}

impl StubSpotProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, id: &str, price: f64) -> Self {
        self.prices.insert(id.to_string(), price);
        self
    }

    pub fn with_search(mut self, query: &str, results: Vec<CoinIdentifier>) -> Self {
        self.searches.insert(query.to_lowercase(), results);
        self
    }

    /// Make every call fail with `error`
    pub fn failing(mut self, error: ProviderError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Make only price calls fail with `error`
    pub fn failing_prices(mut self, error: ProviderError) -> Self {
        self.price_failure = Some(error);
        self
    }

    /// Total upstream calls of any kind
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn price_calls(&self) -> usize {
        self.price_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> ProviderResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn snapshot(&self, id: &str, currency: &str) -> Option<MarketSnapshot> {
        self.prices
            .get(id)
            .map(|price| MarketSnapshot::new(id, *price, currency, fixed_time()))
    }
}

#[async_trait::async_trait]
impl SpotProvider for StubSpotProvider {
    fn name(&self) -> &str {
        "stub-spot"
    }

    async fn prices(
        &self,
        ids: &[CoinId],
        currencies: &[String],
    ) -> ProviderResult<Vec<MarketSnapshot>> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        self.enter()?;
        if let Some(e) = &self.price_failure {
            return Err(e.clone());
        }
        Ok(ids
            .iter()
            .flat_map(|id| {
                currencies
                    .iter()
                    .filter_map(move |currency| self.snapshot(id.as_str(), currency))
            })
            .collect())
    }

    async fn trending(&self) -> ProviderResult<Vec<MarketSnapshot>> {
        self.enter()?;
        Ok(self
            .prices
            .keys()
            .filter_map(|id| self.snapshot(id, "btc"))
            .collect())
    }

    async fn coin_detail(&self, id: &CoinId, currency: &str) -> ProviderResult<MarketSnapshot> {
        self.enter()?;
        let mut snapshot = self
            .snapshot(id.as_str(), currency)
            .ok_or_else(|| ProviderError::NotFound(format!("coin '{}'", id)))?;
        snapshot.name = Some(id.to_string());
        snapshot.market_cap = Some(snapshot.price * 1000.0);
        Ok(snapshot)
    }

    async fn global(&self, currency: &str) -> ProviderResult<MarketSnapshot> {
        self.enter()?;
        let total: f64 = self.prices.values().sum();
        let mut snapshot = MarketSnapshot::new("global", total, currency, fixed_time());
        if total > 0.0 {
            snapshot.dominance = self
                .prices
                .iter()
                .map(|(id, price)| (id.clone(), price / total * 100.0))
                .collect();
        }
        Ok(snapshot)
    }

    async fn search(&self, query: &str) -> ProviderResult<Vec<CoinIdentifier>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.enter()?;
        Ok(self
            .searches
            .get(&query.trim().to_lowercase())
            .cloned()
            .unwrap_or_default())
    }

    async fn market_chart(
        &self,
        id: &CoinId,
        currency: &str,
        days: u32,
    ) -> ProviderResult<Vec<MarketSnapshot>> {
        self.enter()?;
        let latest = self
            .snapshot(id.as_str(), currency)
            .ok_or_else(|| ProviderError::NotFound(format!("coin '{}'", id)))?;

        Ok((0..days)
            .rev()
            .map(|back| {
                let mut point = latest.clone();
                point.as_of = latest.as_of - Duration::days(i64::from(back));
                point
            })
            .collect())
    }
}

pub struct StubContractProvider {
    exchange: String,
    tickers: HashMap<String, f64>,
    open_interest: HashMap<String, f64>,
    ratios: HashMap<String, ExchangeBreakdown>,
    failure: Option<ProviderError>,
    calls: AtomicUsize,
}

impl StubContractProvider {
    pub fn new(exchange: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            tickers: HashMap::new(),
            open_interest: HashMap::new(),
            ratios: HashMap::new(),
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_ticker(mut self, symbol: &str, last_price: f64) -> Self {
        self.tickers.insert(symbol.to_string(), last_price);
        self
    }

    pub fn with_open_interest(mut self, symbol: &str, size: f64) -> Self {
        self.open_interest.insert(symbol.to_string(), size);
        self
    }

    pub fn with_position_ratio(mut self, symbol: &str, ratio: ExchangeBreakdown) -> Self {
        self.ratios.insert(symbol.to_string(), ratio);
        self
    }

    pub fn failing(mut self, error: ProviderError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> ProviderResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn last_price(&self, symbol: &str) -> ProviderResult<f64> {
        self.tickers
            .get(symbol)
            .copied()
            .ok_or_else(|| ProviderError::NotFound(format!("contract '{}'", symbol)))
    }
}

#[async_trait::async_trait]
impl ContractProvider for StubContractProvider {
    fn name(&self) -> &str {
        &self.exchange
    }

    async fn ticker(&self, symbol: &str) -> ProviderResult<ContractSnapshot> {
        self.enter()?;
        let price = self.last_price(symbol)?;

        let mut breakdown = ExchangeBreakdown::new(&self.exchange);
        breakdown.volume = Some(100.0);
        breakdown.amount = Some(price * 100.0);

        let mut snapshot = ContractSnapshot::new(symbol, fixed_time());
        snapshot.last_price = Some(price);
        snapshot.mark_price = Some(price);
        snapshot.funding_rate = Some(0.0001);
        snapshot.volume = breakdown.volume;
        snapshot.amount = breakdown.amount;
        snapshot.positions.push(breakdown);
        Ok(snapshot)
    }

    async fn specs(&self, symbol: &str) -> ProviderResult<ContractSpecs> {
        self.enter()?;
        self.last_price(symbol)?;
        Ok(ContractSpecs {
            base_asset: symbol.trim_end_matches("USDT").to_string(),
            quote_asset: "USDT".to_string(),
            status: Some("normal".to_string()),
            max_leverage: Some(125.0),
            maker_fee_rate: Some(0.0002),
            taker_fee_rate: Some(0.0006),
            min_trade_size: Some(0.001),
            funding_interval_hours: Some(8.0),
        })
    }

    async fn candles(&self, query: &CandleQuery) -> ProviderResult<Vec<ContractSnapshot>> {
        self.enter()?;
        let price = self.last_price(&query.symbol)?;

        Ok((0..query.limit.min(3))
            .map(|i| {
                let offset = f64::from(i);
                let mut candle = ContractSnapshot::new(
                    &query.symbol,
                    fixed_time() + Duration::hours(i64::from(i)),
                );
                candle.ohlc = Some(Ohlc {
                    open: price + offset,
                    high: price + offset + 1.0,
                    low: price + offset - 1.0,
                    close: price + offset + 0.5,
                });
                candle.volume = Some(10.0);
                candle
            })
            .collect())
    }

    async fn open_interest(&self, symbol: &str) -> ProviderResult<ContractSnapshot> {
        self.enter()?;
        let size = self
            .open_interest
            .get(symbol)
            .copied()
            .ok_or_else(|| ProviderError::NotFound(format!("contract '{}'", symbol)))?;

        let mut breakdown = ExchangeBreakdown::new(&self.exchange);
        breakdown.open_interest = Some(size);

        let mut snapshot = ContractSnapshot::new(symbol, fixed_time());
        snapshot.open_interest = Some(size);
        snapshot.positions.push(breakdown);
        Ok(snapshot)
    }

    async fn position_ratio(
        &self,
        symbol: &str,
        _period: Interval,
    ) -> ProviderResult<Vec<ExchangeBreakdown>> {
        self.enter()?;
        Ok(self.ratios.get(symbol).cloned().into_iter().collect())
    }
}
