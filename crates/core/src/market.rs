// Aggregation and normalization over the spot and contract providers

use crate::config::MarketConfig;
use crate::error::{ProviderError, ToolError, ToolResult};
use crate::provider::{ContractProvider, SpotProvider};
use crate::types::{
    BatchEntry, CandleQuery, CoinId, CoinIdentifier, ContractSnapshot, Interval, KlineType,
    MarketSnapshot,
};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

pub const MAX_SEARCH_LIMIT: u32 = 100;
pub const MAX_CHART_DAYS: u32 = 365;
pub const MAX_CANDLE_LIMIT: u32 = 1000;

/// Periods the long/short ratio endpoint accepts
pub const POSITION_PERIODS: [Interval; 8] = [
    Interval::M5,
    Interval::M15,
    Interval::M30,
    Interval::H1,
    Interval::H4,
    Interval::H6,
    Interval::H12,
    Interval::D1,
];

/// Defaults applied when a call leaves a choice open
#[derive(Debug, Clone)]
pub struct MarketDefaults {
    pub currency: String,
    pub quote_asset: String,
    pub max_concurrency: usize,
    pub common_coins: Vec<CoinId>,
}

impl From<&MarketConfig> for MarketDefaults {
    fn from(config: &MarketConfig) -> Self {
        Self {
            currency: config.default_currency.trim().to_lowercase(),
            quote_asset: config.quote_asset.trim().to_uppercase(),
            max_concurrency: config.max_concurrency.max(1),
            common_coins: config.common_coins.iter().map(CoinId::new).collect(),
        }
    }
}

impl Default for MarketDefaults {
    fn default() -> Self {
        Self::from(&MarketConfig::default())
    }
}

/// Pick the canonical coin for a bare symbol or name
///
/// Exact symbol matches win, lowest market-cap rank first (unranked last);
/// ties keep the provider's relevance order. Without a symbol match an exact
/// name match is taken, then the provider's first result.
pub fn pick_best_match(query: &str, candidates: &[CoinIdentifier]) -> Option<CoinIdentifier> {
    let query = query.trim();
    let rank = |c: &&CoinIdentifier| c.market_cap_rank.unwrap_or(u32::MAX);

    candidates
        .iter()
        .filter(|c| c.symbol.eq_ignore_ascii_case(query))
        .min_by_key(rank)
        .or_else(|| {
            candidates
                .iter()
                .filter(|c| c.name.eq_ignore_ascii_case(query))
                .min_by_key(rank)
        })
        .or_else(|| candidates.first())
        .cloned()
}

/// Market data facade used by every tool handler
pub struct MarketService {
    spot: Arc<dyn SpotProvider>,
    contract: Arc<dyn ContractProvider>,
    defaults: MarketDefaults,
}

impl MarketService {
    pub fn new(
        spot: Arc<dyn SpotProvider>,
        contract: Arc<dyn ContractProvider>,
        defaults: MarketDefaults,
    ) -> Self {
        Self {
            spot,
            contract,
            defaults,
        }
    }

    pub fn defaults(&self) -> &MarketDefaults {
        &self.defaults
    }

    /// Normalize a comma-separated currency list, falling back to the configured default
    ///
    /// Keeps the requested order and drops repeats.
    pub fn currencies(&self, requested: Option<&str>) -> ToolResult<Vec<String>> {
        let mut currencies: Vec<String> = Vec::new();
        for part in requested.unwrap_or_default().split(',') {
            let currency = part.trim().to_lowercase();
            if currency.is_empty() || currencies.contains(&currency) {
                continue;
            }
            if currency.len() > 10 || !currency.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ToolError::invalid_argument(format!(
                    "invalid currency '{}'",
                    currency
                )));
            }
            currencies.push(currency);
        }

        if currencies.is_empty() {
            currencies.push(self.defaults.currency.clone());
        }
        Ok(currencies)
    }

    /// Normalize a requested currency for calls that quote in exactly one
    pub fn currency(&self, requested: Option<&str>) -> ToolResult<String> {
        let currencies = self.currencies(requested)?;
        match currencies.as_slice() {
            [currency] => Ok(currency.clone()),
            several => Err(ToolError::invalid_argument(format!(
                "expected a single currency, got '{}'",
                several.join(",")
            ))),
        }
    }

    fn coin_id(input: &str) -> ToolResult<CoinId> {
        let id = CoinId::new(input);
        if id.as_str().is_empty() {
            return Err(ToolError::invalid_argument("coin id must not be empty"));
        }
        Ok(id)
    }

    /// Resolve a symbol or name to a canonical coin through a search call
    pub async fn resolve_coin(&self, input: &str) -> ToolResult<CoinIdentifier> {
        let query = input.trim();
        let candidates = self.spot.search(query).await?;

        let picked = pick_best_match(query, &candidates).ok_or_else(|| {
            ProviderError::NotFound(format!("no coin matches '{}'", query))
        })?;

        tracing::debug!(
            query = query,
            resolved = %picked.id,
            candidates = candidates.len(),
            "Resolved coin through search"
        );
        Ok(picked)
    }

    /// After a NotFound on `id`, try to map `input` to another canonical id
    async fn fallback_id(
        &self,
        input: &str,
        id: &CoinId,
        exact: bool,
        err: ProviderError,
    ) -> ToolResult<CoinIdentifier> {
        if exact || !err.is_not_found() {
            return Err(err.into());
        }

        let identifier = self.resolve_coin(input).await?;
        if &identifier.id == id {
            return Err(err.into());
        }
        Ok(identifier)
    }

    /// One snapshot per currency, in `currencies` order
    async fn price_of(
        &self,
        id: &CoinId,
        currencies: &[String],
    ) -> Result<Vec<MarketSnapshot>, ProviderError> {
        let mut found = index_prices(self.spot.prices(std::slice::from_ref(id), currencies).await?);
        currencies
            .iter()
            .map(|currency| {
                found
                    .remove(&(id.as_str().to_string(), currency.clone()))
                    .ok_or_else(|| missing_price(id, currency))
            })
            .collect()
    }

    /// Current price of one coin in each requested currency
    pub async fn coin_price(
        &self,
        input: &str,
        currency: Option<&str>,
        exact: bool,
    ) -> ToolResult<Vec<MarketSnapshot>> {
        let currencies = self.currencies(currency)?;
        let id = Self::coin_id(input)?;

        match self.price_of(&id, &currencies).await {
            Ok(snapshots) => Ok(snapshots),
            Err(e) => {
                let identifier = self.fallback_id(input, &id, exact, e).await?;
                let snapshots = self.price_of(&identifier.id, &currencies).await?;
                Ok(snapshots
                    .into_iter()
                    .map(|s| s.with_identity(&identifier))
                    .collect())
            }
        }
    }

    /// Prices for many coins; per-item failures become error markers
    ///
    /// Output is ordered by `inputs`, then by currency. A coin that cannot be
    /// priced at all yields one marker. Fails only when every item failed.
    pub async fn batch_prices(
        &self,
        inputs: &[String],
        currency: Option<&str>,
        exact: bool,
    ) -> ToolResult<Vec<BatchEntry>> {
        if inputs.is_empty() {
            return Err(ToolError::invalid_argument("coin_ids must not be empty"));
        }
        let currencies = self.currencies(currency)?;

        let ids: Vec<CoinId> = inputs.iter().map(CoinId::new).collect();
        let unique: Vec<CoinId> = ids
            .iter()
            .filter(|id| !id.as_str().is_empty())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let combined: Result<PriceIndex, ProviderError> = if unique.is_empty() {
            Ok(PriceIndex::new())
        } else {
            self.spot.prices(&unique, &currencies).await.map(index_prices)
        };

        if let Err(e) = &combined {
            tracing::warn!(provider = self.spot.name(), error = %e, "Batch price call failed");
        }

        let combined = &combined;
        let currencies = currencies.as_slice();
        let futures: Vec<_> = inputs
            .iter()
            .zip(ids)
            .map(|(input, id)| self.batch_entries(input, id, combined, currencies, exact))
            .collect();
        let per_coin: Vec<Vec<BatchEntry>> = stream::iter(futures)
            .buffered(self.defaults.max_concurrency)
            .collect()
            .await;

        ensure_not_all_failed(per_coin.into_iter().flatten().collect())
    }

    async fn batch_entries(
        &self,
        input: &str,
        id: CoinId,
        combined: &Result<PriceIndex, ProviderError>,
        currencies: &[String],
        exact: bool,
    ) -> Vec<BatchEntry> {
        if id.as_str().is_empty() {
            return vec![BatchEntry::failed(
                input.trim(),
                &ToolError::invalid_argument("coin id must not be empty"),
            )];
        }

        let found = match combined {
            Ok(found) => found,
            Err(e) => return vec![BatchEntry::failed(id.as_str(), &e.clone().into())],
        };
        if currencies.iter().any(|c| quote(found, &id, c).is_some()) {
            return quote_entries(found, &id, currencies);
        }

        let resolved = match self
            .fallback_id(input, &id, exact, missing_price(&id, &currencies.join(",")))
            .await
        {
            Ok(identifier) => identifier,
            Err(e) => return vec![BatchEntry::failed(id.as_str(), &e)],
        };

        match self.price_of(&resolved.id, currencies).await {
            Ok(snapshots) => snapshots
                .into_iter()
                .map(|s| BatchEntry::Snapshot(s.with_identity(&resolved)))
                .collect(),
            Err(e) => vec![BatchEntry::failed(id.as_str(), &e.into())],
        }
    }

    /// Prices for the configured common-coin list
    pub async fn common_coins_prices(&self, currency: Option<&str>) -> ToolResult<Vec<BatchEntry>> {
        let coins: Vec<String> = self
            .defaults
            .common_coins
            .iter()
            .map(|id| id.0.clone())
            .collect();
        self.batch_prices(&coins, currency, true).await
    }

    pub async fn trending(&self) -> ToolResult<Vec<MarketSnapshot>> {
        Ok(self.spot.trending().await?)
    }

    pub async fn coin_detail(
        &self,
        input: &str,
        currency: Option<&str>,
        exact: bool,
    ) -> ToolResult<MarketSnapshot> {
        let currency = self.currency(currency)?;
        let id = Self::coin_id(input)?;

        match self.spot.coin_detail(&id, &currency).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                let identifier = self.fallback_id(input, &id, exact, e).await?;
                let snapshot = self.spot.coin_detail(&identifier.id, &currency).await?;
                Ok(snapshot.with_identity(&identifier))
            }
        }
    }

    pub async fn global(&self, currency: Option<&str>) -> ToolResult<MarketSnapshot> {
        let currency = self.currency(currency)?;
        Ok(self.spot.global(&currency).await?)
    }

    /// Search, then price the top `limit` matches with one upstream call
    ///
    /// Matches that cannot be priced become error markers; fails when none can.
    pub async fn search(
        &self,
        query: &str,
        limit: u32,
        currency: Option<&str>,
    ) -> ToolResult<Vec<BatchEntry>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ToolError::invalid_argument("query must not be empty"));
        }
        let currency = self.currency(currency)?;
        let limit = limit.clamp(1, MAX_SEARCH_LIMIT) as usize;

        let candidates: Vec<CoinIdentifier> =
            self.spot.search(query).await?.into_iter().take(limit).collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<CoinId> = candidates.iter().map(|c| c.id.clone()).collect();
        let found: ToolResult<PriceIndex> = self
            .spot
            .prices(&ids, std::slice::from_ref(&currency))
            .await
            .map(index_prices)
            .map_err(|e| {
                tracing::warn!(provider = self.spot.name(), error = %e, "Search price call failed");
                e.into()
            });

        let entries = candidates
            .iter()
            .map(|candidate| {
                let found = match &found {
                    Ok(found) => found,
                    Err(e) => return BatchEntry::failed(candidate.id.as_str(), e),
                };
                match quote(found, &candidate.id, &currency) {
                    Some(snapshot) => {
                        BatchEntry::Snapshot(snapshot.clone().with_identity(candidate))
                    }
                    None => BatchEntry::failed(
                        candidate.id.as_str(),
                        &missing_price(&candidate.id, &currency).into(),
                    ),
                }
            })
            .collect();
        ensure_not_all_failed(entries)
    }

    /// Historical price points
    pub async fn market_chart(
        &self,
        input: &str,
        currency: Option<&str>,
        days: u32,
        exact: bool,
    ) -> ToolResult<Vec<MarketSnapshot>> {
        if !(1..=MAX_CHART_DAYS).contains(&days) {
            return Err(ToolError::invalid_argument(format!(
                "days must be between 1 and {}",
                MAX_CHART_DAYS
            )));
        }
        let currency = self.currency(currency)?;
        let id = Self::coin_id(input)?;

        match self.spot.market_chart(&id, &currency, days).await {
            Ok(points) => Ok(points),
            Err(e) => {
                let identifier = self.fallback_id(input, &id, exact, e).await?;
                Ok(self
                    .spot
                    .market_chart(&identifier.id, &currency, days)
                    .await?)
            }
        }
    }

    /// Normalize `btc`, `BTC/USDT`, `btc-usdt` and `BTCUSDT` to `BTCUSDT`
    pub fn contract_symbol(&self, input: &str) -> ToolResult<String> {
        let cleaned: String = input
            .trim()
            .chars()
            .filter(|c| !matches!(c, '/' | '-' | '_' | ' '))
            .collect::<String>()
            .to_uppercase();

        if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ToolError::invalid_argument(format!(
                "invalid contract symbol '{}'",
                input
            )));
        }

        let quote = &self.defaults.quote_asset;
        if cleaned.len() > quote.len() && cleaned.ends_with(quote.as_str()) {
            Ok(cleaned)
        } else {
            Ok(format!("{}{}", cleaned, quote))
        }
    }

    /// Ticker merged with static contract rules
    pub async fn contract_info(&self, symbol: &str) -> ToolResult<ContractSnapshot> {
        let symbol = self.contract_symbol(symbol)?;
        let (mut snapshot, specs) =
            futures::try_join!(self.contract.ticker(&symbol), self.contract.specs(&symbol))?;

        snapshot.specs = Some(specs);
        snapshot.timeframe.get_or_insert_with(|| "24h".to_string());
        Ok(snapshot)
    }

    pub async fn contract_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: u32,
        kline_type: KlineType,
    ) -> ToolResult<Vec<ContractSnapshot>> {
        if !(1..=MAX_CANDLE_LIMIT).contains(&limit) {
            return Err(ToolError::invalid_argument(format!(
                "limit must be between 1 and {}",
                MAX_CANDLE_LIMIT
            )));
        }

        let query = CandleQuery {
            symbol: self.contract_symbol(symbol)?,
            interval,
            limit,
            kline_type,
        };

        let mut candles = self.contract.candles(&query).await?;
        for candle in &mut candles {
            candle
                .timeframe
                .get_or_insert_with(|| interval.to_string());
        }
        Ok(candles)
    }

    /// Open interest combined with the long/short split per exchange
    pub async fn contract_positions(
        &self,
        symbol: &str,
        period: Interval,
    ) -> ToolResult<ContractSnapshot> {
        if !POSITION_PERIODS.contains(&period) {
            return Err(ToolError::invalid_argument(format!(
                "unsupported period '{}', expected one of: {}",
                period,
                POSITION_PERIODS.map(|p| p.as_str()).join(", ")
            )));
        }
        let symbol = self.contract_symbol(symbol)?;

        let (mut snapshot, ratios) = futures::try_join!(
            self.contract.open_interest(&symbol),
            self.contract.position_ratio(&symbol, period)
        )?;

        for ratio in &ratios {
            snapshot.upsert_position(ratio);
        }
        snapshot.timeframe = Some(period.to_string());
        Ok(snapshot)
    }

    /// 24h traded volume (base) and amount (quote) per exchange
    pub async fn contract_volume(&self, symbol: &str) -> ToolResult<ContractSnapshot> {
        let symbol = self.contract_symbol(symbol)?;
        let ticker = self.contract.ticker(&symbol).await?;

        let mut snapshot = ContractSnapshot::new(ticker.coin_id, ticker.as_of);
        snapshot.volume = ticker.volume;
        snapshot.amount = ticker.amount;
        snapshot.last_price = ticker.last_price;
        snapshot.positions = ticker.positions;
        snapshot.timeframe = Some("24h".to_string());
        Ok(snapshot)
    }
}

/// Quotes keyed by (coin id, currency)
type PriceIndex = HashMap<(String, String), MarketSnapshot>;

fn index_prices(snapshots: Vec<MarketSnapshot>) -> PriceIndex {
    snapshots
        .into_iter()
        .map(|s| ((s.coin_id.clone(), s.currency.clone()), s))
        .collect()
}

fn quote<'a>(found: &'a PriceIndex, id: &CoinId, currency: &str) -> Option<&'a MarketSnapshot> {
    found.get(&(id.as_str().to_string(), currency.to_string()))
}

/// One entry per currency; currencies the provider left out become markers
fn quote_entries(found: &PriceIndex, id: &CoinId, currencies: &[String]) -> Vec<BatchEntry> {
    currencies
        .iter()
        .map(|currency| match quote(found, id, currency) {
            Some(snapshot) => BatchEntry::Snapshot(snapshot.clone()),
            None => BatchEntry::failed(id.as_str(), &missing_price(id, currency).into()),
        })
        .collect()
}

fn missing_price(id: &CoinId, currency: &str) -> ProviderError {
    ProviderError::NotFound(format!("no {} price for '{}'", currency, id))
}

fn ensure_not_all_failed(entries: Vec<BatchEntry>) -> ToolResult<Vec<BatchEntry>> {
    if entries.is_empty() || !entries.iter().all(BatchEntry::is_failed) {
        return Ok(entries);
    }

    let first = entries.iter().find_map(|e| match e {
        BatchEntry::Failed(failure) => Some(failure.error.message.clone()),
        BatchEntry::Snapshot(_) => None,
    });
    Err(ToolError::PartialBatchFailure(format!(
        "all {} items failed; first error: {}",
        entries.len(),
        first.unwrap_or_default()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{StubContractProvider, StubSpotProvider};
    use crate::types::ExchangeBreakdown;

    fn identifier(id: &str, symbol: &str, name: &str, rank: Option<u32>) -> CoinIdentifier {
        CoinIdentifier {
            id: CoinId::new(id),
            symbol: symbol.to_string(),
            name: name.to_string(),
            market_cap_rank: rank,
        }
    }

    fn service(spot: StubSpotProvider) -> (MarketService, Arc<StubSpotProvider>) {
        let spot = Arc::new(spot);
        let service = MarketService::new(
            spot.clone(),
            Arc::new(StubContractProvider::new("bitget")),
            MarketDefaults::default(),
        );
        (service, spot)
    }

    #[test]
    fn test_pick_best_match_prefers_symbol_then_rank() {
        let candidates = vec![
            identifier("bitcoin-cash", "BCH", "Bitcoin Cash", Some(15)),
            identifier("wrapped-btc", "BTC", "Wrapped BTC", None),
            identifier("bitcoin", "btc", "Bitcoin", Some(1)),
            identifier("batcat", "BTC", "Batcat", Some(900)),
        ];

        let picked = pick_best_match("BTC", &candidates).unwrap();
        assert_eq!(picked.id.as_str(), "bitcoin");
    }

    #[test]
    fn test_pick_best_match_ties_keep_provider_order() {
        let candidates = vec![
            identifier("first", "abc", "First", None),
            identifier("second", "abc", "Second", None),
        ];
        assert_eq!(pick_best_match("abc", &candidates).unwrap().id.as_str(), "first");
    }

    #[test]
    fn test_pick_best_match_falls_back_to_name_then_first() {
        let candidates = vec![
            identifier("ethereum-classic", "etc", "Ethereum Classic", Some(20)),
            identifier("ethereum", "eth", "Ethereum", Some(2)),
        ];
        assert_eq!(
            pick_best_match("ethereum", &candidates).unwrap().id.as_str(),
            "ethereum"
        );
        assert_eq!(
            pick_best_match("ether", &candidates).unwrap().id.as_str(),
            "ethereum-classic"
        );
        assert!(pick_best_match("x", &[]).is_none());
    }

    #[test]
    fn test_currency_defaults_and_validation() {
        let (service, _) = service(StubSpotProvider::new());

        assert_eq!(service.currency(None).unwrap(), "cny");
        assert_eq!(service.currency(Some("  ")).unwrap(), "cny");
        assert_eq!(service.currency(Some("USD")).unwrap(), "usd");
        assert!(service.currency(Some("us d")).is_err());
        assert!(service.currency(Some("cny,usd")).is_err());
    }

    #[test]
    fn test_currency_lists_keep_order_and_drop_repeats() {
        let (service, _) = service(StubSpotProvider::new());

        assert_eq!(
            service.currencies(Some(" CNY, usd,,cny ")).unwrap(),
            vec!["cny", "usd"]
        );
        assert_eq!(service.currencies(Some(",")).unwrap(), vec!["cny"]);
        assert_eq!(service.currencies(None).unwrap(), vec!["cny"]);
        assert!(service.currencies(Some("usd,u$d")).is_err());
    }

    #[tokio::test]
    async fn test_coin_price_in_several_currencies() {
        let (service, spot) = service(StubSpotProvider::new().with_price("bitcoin", 65000.0));

        let snapshots = service
            .coin_price("bitcoin", Some("cny,usd"), true)
            .await
            .unwrap();

        let currencies: Vec<&str> = snapshots.iter().map(|s| s.currency.as_str()).collect();
        assert_eq!(currencies, vec!["cny", "usd"]);
        assert!(snapshots.iter().all(|s| s.coin_id == "bitcoin"));
        assert_eq!(spot.price_calls(), 1);
    }

    #[tokio::test]
    async fn test_coin_price_by_id() {
        let (service, spot) = service(StubSpotProvider::new().with_price("bitcoin", 65000.0));

        let snapshots = service.coin_price("Bitcoin", Some("usd"), false).await.unwrap();
        assert_eq!(snapshots.len(), 1);
        let snapshot = &snapshots[0];
        assert_eq!(snapshot.coin_id, "bitcoin");
        assert_eq!(snapshot.currency, "usd");
        assert_eq!(snapshot.price, 65000.0);
        assert_eq!(spot.search_calls(), 0);
    }

    #[tokio::test]
    async fn test_coin_price_resolves_symbol() {
        let (service, spot) = service(
            StubSpotProvider::new()
                .with_price("ethereum", 3000.0)
                .with_search(
                    "eth",
                    vec![
                        identifier("ethereum-classic", "etc", "Ethereum Classic", Some(20)),
                        identifier("ethereum", "eth", "Ethereum", Some(2)),
                    ],
                ),
        );

        let snapshots = service.coin_price("ETH", None, false).await.unwrap();
        let snapshot = &snapshots[0];
        assert_eq!(snapshot.coin_id, "ethereum");
        assert_eq!(snapshot.symbol.as_deref(), Some("ETH"));
        assert_eq!(snapshot.rank, Some(2));
        assert_eq!(spot.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_coin_price_exact_skips_resolution() {
        let (service, spot) = service(
            StubSpotProvider::new()
                .with_price("ethereum", 3000.0)
                .with_search("eth", vec![identifier("ethereum", "eth", "Ethereum", Some(2))]),
        );

        let err = service.coin_price("eth", None, true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(spot.search_calls(), 0);
    }

    #[tokio::test]
    async fn test_batch_partial_failure_keeps_order() {
        let (service, _) = service(
            StubSpotProvider::new()
                .with_price("bitcoin", 65000.0)
                .with_price("ethereum", 3000.0),
        );

        let inputs = vec![
            "nonexistent-coin-xyz".to_string(),
            "bitcoin".to_string(),
            "ethereum".to_string(),
        ];
        let entries = service.batch_prices(&inputs, Some("usd"), false).await.unwrap();

        assert_eq!(entries.len(), 3);
        match &entries[0] {
            BatchEntry::Failed(failure) => {
                assert_eq!(failure.coin_id, "nonexistent-coin-xyz");
                assert_eq!(failure.error.kind, ErrorKind::NotFound);
            }
            other => panic!("expected failure marker, got {:?}", other),
        }
        assert!(matches!(&entries[1], BatchEntry::Snapshot(s) if s.coin_id == "bitcoin"));
        assert!(matches!(&entries[2], BatchEntry::Snapshot(s) if s.coin_id == "ethereum"));
    }

    #[tokio::test]
    async fn test_batch_uses_one_combined_price_call() {
        let (service, spot) = service(
            StubSpotProvider::new()
                .with_price("bitcoin", 1.0)
                .with_price("ethereum", 2.0),
        );

        let inputs = vec!["bitcoin".to_string(), "ethereum".to_string(), "bitcoin".to_string()];
        let entries = service.batch_prices(&inputs, None, true).await.unwrap();

        assert_eq!(entries.len(), 3);
        assert_eq!(spot.price_calls(), 1);
    }

    #[tokio::test]
    async fn test_batch_in_several_currencies_orders_by_coin() {
        let (service, spot) = service(
            StubSpotProvider::new()
                .with_price("bitcoin", 1.0)
                .with_price("ethereum", 2.0),
        );

        let inputs = vec![
            "ethereum".to_string(),
            "nonexistent-coin-xyz".to_string(),
            "bitcoin".to_string(),
        ];
        let entries = service
            .batch_prices(&inputs, Some("usd,cny"), true)
            .await
            .unwrap();

        let quoted: Vec<(String, String)> = entries
            .iter()
            .map(|entry| match entry {
                BatchEntry::Snapshot(s) => (s.coin_id.clone(), s.currency.clone()),
                BatchEntry::Failed(f) => (f.coin_id.clone(), "failed".to_string()),
            })
            .collect();
        assert_eq!(
            quoted,
            vec![
                ("ethereum".to_string(), "usd".to_string()),
                ("ethereum".to_string(), "cny".to_string()),
                ("nonexistent-coin-xyz".to_string(), "failed".to_string()),
                ("bitcoin".to_string(), "usd".to_string()),
                ("bitcoin".to_string(), "cny".to_string()),
            ]
        );
        assert_eq!(spot.price_calls(), 1);
    }

    #[tokio::test]
    async fn test_batch_all_failed_is_an_error() {
        let (service, _) = service(StubSpotProvider::new().failing(ProviderError::UpstreamUnavailable(
            "down".to_string(),
        )));

        let inputs = vec!["bitcoin".to_string(), "ethereum".to_string()];
        let err = service.batch_prices(&inputs, None, true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialBatchFailure);
        assert!(err.to_string().contains("all 2 items failed"));
    }

    #[tokio::test]
    async fn test_batch_rejects_empty_input() {
        let (service, _) = service(StubSpotProvider::new());
        let err = service.batch_prices(&[], None, false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_common_coins_cover_configured_list() {
        let (service, _) = service(StubSpotProvider::new().with_price("bitcoin", 1.0));

        let entries = service.common_coins_prices(None).await.unwrap();
        assert_eq!(entries.len(), 10);
        assert!(!entries[0].is_failed());
        assert!(entries[1].is_failed());
    }

    #[tokio::test]
    async fn test_search_prices_matches() {
        let (service, spot) = service(
            StubSpotProvider::new()
                .with_price("dogecoin", 0.1)
                .with_search(
                    "doge",
                    vec![
                        identifier("dogecoin", "doge", "Dogecoin", Some(8)),
                        identifier("dogelon-mars", "elon", "Dogelon Mars", Some(400)),
                        identifier("baby-doge-coin", "babydoge", "Baby Doge Coin", None),
                    ],
                ),
        );

        let entries = service.search("doge", 2, Some("usd")).await.unwrap();
        assert_eq!(entries.len(), 2);
        match &entries[0] {
            BatchEntry::Snapshot(s) => {
                assert_eq!(s.name.as_deref(), Some("Dogecoin"));
                assert_eq!(s.rank, Some(8));
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
        assert!(entries[1].is_failed());
        assert_eq!(spot.price_calls(), 1);
    }

    #[tokio::test]
    async fn test_search_where_no_match_has_a_price_fails() {
        let (service, _) = service(StubSpotProvider::new().with_search(
            "zz",
            vec![
                identifier("zz-one", "zz", "ZZ One", None),
                identifier("zz-two", "zz2", "ZZ Two", None),
            ],
        ));

        let err = service.search("zz", 10, Some("usd")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialBatchFailure);
        assert!(err.to_string().contains("all 2 items failed"));
    }

    #[tokio::test]
    async fn test_search_price_outage_marks_each_match() {
        let (service, spot) = service(
            StubSpotProvider::new()
                .with_search("doge", vec![identifier("dogecoin", "doge", "Dogecoin", Some(8))])
                .failing_prices(ProviderError::UpstreamUnavailable("price feed down".to_string())),
        );

        let err = service.search("doge", 10, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialBatchFailure);
        assert!(err.to_string().contains("price feed down"));
        assert_eq!(spot.search_calls(), 1);
        assert_eq!(spot.price_calls(), 1);
    }

    #[tokio::test]
    async fn test_market_chart_validates_days() {
        let (service, _) = service(StubSpotProvider::new());
        let err = service.market_chart("bitcoin", None, 0, false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_contract_symbol_normalization() {
        let (service, _) = service(StubSpotProvider::new());

        assert_eq!(service.contract_symbol("btc").unwrap(), "BTCUSDT");
        assert_eq!(service.contract_symbol("BTC/USDT").unwrap(), "BTCUSDT");
        assert_eq!(service.contract_symbol("eth-usdt").unwrap(), "ETHUSDT");
        assert_eq!(service.contract_symbol("SOLUSDT").unwrap(), "SOLUSDT");
        assert!(service.contract_symbol("  ").is_err());
        assert!(service.contract_symbol("btc$").is_err());
    }

    #[tokio::test]
    async fn test_contract_positions_merge_open_interest_and_ratio() {
        let mut ratio = ExchangeBreakdown::new("bitget");
        ratio.long_ratio = Some(0.55);
        ratio.short_ratio = Some(0.45);

        let contract = StubContractProvider::new("bitget")
            .with_open_interest("BTCUSDT", 1234.5)
            .with_position_ratio("BTCUSDT", ratio);
        let service = MarketService::new(
            Arc::new(StubSpotProvider::new()),
            Arc::new(contract),
            MarketDefaults::default(),
        );

        let snapshot = service.contract_positions("btc", Interval::H1).await.unwrap();
        assert_eq!(snapshot.coin_id, "BTCUSDT");
        assert_eq!(snapshot.open_interest, Some(1234.5));
        assert_eq!(snapshot.timeframe.as_deref(), Some("1h"));
        assert_eq!(snapshot.positions.len(), 1);
        assert_eq!(snapshot.positions[0].open_interest, Some(1234.5));
        assert_eq!(snapshot.positions[0].long_ratio, Some(0.55));

        let err = service.contract_positions("btc", Interval::M1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_contract_candles_validate_limit() {
        let (service, _) = service(StubSpotProvider::new());
        let err = service
            .contract_candles("btc", Interval::H1, 0, KlineType::Market)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
