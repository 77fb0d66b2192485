//! CoinGecko v3 spot market client.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::transport::HttpTransport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coinlens_core::error::{ProviderError, ProviderResult};
use coinlens_core::provider::SpotProvider;
use coinlens_core::types::{CoinId, CoinIdentifier, MarketSnapshot};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Spot provider backed by the CoinGecko REST API.
#[derive(Debug, Clone)]
pub struct CoinGeckoClient {
    transport: HttpTransport,
}

impl CoinGeckoClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            transport: HttpTransport::new(Arc::new(config))?,
        })
    }
}

const NO_QUERY: &[(&str, &str)] = &[];

/// `/simple/price` entry: `{"usd": 1.0, "usd_market_cap": .., "last_updated_at": ..}`
type SimplePriceResponse = HashMap<String, HashMap<String, Option<f64>>>;

#[derive(Debug, Deserialize)]
struct TrendingResponse {
    #[serde(default)]
    coins: Vec<TrendingCoin>,
}

#[derive(Debug, Deserialize)]
struct TrendingCoin {
    item: TrendingItem,
}

#[derive(Debug, Deserialize)]
struct TrendingItem {
    id: String,
    symbol: String,
    name: String,
    #[serde(default)]
    market_cap_rank: Option<u32>,
    #[serde(default)]
    price_btc: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    coins: Vec<SearchCoin>,
}

#[derive(Debug, Deserialize)]
struct SearchCoin {
    id: String,
    symbol: String,
    name: String,
    #[serde(default)]
    market_cap_rank: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CoinDetailResponse {
    id: String,
    symbol: String,
    name: String,
    #[serde(default)]
    market_cap_rank: Option<u32>,
    #[serde(default)]
    links: Option<CoinLinks>,
    market_data: Option<CoinMarketData>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CoinLinks {
    #[serde(default)]
    homepage: Vec<String>,
}

/// Per-currency maps; CoinGecko sends `null` for values it lacks
type CurrencyMap = HashMap<String, Option<f64>>;

#[derive(Debug, Deserialize)]
struct CoinMarketData {
    #[serde(default)]
    current_price: CurrencyMap,
    #[serde(default)]
    market_cap: CurrencyMap,
    #[serde(default)]
    total_volume: CurrencyMap,
    #[serde(default)]
    high_24h: CurrencyMap,
    #[serde(default)]
    low_24h: CurrencyMap,
    #[serde(default)]
    ath: CurrencyMap,
    #[serde(default)]
    price_change_percentage_24h: Option<f64>,
    #[serde(default)]
    circulating_supply: Option<f64>,
    #[serde(default)]
    total_supply: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct GlobalResponse {
    data: GlobalData,
}

#[derive(Debug, Deserialize)]
struct GlobalData {
    #[serde(default)]
    total_market_cap: CurrencyMap,
    #[serde(default)]
    total_volume: CurrencyMap,
    #[serde(default)]
    market_cap_percentage: HashMap<String, f64>,
    #[serde(default)]
    market_cap_change_percentage_24h_usd: Option<f64>,
    #[serde(default)]
    updated_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MarketChartResponse {
    #[serde(default)]
    prices: Vec<(f64, f64)>,
    #[serde(default)]
    market_caps: Vec<(f64, f64)>,
    #[serde(default)]
    total_volumes: Vec<(f64, f64)>,
}

fn lookup(map: &CurrencyMap, currency: &str) -> Option<f64> {
    map.get(currency).copied().flatten()
}

fn from_millis(ms: f64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms as i64).unwrap_or_else(Utc::now)
}

/// Ids go into URL paths; anything outside CoinGecko's id alphabet cannot exist.
fn path_id(id: &CoinId) -> ProviderResult<&str> {
    let s = id.as_str();
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
    {
        Ok(s)
    } else {
        Err(ProviderError::NotFound(format!("coin '{}'", s)))
    }
}

#[async_trait]
impl SpotProvider for CoinGeckoClient {
    fn name(&self) -> &str {
        "coingecko"
    }

    async fn prices(
        &self,
        ids: &[CoinId],
        currencies: &[String],
    ) -> ProviderResult<Vec<MarketSnapshot>> {
        if ids.is_empty() || currencies.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids.iter().map(CoinId::as_str).collect::<Vec<_>>().join(",");
        let vs_currencies = currencies.join(",");

        let response: SimplePriceResponse = self
            .transport
            .get_json(
                "simple/price",
                &[
                    ("ids", joined.as_str()),
                    ("vs_currencies", vs_currencies.as_str()),
                    ("include_market_cap", "true"),
                    ("include_24hr_vol", "true"),
                    ("include_24hr_change", "true"),
                    ("include_last_updated_at", "true"),
                ],
            )
            .await?;

        let now = Utc::now();
        let mut snapshots = Vec::with_capacity(ids.len() * currencies.len());
        for id in ids {
            let Some(fields) = response.get(id.as_str()) else {
                continue;
            };
            let as_of = lookup(fields, "last_updated_at")
                .and_then(|ts| DateTime::from_timestamp(ts as i64, 0))
                .unwrap_or(now);

            for currency in currencies {
                let Some(price) = lookup(fields, currency) else {
                    continue;
                };
                let mut snapshot = MarketSnapshot::new(id.as_str(), price, currency, as_of);
                snapshot.market_cap = lookup(fields, &format!("{}_market_cap", currency));
                snapshot.volume_24h = lookup(fields, &format!("{}_24h_vol", currency));
                snapshot.change_24h = lookup(fields, &format!("{}_24h_change", currency));
                snapshots.push(snapshot);
            }
        }
        Ok(snapshots)
    }

    async fn trending(&self) -> ProviderResult<Vec<MarketSnapshot>> {
        let response: TrendingResponse = self.transport.get_json("search/trending", NO_QUERY).await?;

        let now = Utc::now();
        Ok(response
            .coins
            .into_iter()
            .filter_map(|coin| {
                let item = coin.item;
                let Some(price_btc) = item.price_btc else {
                    tracing::debug!(coin = %item.id, "Trending coin without a btc price, skipping");
                    return None;
                };
                let mut snapshot = MarketSnapshot::new(item.id, price_btc, "btc", now);
                snapshot.symbol = Some(item.symbol.to_uppercase());
                snapshot.name = Some(item.name);
                snapshot.rank = item.market_cap_rank;
                Some(snapshot)
            })
            .collect())
    }

    async fn coin_detail(&self, id: &CoinId, currency: &str) -> ProviderResult<MarketSnapshot> {
        let path = format!("coins/{}", path_id(id)?);
        let detail: CoinDetailResponse = self
            .transport
            .get_json(
                &path,
                &[
                    ("localization", "false"),
                    ("tickers", "false"),
                    ("market_data", "true"),
                    ("community_data", "false"),
                    ("developer_data", "false"),
                    ("sparkline", "false"),
                ],
            )
            .await?;

        let data = detail.market_data.ok_or_else(|| {
            ProviderError::InvalidResponse(format!("coin '{}' has no market data", detail.id))
        })?;
        let price = lookup(&data.current_price, currency).ok_or_else(|| {
            ProviderError::NotFound(format!("no {} price for '{}'", currency, detail.id))
        })?;

        let mut snapshot = MarketSnapshot::new(
            detail.id,
            price,
            currency,
            detail.last_updated.unwrap_or_else(Utc::now),
        );
        snapshot.symbol = Some(detail.symbol.to_uppercase());
        snapshot.name = Some(detail.name);
        snapshot.rank = detail.market_cap_rank;
        snapshot.market_cap = lookup(&data.market_cap, currency);
        snapshot.volume_24h = lookup(&data.total_volume, currency);
        snapshot.high_24h = lookup(&data.high_24h, currency);
        snapshot.low_24h = lookup(&data.low_24h, currency);
        snapshot.ath = lookup(&data.ath, currency);
        snapshot.change_24h = data.price_change_percentage_24h;
        snapshot.circulating_supply = data.circulating_supply;
        snapshot.total_supply = data.total_supply;
        snapshot.homepage = detail
            .links
            .and_then(|links| links.homepage.into_iter().find(|url| !url.trim().is_empty()));
        Ok(snapshot)
    }

    async fn global(&self, currency: &str) -> ProviderResult<MarketSnapshot> {
        let response: GlobalResponse = self.transport.get_json("global", NO_QUERY).await?;
        let data = response.data;

        let total = lookup(&data.total_market_cap, currency).ok_or_else(|| {
            ProviderError::NotFound(format!("no global market cap in {}", currency))
        })?;
        let as_of = data
            .updated_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(Utc::now);

        let mut snapshot = MarketSnapshot::new("global", total, currency, as_of);
        snapshot.market_cap = Some(total);
        snapshot.volume_24h = lookup(&data.total_volume, currency);
        snapshot.change_24h = data.market_cap_change_percentage_24h_usd;
        snapshot.dominance = data.market_cap_percentage.into_iter().collect::<BTreeMap<_, _>>();
        Ok(snapshot)
    }

    async fn search(&self, query: &str) -> ProviderResult<Vec<CoinIdentifier>> {
        let response: SearchResponse = self.transport.get_json("search", &[("query", query)]).await?;

        Ok(response
            .coins
            .into_iter()
            .map(|coin| CoinIdentifier {
                id: CoinId::new(coin.id),
                symbol: coin.symbol,
                name: coin.name,
                market_cap_rank: coin.market_cap_rank,
            })
            .collect())
    }

    async fn market_chart(
        &self,
        id: &CoinId,
        currency: &str,
        days: u32,
    ) -> ProviderResult<Vec<MarketSnapshot>> {
        let path = format!("coins/{}/market_chart", path_id(id)?);
        let days = days.to_string();
        let chart: MarketChartResponse = self
            .transport
            .get_json(&path, &[("vs_currency", currency), ("days", days.as_str())])
            .await?;

        Ok(chart
            .prices
            .iter()
            .enumerate()
            .map(|(i, (ts, price))| {
                let mut point = MarketSnapshot::new(id.as_str(), *price, currency, from_millis(*ts));
                point.market_cap = chart.market_caps.get(i).map(|(_, v)| *v);
                point.volume_24h = chart.total_volumes.get(i).map(|(_, v)| *v);
                point
            })
            .collect())
    }
}
