//! Bitget v2 futures (mix) market client.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::transport::HttpTransport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coinlens_core::error::{ProviderError, ProviderResult};
use coinlens_core::provider::ContractProvider;
use coinlens_core::types::{
    CandleQuery, ContractSnapshot, ContractSpecs, ExchangeBreakdown, Interval, Ohlc,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;

const SUCCESS_CODE: &str = "00000";

/// Error codes Bitget uses for symbols it does not list
const UNKNOWN_SYMBOL_CODES: [&str; 2] = ["40034", "40019"];

/// Contract provider backed by Bitget's public market endpoints.
#[derive(Debug, Clone)]
pub struct BitgetClient {
    transport: HttpTransport,
    product_type: String,
    exchange: String,
}

impl BitgetClient {
    pub fn new(
        config: ClientConfig,
        product_type: impl Into<String>,
        exchange: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            transport: HttpTransport::new(Arc::new(config))?,
            product_type: product_type.into(),
            exchange: exchange.into(),
        })
    }

    /// GET a market endpoint and unwrap the `{code, msg, data}` envelope.
    async fn market<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> ProviderResult<T> {
        let path = format!("api/v2/mix/market/{}", endpoint);
        let mut query: Vec<(&str, &str)> = vec![("productType", self.product_type.as_str())];
        query.extend_from_slice(params);

        let envelope: Envelope<T> = self.transport.get_json(&path, query.as_slice()).await?;
        envelope.into_data(endpoint)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self, endpoint: &str) -> ProviderResult<T> {
        if self.code != SUCCESS_CODE {
            let message = format!("{} returned code {}: {}", endpoint, self.code, self.msg);
            return Err(if UNKNOWN_SYMBOL_CODES.contains(&self.code.as_str()) {
                ProviderError::NotFound(message)
            } else {
                ProviderError::InvalidResponse(message)
            });
        }
        self.data
            .ok_or_else(|| ProviderError::InvalidResponse(format!("{} returned no data", endpoint)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerData {
    symbol: String,
    last_pr: String,
    #[serde(default)]
    mark_price: Option<String>,
    #[serde(default)]
    funding_rate: Option<String>,
    #[serde(default)]
    base_volume: Option<String>,
    #[serde(default)]
    quote_volume: Option<String>,
    #[serde(default)]
    holding_amount: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractData {
    symbol: String,
    base_coin: String,
    quote_coin: String,
    #[serde(default)]
    symbol_status: Option<String>,
    #[serde(default)]
    max_lever: Option<String>,
    #[serde(default)]
    maker_fee_rate: Option<String>,
    #[serde(default)]
    taker_fee_rate: Option<String>,
    #[serde(default)]
    min_trade_num: Option<String>,
    #[serde(default)]
    fund_interval: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenInterestData {
    #[serde(default)]
    open_interest_list: Vec<OpenInterestEntry>,
    #[serde(default)]
    ts: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenInterestEntry {
    symbol: String,
    size: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRatioData {
    long_position_ratio: String,
    short_position_ratio: String,
    ts: String,
}

/// Bitget sends numbers as strings, with `""` for absent values.
fn opt_num(value: Option<&str>) -> Option<f64> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
}

fn num(field: &str, value: &str) -> ProviderResult<f64> {
    value.trim().parse().map_err(|_| {
        ProviderError::InvalidResponse(format!("{} is not a number: '{}'", field, value))
    })
}

fn timestamp(ms: Option<&str>) -> DateTime<Utc> {
    ms.and_then(|s| s.trim().parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

/// Bitget candle granularity for an interval (`1h` -> `1H`)
pub fn granularity(interval: Interval) -> &'static str {
    match interval {
        Interval::M1 => "1m",
        Interval::M3 => "3m",
        Interval::M5 => "5m",
        Interval::M15 => "15m",
        Interval::M30 => "30m",
        Interval::H1 => "1H",
        Interval::H4 => "4H",
        Interval::H6 => "6H",
        Interval::H12 => "12H",
        Interval::D1 => "1D",
        Interval::W1 => "1W",
    }
}

fn parse_candle(symbol: &str, row: &[String]) -> ProviderResult<ContractSnapshot> {
    if row.len() < 6 {
        return Err(ProviderError::InvalidResponse(format!(
            "candle row has {} fields, expected at least 6",
            row.len()
        )));
    }

    let mut candle = ContractSnapshot::new(symbol, timestamp(Some(row[0].as_str())));
    candle.ohlc = Some(Ohlc {
        open: num("open", &row[1])?,
        high: num("high", &row[2])?,
        low: num("low", &row[3])?,
        close: num("close", &row[4])?,
    });
    candle.volume = opt_num(Some(row[5].as_str()));
    candle.amount = opt_num(row.get(6).map(String::as_str));
    candle.last_price = candle.ohlc.map(|ohlc| ohlc.close);
    Ok(candle)
}

#[async_trait]
impl ContractProvider for BitgetClient {
    fn name(&self) -> &str {
        &self.exchange
    }

    async fn ticker(&self, symbol: &str) -> ProviderResult<ContractSnapshot> {
        let tickers: Vec<TickerData> = self.market("ticker", &[("symbol", symbol)]).await?;
        let ticker = tickers
            .into_iter()
            .find(|t| t.symbol.eq_ignore_ascii_case(symbol))
            .ok_or_else(|| ProviderError::NotFound(format!("contract '{}'", symbol)))?;

        let mut breakdown = ExchangeBreakdown::new(&self.exchange);
        breakdown.volume = opt_num(ticker.base_volume.as_deref());
        breakdown.amount = opt_num(ticker.quote_volume.as_deref());
        breakdown.open_interest = opt_num(ticker.holding_amount.as_deref());

        let mut snapshot = ContractSnapshot::new(ticker.symbol, timestamp(ticker.ts.as_deref()));
        snapshot.last_price = Some(num("lastPr", &ticker.last_pr)?);
        snapshot.mark_price = opt_num(ticker.mark_price.as_deref());
        snapshot.funding_rate = opt_num(ticker.funding_rate.as_deref());
        snapshot.volume = breakdown.volume;
        snapshot.amount = breakdown.amount;
        snapshot.open_interest = breakdown.open_interest;
        snapshot.positions.push(breakdown);
        Ok(snapshot)
    }

    async fn specs(&self, symbol: &str) -> ProviderResult<ContractSpecs> {
        let contracts: Vec<ContractData> = self.market("contracts", &[("symbol", symbol)]).await?;
        let contract = contracts
            .into_iter()
            .find(|c| c.symbol.eq_ignore_ascii_case(symbol))
            .ok_or_else(|| ProviderError::NotFound(format!("contract '{}'", symbol)))?;

        Ok(ContractSpecs {
            base_asset: contract.base_coin,
            quote_asset: contract.quote_coin,
            status: contract.symbol_status,
            max_leverage: opt_num(contract.max_lever.as_deref()),
            maker_fee_rate: opt_num(contract.maker_fee_rate.as_deref()),
            taker_fee_rate: opt_num(contract.taker_fee_rate.as_deref()),
            min_trade_size: opt_num(contract.min_trade_num.as_deref()),
            funding_interval_hours: opt_num(contract.fund_interval.as_deref()),
        })
    }

    async fn candles(&self, query: &CandleQuery) -> ProviderResult<Vec<ContractSnapshot>> {
        let limit = query.limit.to_string();
        let rows: Vec<Vec<String>> = self
            .market(
                "candles",
                &[
                    ("symbol", query.symbol.as_str()),
                    ("granularity", granularity(query.interval)),
                    ("limit", limit.as_str()),
                    ("kLineType", query.kline_type.as_str()),
                ],
            )
            .await?;

        let mut candles = rows
            .iter()
            .map(|row| parse_candle(&query.symbol, row))
            .collect::<ProviderResult<Vec<_>>>()?;
        candles.sort_by_key(|c| c.as_of);
        Ok(candles)
    }

    async fn open_interest(&self, symbol: &str) -> ProviderResult<ContractSnapshot> {
        let data: OpenInterestData = self.market("open-interest", &[("symbol", symbol)]).await?;
        let entry = data
            .open_interest_list
            .iter()
            .find(|e| e.symbol.eq_ignore_ascii_case(symbol))
            .ok_or_else(|| ProviderError::NotFound(format!("contract '{}'", symbol)))?;
        let size = num("size", &entry.size)?;

        let mut breakdown = ExchangeBreakdown::new(&self.exchange);
        breakdown.open_interest = Some(size);

        let mut snapshot = ContractSnapshot::new(entry.symbol.clone(), timestamp(data.ts.as_deref()));
        snapshot.open_interest = Some(size);
        snapshot.positions.push(breakdown);
        Ok(snapshot)
    }

    async fn position_ratio(
        &self,
        symbol: &str,
        period: Interval,
    ) -> ProviderResult<Vec<ExchangeBreakdown>> {
        let rows: Vec<PositionRatioData> = self
            .market(
                "position-long-short",
                &[("symbol", symbol), ("period", period.as_str())],
            )
            .await?;

        let Some(latest) = rows
            .iter()
            .max_by_key(|row| row.ts.trim().parse::<i64>().unwrap_or_default())
        else {
            return Ok(Vec::new());
        };

        let mut breakdown = ExchangeBreakdown::new(&self.exchange);
        breakdown.long_ratio = Some(num("longPositionRatio", &latest.long_position_ratio)?);
        breakdown.short_ratio = Some(num("shortPositionRatio", &latest.short_position_ratio)?);
        Ok(vec![breakdown])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use coinlens_core::error::ErrorKind;
    use coinlens_core::types::KlineType;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> BitgetClient {
        let mut config = ClientConfig::new(&server.uri()).unwrap();
        config.retry_config = RetryConfig::no_retry();
        BitgetClient::new(config, "USDT-FUTURES", "bitget").unwrap()
    }

    fn ok(data: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "code": "00000",
            "msg": "success",
            "requestTime": 1700000000000u64,
            "data": data
        }))
    }

    #[tokio::test]
    async fn test_ticker_parses_string_numbers() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v2/mix/market/ticker"))
            .and(query_param("symbol", "BTCUSDT"))
            .and(query_param("productType", "USDT-FUTURES"))
            .respond_with(ok(json!([{
                "symbol": "BTCUSDT",
                "lastPr": "65000.5",
                "markPrice": "65001",
                "indexPrice": "64990",
                "fundingRate": "0.0001",
                "baseVolume": "12345.6",
                "quoteVolume": "802000000",
                "holdingAmount": "",
                "ts": "1700000000000"
            }])))
            .expect(1)
            .mount(&server)
            .await;

        let ticker = client(&server).ticker("BTCUSDT").await.unwrap();
        assert_eq!(ticker.coin_id, "BTCUSDT");
        assert_eq!(ticker.last_price, Some(65000.5));
        assert_eq!(ticker.funding_rate, Some(0.0001));
        assert_eq!(ticker.volume, Some(12345.6));
        assert_eq!(ticker.open_interest, None);
        assert_eq!(ticker.positions[0].exchange, "bitget");
        assert_eq!(ticker.as_of.timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn test_unknown_symbol_code_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v2/mix/market/ticker"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "40034",
                "msg": "Parameter BTCXUSDT does not exist",
                "data": null
            })))
            .mount(&server)
            .await;

        let err = client(&server).ticker("BTCXUSDT").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_other_error_code_is_invalid_response() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v2/mix/market/contracts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "40808",
                "msg": "Parameter verification exception",
                "data": null
            })))
            .mount(&server)
            .await;

        let err = client(&server).specs("BTCUSDT").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidResponse);
    }

    #[tokio::test]
    async fn test_specs() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v2/mix/market/contracts"))
            .respond_with(ok(json!([{
                "symbol": "ETHUSDT",
                "baseCoin": "ETH",
                "quoteCoin": "USDT",
                "makerFeeRate": "0.0002",
                "takerFeeRate": "0.0006",
                "minTradeNum": "0.01",
                "symbolStatus": "normal",
                "maxLever": "100",
                "fundInterval": "8"
            }])))
            .mount(&server)
            .await;

        let specs = client(&server).specs("ETHUSDT").await.unwrap();
        assert_eq!(specs.base_asset, "ETH");
        assert_eq!(specs.max_leverage, Some(100.0));
        assert_eq!(specs.funding_interval_hours, Some(8.0));
    }

    #[tokio::test]
    async fn test_candles_map_granularity_and_sort() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v2/mix/market/candles"))
            .and(query_param("granularity", "4H"))
            .and(query_param("limit", "2"))
            .and(query_param("kLineType", "MARK"))
            .respond_with(ok(json!([
                ["1700014400000", "101", "103", "100", "102", "20", "2040"],
                ["1700000000000", "100", "102", "99", "101", "10", "1010"]
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let query = CandleQuery {
            symbol: "BTCUSDT".to_string(),
            interval: Interval::H4,
            limit: 2,
            kline_type: KlineType::Mark,
        };
        let candles = client(&server).candles(&query).await.unwrap();

        assert_eq!(candles.len(), 2);
        assert!(candles[0].as_of < candles[1].as_of);
        assert_eq!(candles[0].ohlc.unwrap().open, 100.0);
        assert_eq!(candles[1].amount, Some(2040.0));
    }

    #[tokio::test]
    async fn test_malformed_candle_is_invalid_response() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v2/mix/market/candles"))
            .respond_with(ok(json!([["1700000000000", "abc", "1", "1", "1", "1"]])))
            .mount(&server)
            .await;

        let query = CandleQuery {
            symbol: "BTCUSDT".to_string(),
            interval: Interval::H1,
            limit: 1,
            kline_type: KlineType::Market,
        };
        let err = client(&server).candles(&query).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidResponse);
    }

    #[tokio::test]
    async fn test_open_interest() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v2/mix/market/open-interest"))
            .respond_with(ok(json!({
                "openInterestList": [{"symbol": "BTCUSDT", "size": "34278.06"}],
                "ts": "1700000000000"
            })))
            .mount(&server)
            .await;

        let snapshot = client(&server).open_interest("BTCUSDT").await.unwrap();
        assert_eq!(snapshot.open_interest, Some(34278.06));
        assert_eq!(snapshot.positions[0].open_interest, Some(34278.06));
    }

    #[tokio::test]
    async fn test_position_ratio_takes_latest_bucket() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v2/mix/market/position-long-short"))
            .and(query_param("period", "1h"))
            .respond_with(ok(json!([
                {"longPositionRatio": "0.52", "shortPositionRatio": "0.48", "longShortPositionRatio": "1.08", "ts": "1700003600000"},
                {"longPositionRatio": "0.50", "shortPositionRatio": "0.50", "longShortPositionRatio": "1", "ts": "1700000000000"}
            ])))
            .mount(&server)
            .await;

        let ratios = client(&server)
            .position_ratio("BTCUSDT", Interval::H1)
            .await
            .unwrap();
        assert_eq!(ratios.len(), 1);
        assert_eq!(ratios[0].long_ratio, Some(0.52));
        assert_eq!(ratios[0].short_ratio, Some(0.48));
    }

    #[test]
    fn test_granularity_mapping() {
        assert_eq!(granularity(Interval::M15), "15m");
        assert_eq!(granularity(Interval::H1), "1H");
        assert_eq!(granularity(Interval::D1), "1D");
        assert_eq!(granularity(Interval::W1), "1W");
    }
}
