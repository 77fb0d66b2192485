use crate::error::{ErrorBody, ToolError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical coin identifier on the spot provider (e.g. `bitcoin`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoinId(pub String);

impl CoinId {
    /// Trim and lowercase user input into the provider's id form
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CoinId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A coin as returned by a search/lookup call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinIdentifier {
    pub id: CoinId,
    pub symbol: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_cap_rank: Option<u32>,
}

/// Normalized spot market record shared by every spot tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub coin_id: String,
    pub price: f64,
    pub currency: String,
    pub as_of: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_24h: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_24h: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_24h: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_24h: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circulating_supply: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_supply: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ath: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    /// Market-cap share per asset, only set on the `global` pseudo-coin
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dominance: BTreeMap<String, f64>,
}

impl MarketSnapshot {
    pub fn new(coin_id: impl Into<String>, price: f64, currency: impl Into<String>, as_of: DateTime<Utc>) -> Self {
        Self {
            coin_id: coin_id.into(),
            price,
            currency: currency.into(),
            as_of,
            market_cap: None,
            volume_24h: None,
            change_24h: None,
            rank: None,
            symbol: None,
            name: None,
            high_24h: None,
            low_24h: None,
            circulating_supply: None,
            total_supply: None,
            ath: None,
            homepage: None,
            dominance: BTreeMap::new(),
        }
    }

    /// Fill identity fields the price endpoint does not return
    pub fn with_identity(mut self, identifier: &CoinIdentifier) -> Self {
        if self.symbol.is_none() {
            self.symbol = Some(identifier.symbol.to_uppercase());
        }
        if self.name.is_none() {
            self.name = Some(identifier.name.clone());
        }
        if self.rank.is_none() {
            self.rank = identifier.market_cap_rank;
        }
        self
    }
}

/// Per-exchange slice of derivatives activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeBreakdown {
    pub exchange: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_interest: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

impl ExchangeBreakdown {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            open_interest: None,
            long_ratio: None,
            short_ratio: None,
            volume: None,
            amount: None,
        }
    }

    /// Overlay the fields `other` has on top of `self`
    pub fn merge(&mut self, other: &ExchangeBreakdown) {
        self.open_interest = other.open_interest.or(self.open_interest);
        self.long_ratio = other.long_ratio.or(self.long_ratio);
        self.short_ratio = other.short_ratio.or(self.short_ratio);
        self.volume = other.volume.or(self.volume);
        self.amount = other.amount.or(self.amount);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ohlc {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Static trading rules of a perpetual contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractSpecs {
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_leverage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maker_fee_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taker_fee_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_trade_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funding_interval_hours: Option<f64>,
}

/// Normalized derivatives record shared by every contract tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractSnapshot {
    pub coin_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_interest: Option<f64>,
    #[serde(default)]
    pub positions: Vec<ExchangeBreakdown>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    pub as_of: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funding_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ohlc: Option<Ohlc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specs: Option<ContractSpecs>,
}

impl ContractSnapshot {
    pub fn new(coin_id: impl Into<String>, as_of: DateTime<Utc>) -> Self {
        Self {
            coin_id: coin_id.into(),
            open_interest: None,
            positions: Vec::new(),
            volume: None,
            amount: None,
            timeframe: None,
            as_of,
            last_price: None,
            mark_price: None,
            funding_rate: None,
            ohlc: None,
            specs: None,
        }
    }

    /// Merge a breakdown into `positions`, keyed by exchange name
    pub fn upsert_position(&mut self, breakdown: &ExchangeBreakdown) {
        match self
            .positions
            .iter_mut()
            .find(|p| p.exchange.eq_ignore_ascii_case(&breakdown.exchange))
        {
            Some(existing) => existing.merge(breakdown),
            None => self.positions.push(breakdown.clone()),
        }
    }
}

/// Error marker standing in for a batch item that could not be resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub coin_id: String,
    pub error: ErrorBody,
}

/// One slot of a batch result, in input order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchEntry {
    Snapshot(MarketSnapshot),
    Failed(BatchFailure),
}

impl BatchEntry {
    pub fn failed(coin_id: impl Into<String>, error: &ToolError) -> Self {
        Self::Failed(BatchFailure {
            coin_id: coin_id.into(),
            error: error.to_body(),
        })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Candle / sampling interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

impl Interval {
    pub const ALL: [Interval; 11] = [
        Interval::M1,
        Interval::M3,
        Interval::M5,
        Interval::M15,
        Interval::M30,
        Interval::H1,
        Interval::H4,
        Interval::H6,
        Interval::H12,
        Interval::D1,
        Interval::W1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M3 => "3m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H4 => "4h",
            Interval::H6 => "6h",
            Interval::H12 => "12h",
            Interval::D1 => "1d",
            Interval::W1 => "1w",
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Interval {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Interval::ALL
            .into_iter()
            .find(|i| i.as_str() == normalized)
            .ok_or_else(|| {
                ToolError::invalid_argument(format!(
                    "unsupported interval '{}', expected one of: {}",
                    s,
                    Interval::ALL.map(|i| i.as_str()).join(", ")
                ))
            })
    }
}

/// Which price series a candle request reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KlineType {
    Market,
    Mark,
    Index,
}

impl KlineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KlineType::Market => "MARKET",
            KlineType::Mark => "MARK",
            KlineType::Index => "INDEX",
        }
    }
}

impl std::str::FromStr for KlineType {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MARKET" => Ok(KlineType::Market),
            "MARK" => Ok(KlineType::Mark),
            "INDEX" => Ok(KlineType::Index),
            _ => Err(ToolError::invalid_argument(format!(
                "unsupported k_line_type '{}', expected MARKET, MARK or INDEX",
                s
            ))),
        }
    }
}

/// Candle request against the contract provider
#[derive(Debug, Clone, PartialEq)]
pub struct CandleQuery {
    pub symbol: String,
    pub interval: Interval,
    pub limit: u32,
    pub kline_type: KlineType,
}
