// Perpetual contract tools

use crate::tools::{
    symbol_param, CatalogTool, OutputShape, ParamSpec, ParamType, ToolArgs, ToolHandler,
    ToolOutput, ToolSpec,
};
use coinlens_core::error::ToolResult;
use coinlens_core::market::{MarketService, MAX_CANDLE_LIMIT, POSITION_PERIODS};
use coinlens_core::types::{Interval, KlineType};
use std::sync::Arc;

/// Ticker and trading rules of a contract
pub struct ContractInfoTool {
    market: Arc<MarketService>,
}

impl ContractInfoTool {
    pub fn new(market: Arc<MarketService>) -> Self {
        Self { market }
    }
}

impl CatalogTool for ContractInfoTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "get_contract_info",
            "Get last/mark price, funding rate, 24h stats and trading rules of a perpetual contract",
            OutputShape::ContractSnapshot,
        )
        .param(symbol_param())
    }
}

#[async_trait::async_trait]
impl ToolHandler for ContractInfoTool {
    async fn call(&self, args: ToolArgs) -> ToolResult<ToolOutput> {
        let snapshot = self
            .market
            .contract_info(args.required_str("symbol")?)
            .await?;
        ToolOutput::new(&snapshot)
    }
}

/// Candles of a contract
pub struct KLineTool {
    market: Arc<MarketService>,
}

impl KLineTool {
    pub fn new(market: Arc<MarketService>) -> Self {
        Self { market }
    }
}

impl CatalogTool for KLineTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "get_k_line_data",
            "Get OHLC candles and volume of a perpetual contract",
            OutputShape::ContractSnapshotList,
        )
        .param(symbol_param())
        .param(
            ParamSpec::optional("granularity", ParamType::String, "Candle interval")
                .with_default(Interval::H1.as_str())
                .with_choices(Interval::ALL.map(|i| i.as_str())),
        )
        .param(
            ParamSpec::optional("limit", ParamType::Integer, "Number of candles")
                .with_default(100)
                .with_range(1, i64::from(MAX_CANDLE_LIMIT)),
        )
        .param(
            ParamSpec::optional("k_line_type", ParamType::String, "Price series to read")
                .with_default(KlineType::Market.as_str())
                .with_choices([KlineType::Market, KlineType::Mark, KlineType::Index].map(|k| k.as_str())),
        )
    }
}

#[async_trait::async_trait]
impl ToolHandler for KLineTool {
    async fn call(&self, args: ToolArgs) -> ToolResult<ToolOutput> {
        let interval: Interval = args.required_str("granularity")?.parse()?;
        let kline_type: KlineType = args.required_str("k_line_type")?.parse()?;

        let candles = self
            .market
            .contract_candles(
                args.required_str("symbol")?,
                interval,
                args.u32("limit")?,
                kline_type,
            )
            .await?;
        ToolOutput::new(&candles)
    }
}

/// Open interest and long/short ratio by exchange
pub struct ContractPositionsTool {
    market: Arc<MarketService>,
}

impl ContractPositionsTool {
    pub fn new(market: Arc<MarketService>) -> Self {
        Self { market }
    }
}

impl CatalogTool for ContractPositionsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "get_contract_positions",
            "Get open interest and the long/short account ratio of a perpetual contract",
            OutputShape::ContractSnapshot,
        )
        .param(symbol_param())
        .param(
            ParamSpec::optional("period", ParamType::String, "Sampling period of the ratio")
                .with_default(Interval::H1.as_str())
                .with_choices(POSITION_PERIODS.map(|p| p.as_str())),
        )
    }
}

#[async_trait::async_trait]
impl ToolHandler for ContractPositionsTool {
    async fn call(&self, args: ToolArgs) -> ToolResult<ToolOutput> {
        let period: Interval = args.required_str("period")?.parse()?;
        let snapshot = self
            .market
            .contract_positions(args.required_str("symbol")?, period)
            .await?;
        ToolOutput::new(&snapshot)
    }
}

pub struct ContractVolumeTool {
    market: Arc<MarketService>,
}

impl ContractVolumeTool {
    pub fn new(market: Arc<MarketService>) -> Self {
        Self { market }
    }
}

impl CatalogTool for ContractVolumeTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "get_contract_volume",
            "Get 24h traded volume and amount of a perpetual contract",
            OutputShape::ContractSnapshot,
        )
        .param(symbol_param())
    }
}

#[async_trait::async_trait]
impl ToolHandler for ContractVolumeTool {
    async fn call(&self, args: ToolArgs) -> ToolResult<ToolOutput> {
        let snapshot = self
            .market
            .contract_volume(args.required_str("symbol")?)
            .await?;
        ToolOutput::new(&snapshot)
    }
}
