use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration, loaded from TOML and then environment overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(skip)]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub market: MarketConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub spot: SpotConfig,

    #[serde(default)]
    pub contract: ContractConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Currency used when a tool call omits one
    #[serde(default = "default_currency")]
    pub default_currency: String,

    /// Quote asset appended to bare contract symbols (`btc` -> `BTCUSDT`)
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,

    /// Upper bound on concurrent upstream calls within one batch invocation
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_common_coins")]
    pub common_coins: Vec<String>,
}

fn default_currency() -> String {
    "cny".to_string()
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_max_concurrency() -> usize {
    4
}

fn default_common_coins() -> Vec<String> {
    [
        "bitcoin",
        "ethereum",
        "tether",
        "binancecoin",
        "ripple",
        "cardano",
        "dogecoin",
        "solana",
        "polkadot",
        "litecoin",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            default_currency: default_currency(),
            quote_asset: default_quote_asset(),
            max_concurrency: default_max_concurrency(),
            common_coins: default_common_coins(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Redb,
    Memory,
}

impl std::str::FromStr for CacheBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "redb" => Ok(CacheBackend::Redb),
            "memory" => Ok(CacheBackend::Memory),
            other => anyhow::bail!("Unknown cache backend: {}", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_backend")]
    pub backend: CacheBackend,

    /// Cache file, relative to the data directory
    #[serde(default = "default_cache_path")]
    pub path: String,

    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_cache_backend() -> CacheBackend {
    CacheBackend::Redb
}

fn default_cache_path() -> String {
    "cache/coinlens.redb".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    30 * 60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            backend: default_cache_backend(),
            path: default_cache_path(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Upper bound for a single outbound request
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("coinlens/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts per upstream call, first try included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotConfig {
    #[serde(default = "default_spot_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_spot_api_key_header")]
    pub api_key_header: String,
}

fn default_spot_base_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}

fn default_spot_api_key_header() -> String {
    "x-cg-demo-api-key".to_string()
}

impl Default for SpotConfig {
    fn default() -> Self {
        Self {
            base_url: default_spot_base_url(),
            api_key: None,
            api_key_header: default_spot_api_key_header(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractConfig {
    #[serde(default = "default_contract_base_url")]
    pub base_url: String,

    #[serde(default = "default_product_type")]
    pub product_type: String,

    /// Exchange name reported in per-exchange breakdowns
    #[serde(default = "default_exchange")]
    pub exchange: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_contract_api_key_header")]
    pub api_key_header: String,
}

fn default_contract_base_url() -> String {
    "https://api.bitget.com".to_string()
}

fn default_product_type() -> String {
    "USDT-FUTURES".to_string()
}

fn default_exchange() -> String {
    "bitget".to_string()
}

fn default_contract_api_key_header() -> String {
    "ACCESS-KEY".to_string()
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            base_url: default_contract_base_url(),
            product_type: default_product_type(),
            exchange: default_exchange(),
            api_key: None,
            api_key_header: default_contract_api_key_header(),
        }
    }
}

impl AppConfig {
    pub fn load(config_path: &Path, data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        // Load config file if it exists, otherwise use defaults
        let mut config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")?
        } else {
            tracing::info!("Configuration file not found, using defaults");
            Self::default()
        };

        config.data_dir = data_dir;
        config.apply_overrides(|key| std::env::var(key).ok())?;

        Ok(config)
    }

    /// Apply `COINLENS_*` overrides from `lookup` (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("COINLENS_DEFAULT_CURRENCY") {
            self.market.default_currency = v.trim().to_lowercase();
        }
        if let Some(v) = lookup("COINLENS_CACHE_TTL_SECS") {
            self.cache.ttl_secs = v
                .trim()
                .parse()
                .context("COINLENS_CACHE_TTL_SECS must be a number of seconds")?;
        }
        if let Some(v) = lookup("COINLENS_CACHE_BACKEND") {
            self.cache.backend = v.parse()?;
        }
        if let Some(v) = lookup("COINLENS_TIMEOUT_SECS") {
            self.http.timeout_secs = v
                .trim()
                .parse()
                .context("COINLENS_TIMEOUT_SECS must be a number of seconds")?;
        }
        if let Some(v) = lookup("COINLENS_MAX_ATTEMPTS") {
            self.retry.max_attempts = v
                .trim()
                .parse()
                .context("COINLENS_MAX_ATTEMPTS must be a positive integer")?;
        }
        if let Some(v) = lookup("COINLENS_SPOT_BASE_URL") {
            self.spot.base_url = v;
        }
        if let Some(v) = lookup("COINLENS_SPOT_API_KEY") {
            self.spot.api_key = Some(v);
        }
        if let Some(v) = lookup("COINLENS_CONTRACT_BASE_URL") {
            self.contract.base_url = v;
        }
        if let Some(v) = lookup("COINLENS_CONTRACT_API_KEY") {
            self.contract.api_key = Some(v);
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }

        Ok(())
    }

    /// Get the cache file path
    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(&self.cache.path)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();

        assert_eq!(config.market.default_currency, "cny");
        assert_eq!(config.market.common_coins.len(), 10);
        assert_eq!(config.cache.ttl_secs, 1800);
        assert_eq!(config.cache.backend, CacheBackend::Redb);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.contract.product_type, "USDT-FUTURES");
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [market]
            default_currency = "usd"

            [cache]
            backend = "memory"
            ttl_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.market.default_currency, "usd");
        assert_eq!(config.market.quote_asset, "USDT");
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.http.timeout_secs, 30);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("COINLENS_DEFAULT_CURRENCY", "EUR"),
            ("COINLENS_CACHE_TTL_SECS", "5"),
            ("COINLENS_SPOT_API_KEY", "cg-key"),
            ("COINLENS_MAX_ATTEMPTS", "5"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.market.default_currency, "eur");
        assert_eq!(config.cache.ttl_secs, 5);
        assert_eq!(config.spot.api_key.as_deref(), Some("cg-key"));
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_bad_numeric_override_is_an_error() {
        let mut config = AppConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "COINLENS_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = AppConfig::load(
            &temp_dir.path().join("missing.toml"),
            temp_dir.path().join("data"),
        )
        .unwrap();

        assert!(temp_dir.path().join("data").exists());
        assert_eq!(config.cache_path(), temp_dir.path().join("data/cache/coinlens.redb"));
    }
}
