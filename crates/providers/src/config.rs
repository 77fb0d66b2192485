//! Configuration types for the upstream clients.

use coinlens_core::config::{AppConfig, RetrySettings};
use std::time::Duration;
use url::Url;

/// Configuration for one upstream REST client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL; always ends with `/` so relative paths join under it.
    pub base_url: Url,
    /// API key, sent in `api_key_header` when present.
    pub api_key: Option<String>,
    pub api_key_header: String,
    /// Per-attempt request timeout.
    pub timeout: Duration,
    pub user_agent: String,
    pub retry_config: RetryConfig,
}

impl ClientConfig {
    /// Create a configuration with defaults for everything but the base URL.
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            base_url: normalize_base(base_url)?,
            api_key: None,
            api_key_header: "x-api-key".to_string(),
            timeout: Duration::from_secs(30),
            user_agent: format!("coinlens/{}", env!("CARGO_PKG_VERSION")),
            retry_config: RetryConfig::default(),
        })
    }

    /// Spot (CoinGecko) client settings from the application config.
    pub fn spot(config: &AppConfig) -> Result<Self, url::ParseError> {
        Ok(Self {
            base_url: normalize_base(&config.spot.base_url)?,
            api_key: config.spot.api_key.clone(),
            api_key_header: config.spot.api_key_header.clone(),
            timeout: config.request_timeout(),
            user_agent: config.http.user_agent.clone(),
            retry_config: RetryConfig::from(&config.retry),
        })
    }

    /// Contract (Bitget) client settings from the application config.
    pub fn contract(config: &AppConfig) -> Result<Self, url::ParseError> {
        Ok(Self {
            base_url: normalize_base(&config.contract.base_url)?,
            api_key: config.contract.api_key.clone(),
            api_key_header: config.contract.api_key_header.clone(),
            timeout: config.request_timeout(),
            user_agent: config.http.user_agent.clone(),
            retry_config: RetryConfig::from(&config.retry),
        })
    }
}

fn normalize_base(base_url: &str) -> Result<Url, url::ParseError> {
    let trimmed = base_url.trim();
    if trimmed.ends_with('/') {
        Url::parse(trimmed)
    } else {
        Url::parse(&format!("{}/", trimmed))
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per request, first try included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// HTTP status codes to retry on.
    pub retry_on_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            backoff_multiplier: settings.backoff_multiplier,
            retry_on_status_codes: vec![429, 500, 502, 503, 504],
        }
    }
}

impl RetryConfig {
    /// Create a configuration that tries each request once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Backoff before retry number `retry` (0-based).
    pub fn backoff_for_attempt(&self, retry: u32) -> Duration {
        let backoff_ms =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(retry as i32);
        let backoff = Duration::from_millis(backoff_ms as u64);
        std::cmp::min(backoff, self.max_backoff)
    }

    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_on_status_codes.contains(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let config = RetryConfig::default();

        assert_eq!(config.backoff_for_attempt(0), Duration::from_millis(200));
        assert_eq!(config.backoff_for_attempt(1), Duration::from_millis(400));
        assert_eq!(config.backoff_for_attempt(2), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_capped_at_max() {
        let config = RetryConfig {
            max_backoff: Duration::from_millis(500),
            ..Default::default()
        };

        assert_eq!(config.backoff_for_attempt(10), Duration::from_millis(500));
    }

    #[test]
    fn test_should_retry_status() {
        let config = RetryConfig::default();

        assert!(config.should_retry_status(429));
        assert!(config.should_retry_status(502));
        assert!(config.should_retry_status(503));
        assert!(!config.should_retry_status(400));
        assert!(!config.should_retry_status(404));
    }

    #[test]
    fn test_retry_config_from_settings() {
        let settings = RetrySettings {
            max_attempts: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 100,
            backoff_multiplier: 3.0,
        };
        let config = RetryConfig::from(&settings);

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff_for_attempt(1), Duration::from_millis(30));
        assert_eq!(RetryConfig::no_retry().max_attempts, 1);
    }

    #[test]
    fn test_base_url_keeps_path_prefix() {
        let config = ClientConfig::new("https://api.coingecko.com/api/v3").unwrap();
        assert_eq!(config.base_url.as_str(), "https://api.coingecko.com/api/v3/");

        let joined = config.base_url.join("simple/price").unwrap();
        assert_eq!(joined.as_str(), "https://api.coingecko.com/api/v3/simple/price");
    }

    #[test]
    fn test_client_config_from_app_config() {
        let mut app = AppConfig::default();
        app.spot.api_key = Some("demo".to_string());
        app.http.timeout_secs = 5;

        let spot = ClientConfig::spot(&app).unwrap();
        assert_eq!(spot.api_key.as_deref(), Some("demo"));
        assert_eq!(spot.api_key_header, "x-cg-demo-api-key");
        assert_eq!(spot.timeout, Duration::from_secs(5));

        let contract = ClientConfig::contract(&app).unwrap();
        assert_eq!(contract.base_url.as_str(), "https://api.bitget.com/");
        assert!(contract.api_key.is_none());
    }
}
