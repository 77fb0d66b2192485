//! # CoinLens providers
//!
//! REST clients for the upstream market data sources behind CoinLens:
//! CoinGecko for spot prices and Bitget for perpetual contracts. Both
//! implement the provider traits from `coinlens-core` and share one
//! retrying HTTP transport.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use coinlens_core::config::AppConfig;
//! use coinlens_core::provider::SpotProvider;
//! use coinlens_core::types::CoinId;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! let spot = coinlens_providers::spot_from_config(&config)?;
//!
//! let currencies = ["cny".to_string(), "usd".to_string()];
//! let prices = spot.prices(&[CoinId::new("bitcoin")], &currencies).await?;
//! println!("{:?}", prices);
//! # Ok(())
//! # }
//! ```

pub mod bitget;
pub mod coingecko;
pub mod config;
pub mod error;
pub mod transport;

pub use bitget::BitgetClient;
pub use coingecko::CoinGeckoClient;
pub use config::{ClientConfig, RetryConfig};
pub use error::ClientError;

use coinlens_core::config::AppConfig;

/// Build the spot client from the application config.
pub fn spot_from_config(config: &AppConfig) -> Result<CoinGeckoClient, ClientError> {
    CoinGeckoClient::new(ClientConfig::spot(config)?)
}

/// Build the contract client from the application config.
pub fn contract_from_config(config: &AppConfig) -> Result<BitgetClient, ClientError> {
    BitgetClient::new(
        ClientConfig::contract(config)?,
        config.contract.product_type.clone(),
        config.contract.exchange.clone(),
    )
}
