// Core types and market aggregation for CoinLens

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod market;
pub mod provider;
pub mod storage;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod types;

pub use error::{ErrorBody, ErrorKind, ProviderError, ProviderResult, ToolError, ToolResult};
pub use fingerprint::Fingerprint;
pub use types::*;
