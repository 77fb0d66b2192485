use anyhow::{Context, Result};
use coinlens_core::config::AppConfig;
use coinlens_mcp::Dispatcher;
use std::sync::Arc;

/// Shared handler state
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let dispatcher =
            coinlens_mcp::build_dispatcher(config).context("Failed to build tool dispatcher")?;
        Ok(Self::with_dispatcher(Arc::new(dispatcher)))
    }

    pub fn with_dispatcher(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}
