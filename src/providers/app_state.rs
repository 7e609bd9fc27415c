//! Application state provider for dependency injection.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::{app_context::AppState, config::Config, providers::traits::AsyncProvider};

/// Resolves the fan hardware and builds the shared [`AppState`].
pub struct AppStateProvider {
    config: Arc<Config>,
}

impl AppStateProvider {
    pub const fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AsyncProvider<Arc<AppState>> for AppStateProvider {
    async fn provide(&self) -> Result<Arc<AppState>> {
        let app_state = AppState::new(self.config.clone())
            .await
            .context("Failed to take control of the fan")?;
        Ok(Arc::new(app_state))
    }
}
