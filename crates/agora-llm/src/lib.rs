pub mod client;
pub mod select;

use std::sync::Arc;

use agora_core::config::RunConfig;
use agora_core::traits::ChatBackend;

pub use client::{fallback_completion, mock_completion, HttpBackend};
pub use select::{select_provider, select_provider_for};

/// Build the default backend over the configured provider registry.
pub fn create_backend(config: &RunConfig) -> Arc<dyn ChatBackend> {
    Arc::new(HttpBackend::new(config.providers.clone()))
}
