pub mod anthropic;
pub mod mock;
pub mod traits;

use std::sync::Arc;

pub use anthropic::AnthropicClient;
pub use mock::{MockModel, ScriptedModel};
pub use traits::{CompletionRequest, LanguageModel, ModelError};

use crate::config::{Config, ModelProvider};
use crate::error::{AnalyzerError, Result};

/// Build the model client selected by configuration
pub fn create_model(config: &Config) -> Result<Arc<dyn LanguageModel>> {
    match config.system.provider {
        ModelProvider::Anthropic => {
            let key = config
                .runtime
                .anthropic_api_key
                .clone()
                .ok_or_else(|| AnalyzerError::Config {
                    message: "ANTHROPIC_API_KEY is not set".to_string(),
                })?;
            let client = AnthropicClient::new(&config.system, key)
                .map_err(|e| AnalyzerError::Config {
                    message: e.to_string(),
                })?;
            Ok(Arc::new(client))
        }
        ModelProvider::Mock => {
            tracing::info!("Using MOCK model client; responses are canned");
            Ok(Arc::new(MockModel::new()))
        }
    }
}
