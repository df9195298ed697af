//! LLM provider factory
//!
//! Providers are capability sets behind [`LlmProvider`]; the factory picks
//! and configures one from the worker configuration instead of a class
//! hierarchy.

use crate::config::{ProviderKind, WorkerConfig};
use graphmine_core::errors::CoreError;
use graphmine_core::traits::LlmProvider;
use graphmine_connector_anthropic::{AnthropicConfig, AnthropicProvider};
use graphmine_connector_openai::{OpenAiConfig, OpenAiProvider};
use std::sync::Arc;
use tracing::info;

/// Build the configured provider. Fails when the selected provider lacks
/// the configuration it needs (no API key).
pub fn create_provider(config: &WorkerConfig) -> Result<Arc<dyn LlmProvider>, CoreError> {
    let provider: Arc<dyn LlmProvider> = match config.provider {
        ProviderKind::OpenAi => {
            let mut provider_config = OpenAiConfig::new(config.provider_api_key.clone());
            if let Some(model) = &config.provider_model {
                provider_config = provider_config.with_model(model.clone());
            }
            if let Some(api_base) = &config.provider_api_base {
                provider_config = provider_config.with_api_base(api_base.clone());
            }
            Arc::new(
                OpenAiProvider::new(provider_config)
                    .map_err(|e| CoreError::Configuration(e.to_string()))?,
            )
        }
        ProviderKind::Anthropic => {
            let mut provider_config = AnthropicConfig::new(config.provider_api_key.clone());
            if let Some(model) = &config.provider_model {
                provider_config = provider_config.with_model(model.clone());
            }
            if let Some(api_base) = &config.provider_api_base {
                provider_config = provider_config.with_api_base(api_base.clone());
            }
            Arc::new(
                AnthropicProvider::new(provider_config)
                    .map_err(|e| CoreError::Configuration(e.to_string()))?,
            )
        }
    };

    if !provider.is_configured() {
        return Err(CoreError::Configuration(format!(
            "LLM provider '{}' is not configured (missing API key)",
            provider.name()
        )));
    }
    info!(provider = provider.name(), "LLM provider configured");
    Ok(provider)
}
