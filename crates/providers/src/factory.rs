use homebot_core::config::{Config, ProviderKind, ProvidersConfig};
use homebot_core::{Error, Result};
use std::sync::Arc;

use crate::{GeminiProvider, OllamaProvider, OpenAIProvider, Provider, RetryPolicy, RetryingProvider};

/// Builds the bare variant selected by `providers.active`. OpenAI and
/// Gemini need an api key; Ollama does not.
pub fn create_provider(config: &ProvidersConfig) -> Result<Arc<dyn Provider>> {
    let kind = config.active;
    let cfg = config.get(kind);

    let needs_key = !matches!(kind, ProviderKind::Ollama);
    if needs_key && cfg.api_key.trim().is_empty() {
        return Err(Error::NotConfigured(format!(
            "provider '{}' is active but has no API key",
            kind
        )));
    }

    let provider: Arc<dyn Provider> = match kind {
        ProviderKind::Ollama => Arc::new(OllamaProvider::from_config(cfg)),
        ProviderKind::OpenAI => Arc::new(OpenAIProvider::from_config(cfg)),
        ProviderKind::Gemini => Arc::new(GeminiProvider::from_config(cfg)),
    };
    Ok(provider)
}

/// The active variant wrapped in the configured retry policy.
pub fn create_retrying_provider(config: &Config) -> Result<RetryingProvider> {
    let inner = create_provider(&config.providers)?;
    Ok(RetryingProvider::new(
        inner,
        RetryPolicy::from_config(&config.pipeline),
    ))
}
