pub mod client;
pub mod factory;
pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod retry;
pub mod snapshot;

use async_trait::async_trait;
use homebot_core::Result;
use tracing::warn;

/// A fully assembled request: persona/rules in `system`, the grounded
/// request in `user`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// One completion. Transient failures come back as
    /// `Error::Provider { retryable: true, .. }`.
    async fn complete(&self, prompt: &Prompt) -> Result<String>;

    /// Cheap connectivity check against the backend.
    async fn probe(&self) -> Result<()>;

    async fn test(&self) -> bool {
        match self.probe().await {
            Ok(()) => true,
            Err(e) => {
                warn!(provider = %self.name(), error = %e, "Provider probe failed");
                false
            }
        }
    }
}

pub use factory::create_provider;
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;
pub use retry::{RetryPolicy, RetryingProvider};
pub use snapshot::{ActiveProvider, ProviderSnapshot};
