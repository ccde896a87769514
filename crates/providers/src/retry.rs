use async_trait::async_trait;
use homebot_core::config::PipelineConfig;
use homebot_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{Prompt, Provider};

/// Exponential backoff with jitter for transient provider failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total calls, first one included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Fraction of the delay added or removed at random (0.0 - 1.0).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            max_attempts: cfg.llm_max_attempts.max(1),
            initial_delay: Duration::from_millis(cfg.llm_retry_delay_ms),
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16) as i32;
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exp);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = capped * self.jitter_factor * (rand_simple() * 2.0 - 1.0);
        Duration::from_secs_f64((capped + jitter).max(0.0))
    }
}

/// Pseudo-random value in [0, 1) without pulling in a rand crate.
fn rand_simple() -> f64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64,
    );
    (hasher.finish() % 10_000) as f64 / 10_000.0
}

/// Wraps a provider variant with the retry policy. Health probes bypass
/// the wrapper and go straight to the inner provider.
pub struct RetryingProvider {
    inner: Arc<dyn Provider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Completes with retries; a cancelled token stops the backoff wait.
    pub async fn complete_cancellable(
        &self,
        prompt: &Prompt,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.policy.delay_for_retry(attempt - 1);
                warn!(
                    provider = %self.inner.name(),
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying LLM call after transient error"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match self.inner.complete(prompt).await {
                Ok(text) => {
                    if attempt > 1 {
                        info!(provider = %self.inner.name(), attempt, "LLM call succeeded after retry");
                    }
                    return Ok(text);
                }
                Err(e) if e.is_retryable() => {
                    warn!(provider = %self.inner.name(), attempt, error = %e, "Transient LLM error");
                    last_error = e.to_string();
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::ProviderUnavailable {
            attempts: max_attempts,
            last_error,
        })
    }
}

#[async_trait]
impl Provider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        self.complete_cancellable(prompt, &CancellationToken::new())
            .await
    }

    async fn probe(&self) -> Result<()> {
        self.inner.probe().await
    }
}
