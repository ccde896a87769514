use homebot_core::config::{Config, ProviderConfig, ProviderKind};
use homebot_core::{Error, Result};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::factory::create_retrying_provider;
use crate::{Provider, RetryPolicy, RetryingProvider};

/// Immutable provider state captured by a run. Swapping the active
/// provider never affects a run that already holds its snapshot.
pub struct ProviderSnapshot {
    pub kind: ProviderKind,
    pub config: ProviderConfig,
    pub provider: RetryingProvider,
}

/// Holder for the single active provider.
#[derive(Default)]
pub struct ActiveProvider {
    current: RwLock<Option<Arc<ProviderSnapshot>>>,
    /// Set for injected providers; config reloads leave them alone.
    pinned: bool,
}

impl ActiveProvider {
    pub fn from_config(config: &Config) -> Self {
        let active = Self::default();
        if let Err(e) = active.replace(config) {
            warn!(error = %e, "No usable LLM provider yet");
        }
        active
    }

    /// Uses the given provider regardless of configuration.
    pub fn pinned(kind: ProviderKind, provider: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self {
            current: RwLock::new(Some(Arc::new(ProviderSnapshot {
                kind,
                config: ProviderConfig::default(),
                provider: RetryingProvider::new(provider, policy),
            }))),
            pinned: true,
        }
    }

    /// The snapshot to use for one whole run.
    pub fn current(&self) -> Result<Arc<ProviderSnapshot>> {
        let guard = self
            .current
            .read()
            .map_err(|_| Error::Other("provider lock poisoned".to_string()))?;
        guard
            .clone()
            .ok_or_else(|| Error::NotConfigured("no LLM provider configured".to_string()))
    }

    /// Rebuilds the provider when the active kind or its settings changed.
    /// On error the previous provider is dropped, so stale credentials are
    /// never used.
    pub fn replace(&self, config: &Config) -> Result<()> {
        if self.pinned {
            return Ok(());
        }
        let kind = config.providers.active;
        let provider_cfg = config.providers.active_config().clone();

        // Compare and swap under one write guard.
        let mut guard = self
            .current
            .write()
            .map_err(|_| Error::Other("provider lock poisoned".to_string()))?;
        if let Some(existing) = guard.as_ref() {
            if existing.kind == kind
                && existing.config == provider_cfg
                && existing_policy_matches(&existing.provider, config)
            {
                return Ok(());
            }
        }

        let built = create_retrying_provider(config);
        match built {
            Ok(provider) => {
                info!(provider = %kind, "Active LLM provider switched");
                *guard = Some(Arc::new(ProviderSnapshot {
                    kind,
                    config: provider_cfg,
                    provider,
                }));
                Ok(())
            }
            Err(e) => {
                *guard = None;
                Err(e)
            }
        }
    }
}

fn existing_policy_matches(provider: &RetryingProvider, config: &Config) -> bool {
    let policy = provider.policy();
    policy.max_attempts == config.pipeline.llm_max_attempts.max(1)
        && policy.initial_delay.as_millis() as u64 == config.pipeline.llm_retry_delay_ms
}
