use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::paths::Paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Ollama,
    #[serde(alias = "open_ai")]
    OpenAI,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAI => "openai",
            ProviderKind::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for one LLM backend. Empty `model` / `api_base` fall back to
/// the backend's own defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_system_prompt() -> String {
    "Sen Türkçe konuşan bir akıllı ev asistanısın.".to_string()
}

fn default_provider_timeout() -> u64 {
    60
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: None,
            model: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
            timeout_secs: default_provider_timeout(),
            proxy: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProvidersConfig {
    #[serde(default)]
    pub active: ProviderKind,
    #[serde(default)]
    pub ollama: ProviderConfig,
    #[serde(default)]
    pub openai: ProviderConfig,
    #[serde(default)]
    pub gemini: ProviderConfig,
}

impl ProvidersConfig {
    pub fn get(&self, kind: ProviderKind) -> &ProviderConfig {
        match kind {
            ProviderKind::Ollama => &self.ollama,
            ProviderKind::OpenAI => &self.openai,
            ProviderKind::Gemini => &self.gemini,
        }
    }

    pub fn active_config(&self) -> &ProviderConfig {
        self.get(self.active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TelegramMode {
    #[default]
    Polling,
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    /// Public HTTPS URL registered with Telegram.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub secret_token: String,
    #[serde(default = "default_webhook_listen")]
    pub listen: String,
    #[serde(default = "default_webhook_path")]
    pub path: String,
}

fn default_webhook_listen() -> String {
    "0.0.0.0:8443".to_string()
}

fn default_webhook_path() -> String {
    "/telegram/webhook".to_string()
}

impl WebhookConfig {
    /// `path` as an absolute route, so `telegram/webhook` and
    /// `/telegram/webhook` serve the same place.
    pub fn route_path(&self) -> String {
        let trimmed = self.path.trim().trim_start_matches('/');
        format!("/{}", trimmed)
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            secret_token: String::new(),
            listen: default_webhook_listen(),
            path: default_webhook_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: String,
    /// Chat ids allowed to talk to the bot. Empty means nobody.
    #[serde(default)]
    pub allowed_chat_ids: Vec<String>,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
    #[serde(default)]
    pub mode: TelegramMode,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_rate_limit() -> u32 {
    10
}

fn default_poll_timeout() -> u64 {
    30
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: String::new(),
            allowed_chat_ids: Vec::new(),
            rate_limit_per_minute: default_rate_limit(),
            mode: TelegramMode::default(),
            webhook: WebhookConfig::default(),
            poll_timeout_secs: default_poll_timeout(),
            proxy: None,
        }
    }
}

impl TelegramConfig {
    pub fn is_allowed(&self, chat_id: &str) -> bool {
        self.allowed_chat_ids.iter().any(|id| id.trim() == chat_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HomeAssistantConfig {
    #[serde(default = "default_ha_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub token: String,
    /// When set, service calls are logged but never sent.
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    /// Restricts discovery to these entity ids. Empty exposes everything.
    #[serde(default)]
    pub exposed_entities: Vec<String>,
    #[serde(default = "default_ha_timeout")]
    pub timeout_secs: u64,
}

fn default_ha_base_url() -> String {
    "http://homeassistant.local:8123".to_string()
}

fn default_dry_run() -> bool {
    true
}

fn default_ha_timeout() -> u64 {
    10
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            base_url: default_ha_base_url(),
            token: String::new(),
            dry_run: default_dry_run(),
            exposed_entities: Vec::new(),
            timeout_secs: default_ha_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Corrections allowed after the first attempt.
    #[serde(default = "default_max_corrections")]
    pub max_corrections: u32,
    #[serde(default = "default_llm_max_attempts")]
    pub llm_max_attempts: u32,
    #[serde(default = "default_llm_retry_delay_ms")]
    pub llm_retry_delay_ms: u64,
    #[serde(default = "default_entity_ttl")]
    pub entity_ttl_secs: u64,
    #[serde(default = "default_service_ttl")]
    pub service_ttl_secs: u64,
    #[serde(default = "default_verify_delay_ms")]
    pub verify_delay_ms: u64,
    #[serde(default = "default_max_prompt_entities")]
    pub max_prompt_entities: usize,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    /// Overrides the built-in interrogative list when non-empty.
    #[serde(default)]
    pub question_words: Vec<String>,
}

fn default_max_corrections() -> u32 {
    2
}

fn default_llm_max_attempts() -> u32 {
    3
}

fn default_llm_retry_delay_ms() -> u64 {
    1000
}

fn default_entity_ttl() -> u64 {
    30
}

fn default_service_ttl() -> u64 {
    600
}

fn default_verify_delay_ms() -> u64 {
    500
}

fn default_max_prompt_entities() -> usize {
    10
}

fn default_shutdown_grace() -> u64 {
    10
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_corrections: default_max_corrections(),
            llm_max_attempts: default_llm_max_attempts(),
            llm_retry_delay_ms: default_llm_retry_delay_ms(),
            entity_ttl_secs: default_entity_ttl(),
            service_ttl_secs: default_service_ttl(),
            verify_delay_ms: default_verify_delay_ms(),
            max_prompt_entities: default_max_prompt_entities(),
            shutdown_grace_secs: default_shutdown_grace(),
            question_words: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationLogConfig {
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub path: Option<String>,
}

fn default_log_enabled() -> bool {
    true
}

impl Default for ConversationLogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub home_assistant: HomeAssistantConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub conversation_log: ConversationLogConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Checks the settings the bot transport needs before it can start.
    pub fn telegram_ready(&self) -> Result<()> {
        if self.telegram.token.trim().is_empty() {
            return Err(Error::NotConfigured("telegram token is empty".to_string()));
        }
        if self.telegram.mode == TelegramMode::Webhook && self.telegram.webhook.url.trim().is_empty() {
            return Err(Error::NotConfigured(
                "telegram webhook mode needs webhook.url".to_string(),
            ));
        }
        if self.telegram.mode == TelegramMode::Webhook && self.telegram.webhook.path.contains([':', '*']) {
            return Err(Error::NotConfigured(format!(
                "telegram webhook.path {:?} must be a plain path",
                self.telegram.webhook.path
            )));
        }
        Ok(())
    }
}

/// Source of the current configuration. Read again on every lifecycle
/// transition, so implementations must return fresh values.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<Config>;
}

/// JSON file on disk; a missing file yields defaults.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn from_paths(paths: &Paths) -> Self {
        Self::new(paths.config_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<Config> {
        if self.path.exists() {
            Config::load(&self.path)
        } else {
            Ok(Config::default())
        }
    }
}

/// In-process store, handy for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    inner: RwLock<Config>,
}

impl MemoryConfigStore {
    pub fn new(config: Config) -> Self {
        Self {
            inner: RwLock::new(config),
        }
    }

    pub fn set(&self, config: Config) {
        match self.inner.write() {
            Ok(mut guard) => *guard = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<Config> {
        self.inner
            .read()
            .map(|c| c.clone())
            .map_err(|_| Error::Config("config store lock poisoned".to_string()))
    }
}
