use async_trait::async_trait;
use homebot_core::config::ProviderConfig;
use homebot_core::{Error, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::client::{build_http_client, status_error, transport_error, truncate_at_char_boundary};
use crate::{Prompt, Provider};

const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// OpenAI chat completions, also usable against compatible servers via
/// `apiBase`.
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAIProvider {
    pub fn from_config(cfg: &ProviderConfig) -> Self {
        let resolved_base = cfg
            .api_base
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or(DEFAULT_OPENAI_BASE)
            .trim_end_matches('/')
            .to_string();
        let model = if cfg.model.trim().is_empty() {
            DEFAULT_OPENAI_MODEL.to_string()
        } else {
            cfg.model.strip_prefix("openai/").unwrap_or(&cfg.model).to_string()
        };
        Self {
            client: build_http_client(
                cfg.proxy.as_deref(),
                &resolved_base,
                Duration::from_secs(cfg.timeout_secs.max(1)),
            ),
            api_key: cfg.api_key.clone(),
            api_base: resolved_base,
            model,
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
        }
    }

    fn build_request(&self, prompt: &Prompt) -> Value {
        let mut messages = Vec::new();
        if !prompt.system.is_empty() {
            messages.push(serde_json::json!({"role": "system", "content": prompt.system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt.user}));

        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        })
    }

    fn parse_response(raw_body: &str) -> Result<String> {
        let resp: ChatResponse = serde_json::from_str(raw_body).map_err(|e| {
            let end = truncate_at_char_boundary(raw_body, 500);
            Error::provider(
                format!("Failed to parse OpenAI response: {}. Body: {}", e, &raw_body[..end]),
                false,
            )
        })?;
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider("OpenAI response has no choices", false))?;
        Ok(choice.message.content.unwrap_or_default())
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        let request = self.build_request(prompt);

        info!(url = %url, model = %self.model, "Calling OpenAI API");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("OpenAI", e))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            error!(status = %status, "OpenAI API error");
            return Err(status_error("OpenAI", status, &raw_body));
        }

        debug!(body_len = raw_body.len(), "OpenAI raw response");
        Self::parse_response(&raw_body)
    }

    async fn probe(&self) -> Result<()> {
        let url = format!("{}/models", self.api_base);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| transport_error("OpenAI", e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("OpenAI", status, &body));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
