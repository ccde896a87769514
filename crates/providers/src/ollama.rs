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

const DEFAULT_OLLAMA_BASE: &str = "http://localhost:11434";
const DEFAULT_OLLAMA_MODEL: &str = "qwen:1.8b";

pub struct OllamaProvider {
    client: Client,
    api_base: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OllamaProvider {
    pub fn from_config(cfg: &ProviderConfig) -> Self {
        let resolved_base = cfg
            .api_base
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or(DEFAULT_OLLAMA_BASE)
            .trim_end_matches('/')
            .to_string();
        let model = if cfg.model.trim().is_empty() {
            DEFAULT_OLLAMA_MODEL.to_string()
        } else {
            cfg.model.clone()
        };
        let client = build_http_client(
            cfg.proxy.as_deref(),
            &resolved_base,
            Duration::from_secs(cfg.timeout_secs.max(1)),
        );
        Self {
            client,
            api_base: resolved_base,
            model,
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
        }
    }

    /// Config may store "ollama/llama3" but the API expects "llama3".
    fn normalize_model(model: &str) -> &str {
        model.strip_prefix("ollama/").unwrap_or(model)
    }

    fn build_request(&self, prompt: &Prompt) -> Value {
        let mut messages = Vec::new();
        if !prompt.system.is_empty() {
            messages.push(serde_json::json!({"role": "system", "content": prompt.system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt.user}));

        serde_json::json!({
            "model": Self::normalize_model(&self.model),
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            }
        })
    }

    fn parse_response(raw_body: &str) -> Result<String> {
        let resp: OllamaChatResponse = serde_json::from_str(raw_body).map_err(|e| {
            let end = truncate_at_char_boundary(raw_body, 500);
            Error::provider(
                format!("Failed to parse Ollama response: {}. Body: {}", e, &raw_body[..end]),
                false,
            )
        })?;
        Ok(resp.message.content)
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let url = format!("{}/api/chat", self.api_base);
        let request = self.build_request(prompt);

        info!(url = %url, model = %self.model, "Calling Ollama API");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("Ollama", e))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            error!(status = %status, body = %raw_body, "Ollama API error");
            return Err(status_error("Ollama", status, &raw_body));
        }

        debug!(body_len = raw_body.len(), "Ollama raw response");
        Self::parse_response(&raw_body)
    }

    async fn probe(&self) -> Result<()> {
        let url = format!("{}/api/version", self.api_base);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error("Ollama", e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("Ollama", status, &body));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
    #[allow(dead_code)]
    #[serde(default)]
    done: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}
