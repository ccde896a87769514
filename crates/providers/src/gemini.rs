use async_trait::async_trait;
use homebot_core::config::ProviderConfig;
use homebot_core::{Error, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::client::{build_http_client, status_error, transport_error, truncate_at_char_boundary};
use crate::{Prompt, Provider};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_GEMINI_MODEL: &str = "gemini-pro";

pub struct GeminiProvider {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl GeminiProvider {
    pub fn from_config(cfg: &ProviderConfig) -> Self {
        let api_base = cfg
            .api_base
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or(GEMINI_API_BASE)
            .trim_end_matches('/')
            .to_string();
        let model = if cfg.model.trim().is_empty() {
            DEFAULT_GEMINI_MODEL.to_string()
        } else {
            Self::normalize_model(&cfg.model).to_string()
        };
        Self {
            client: build_http_client(
                cfg.proxy.as_deref(),
                &api_base,
                Duration::from_secs(cfg.timeout_secs.max(1)),
            ),
            api_key: cfg.api_key.clone(),
            api_base,
            model,
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
        }
    }

    /// Config may store "gemini/gemini-2.0-flash" but the API expects "gemini-2.0-flash".
    fn normalize_model(model: &str) -> &str {
        model.strip_prefix("gemini/").unwrap_or(model)
    }

    fn build_request(&self, prompt: &Prompt) -> Value {
        let mut request = serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": prompt.user}]}],
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_tokens,
            }
        });
        if !prompt.system.is_empty() {
            request["systemInstruction"] = serde_json::json!({
                "parts": [{"text": prompt.system}]
            });
        }
        request
    }

    fn parse_response(raw_body: &str) -> Result<String> {
        let resp: GeminiResponse = serde_json::from_str(raw_body).map_err(|e| {
            let end = truncate_at_char_boundary(raw_body, 500);
            Error::provider(
                format!("Failed to parse Gemini response: {}. Body: {}", e, &raw_body[..end]),
                false,
            )
        })?;

        let candidate = resp
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| Error::provider("No candidates in Gemini response", false))?;

        if let Some(reason) = candidate.finish_reason.as_deref() {
            if reason != "STOP" {
                warn!(finish_reason = %reason, "Gemini finished early");
            }
        }

        let text = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        Ok(text)
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.api_base, self.model, self.api_key
        );
        let request = self.build_request(prompt);

        info!(model = %self.model, "Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("Gemini", e.without_url()))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            error!(status = %status, "Gemini API error");
            return Err(status_error("Gemini", status, &raw_body));
        }

        debug!(body_len = raw_body.len(), "Gemini raw response");
        Self::parse_response(&raw_body)
    }

    async fn probe(&self) -> Result<()> {
        let url = format!("{}/models/{}?key={}", self.api_base, self.model, self.api_key);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error("Gemini", e.without_url()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("Gemini", status, &body));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}
