use async_trait::async_trait;
use homebot_core::config::HomeAssistantConfig;
use homebot_core::{Error, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::types::{EntityRecord, ServiceCall, ServiceDescriptor};

/// Read and write surface of the smart-home platform.
///
/// Reads fail with `DiscoveryUnavailable` when the platform cannot be
/// reached and `UnknownEntity` for ids it does not know. Service calls fail
/// with `PlatformUnavailable` on transport errors and `PlatformRejected`
/// (raw body kept) on error statuses.
#[async_trait]
pub trait HomeApi: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn list_states(&self) -> Result<Vec<EntityRecord>>;

    async fn get_state(&self, entity_id: &str) -> Result<EntityRecord>;

    async fn list_services(&self) -> Result<Vec<ServiceDescriptor>>;

    async fn call_service(&self, call: &ServiceCall) -> Result<()>;
}

/// Home Assistant REST API client.
pub struct HomeAssistantClient {
    client: Client,
    api_base: String,
    token: String,
}

impl HomeAssistantClient {
    pub fn from_config(cfg: &HomeAssistantConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build Home Assistant HTTP client, using default");
                Client::new()
            });
        Self {
            client,
            api_base: format!("{}/api", cfg.base_url.trim_end_matches('/')),
            token: cfg.token.clone(),
        }
    }

    async fn get_json(&self, path: &str, context: &str) -> Result<(StatusCode, String)> {
        let url = format!("{}{}", self.api_base, path);
        debug!(url = %url, context, "Home Assistant read");
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Error::DiscoveryUnavailable(format!("{}: {}", context, e)))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::DiscoveryUnavailable(format!("{}: failed to read response: {}", context, e)))?;
        Ok((status, body))
    }
}

fn read_failure(context: &str, status: StatusCode, body: &str) -> Error {
    warn!(context, status = status.as_u16(), "Home Assistant returned error status");
    Error::DiscoveryUnavailable(format!("{}: HTTP {} {}", context, status.as_u16(), body.trim()))
}

#[async_trait]
impl HomeApi for HomeAssistantClient {
    async fn ping(&self) -> Result<()> {
        let (status, body) = self.get_json("/", "ping").await?;
        if !status.is_success() {
            return Err(read_failure("ping", status, &body));
        }
        Ok(())
    }

    async fn list_states(&self) -> Result<Vec<EntityRecord>> {
        let (status, body) = self.get_json("/states", "list_states").await?;
        if !status.is_success() {
            return Err(read_failure("list_states", status, &body));
        }
        let states: Vec<EntityRecord> = serde_json::from_str(&body)
            .map_err(|e| Error::DiscoveryUnavailable(format!("list_states: bad payload: {}", e)))?;
        Ok(states)
    }

    async fn get_state(&self, entity_id: &str) -> Result<EntityRecord> {
        let path = format!("/states/{}", urlencoding::encode(entity_id));
        let (status, body) = self.get_json(&path, "get_state").await?;
        if status == StatusCode::NOT_FOUND {
            return Err(Error::UnknownEntity(entity_id.to_string()));
        }
        if !status.is_success() {
            return Err(read_failure("get_state", status, &body));
        }
        serde_json::from_str(&body)
            .map_err(|e| Error::DiscoveryUnavailable(format!("get_state: bad payload: {}", e)))
    }

    async fn list_services(&self) -> Result<Vec<ServiceDescriptor>> {
        let (status, body) = self.get_json("/services", "list_services").await?;
        if !status.is_success() {
            return Err(read_failure("list_services", status, &body));
        }
        let raw: Value = serde_json::from_str(&body)
            .map_err(|e| Error::DiscoveryUnavailable(format!("list_services: bad payload: {}", e)))?;
        Ok(ServiceDescriptor::parse_catalog(&raw))
    }

    async fn call_service(&self, call: &ServiceCall) -> Result<()> {
        let url = format!(
            "{}/services/{}/{}",
            self.api_base,
            urlencoding::encode(&call.domain),
            urlencoding::encode(&call.service)
        );
        info!(
            domain = %call.domain,
            service = %call.service,
            entity_id = %call.entity_id,
            "Calling Home Assistant service"
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&call.body())
            .send()
            .await
            .map_err(|e| Error::PlatformUnavailable(format!("call_service: {}", e)))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), body = %body, "Home Assistant rejected service call");
        Err(Error::PlatformRejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_base_trims_slash() {
        let cfg = HomeAssistantConfig {
            base_url: "http://ha.local:8123/".to_string(),
            ..HomeAssistantConfig::default()
        };
        let client = HomeAssistantClient::from_config(&cfg);
        assert_eq!(client.api_base, "http://ha.local:8123/api");
    }

    #[test]
    fn test_read_failure_is_discovery_unavailable() {
        let err = read_failure("list_states", StatusCode::UNAUTHORIZED, "401: Unauthorized");
        assert!(matches!(err, Error::DiscoveryUnavailable(_)));
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_unreachable_platform_maps_to_typed_errors() {
        let cfg = HomeAssistantConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 2,
            ..HomeAssistantConfig::default()
        };
        let client = HomeAssistantClient::from_config(&cfg);
        assert!(matches!(client.list_states().await, Err(Error::DiscoveryUnavailable(_))));
        let call = ServiceCall {
            domain: "light".to_string(),
            service: "turn_on".to_string(),
            entity_id: "light.salon".to_string(),
            data: Default::default(),
        };
        assert!(matches!(client.call_service(&call).await, Err(Error::PlatformUnavailable(_))));
    }
}
