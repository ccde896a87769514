use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use homebot_core::config::{TelegramConfig, TelegramMode};
use homebot_core::{Error, InboundMessage, OutboundMessage, Result};
use reqwest::{Client, Proxy};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::transport::Transport;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";
const SEND_TIMEOUT: Duration = Duration::from_secs(30);
/// Telegram rejects longer texts.
const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    from: Option<User>,
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

/// Text messages only; stickers, photos and service messages are dropped.
fn to_inbound(message: Message) -> Option<InboundMessage> {
    let text = message.text?;
    if text.trim().is_empty() {
        return None;
    }
    let chat_id = message.chat.id.to_string();
    let sender_id = message
        .from
        .as_ref()
        .map(|u| u.id.to_string())
        .unwrap_or_else(|| chat_id.clone());
    let mut inbound = InboundMessage::new("telegram", &sender_id, &chat_id, &text);
    inbound.metadata = json!({
        "message_id": message.message_id,
        "username": message.from.and_then(|u| u.username),
    });
    Some(inbound)
}

fn chunk_text(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(MAX_MESSAGE_CHARS)
        .map(|c| c.iter().collect())
        .collect()
}

pub struct TelegramTransport {
    config: TelegramConfig,
    client: Client,
}

impl TelegramTransport {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        // Long polls hold the request open for poll_timeout_secs.
        let mut builder = Client::builder().timeout(Duration::from_secs(config.poll_timeout_secs + 10));

        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            match Proxy::all(proxy) {
                Ok(p) => {
                    builder = builder.proxy(p);
                    info!(proxy = %proxy, "Telegram proxy configured");
                }
                Err(e) => {
                    warn!(error = %e, proxy = %proxy, "Invalid Telegram proxy, ignoring");
                }
            }
        }

        let client = builder
            .build()
            .map_err(|e| Error::Channel(format!("Failed to create Telegram HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", TELEGRAM_API_BASE, self.config.token, method)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value, timeout: Option<Duration>) -> Result<T> {
        let mut request = self.client.post(self.api_url(method)).json(body);
        if let Some(t) = timeout {
            request = request.timeout(t);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram {} failed: {}", method, e.without_url())))?;

        let parsed: TelegramResponse<T> = response
            .json()
            .await
            .map_err(|e| Error::Channel(format!("Failed to parse Telegram {} response: {}", method, e)))?;

        if !parsed.ok {
            return Err(Error::Channel(format!(
                "Telegram {}: {}",
                method,
                parsed.description.unwrap_or_else(|| "Unknown error".to_string())
            )));
        }
        parsed
            .result
            .ok_or_else(|| Error::Channel(format!("Telegram {} returned no result", method)))
    }

    async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>> {
        let mut body = json!({
            "timeout": self.config.poll_timeout_secs,
            "allowed_updates": ["message"],
        });
        if let Some(off) = offset {
            body["offset"] = json!(off);
        }
        self.call("getUpdates", &body, None).await
    }

    async fn set_webhook(&self) -> Result<()> {
        let webhook = &self.config.webhook;
        let mut body = json!({
            "url": webhook.url,
            "allowed_updates": ["message"],
        });
        if !webhook.secret_token.is_empty() {
            body["secret_token"] = json!(webhook.secret_token);
        }
        let _: bool = self.call("setWebhook", &body, Some(SEND_TIMEOUT)).await?;
        info!(url = %webhook.url, "Telegram webhook registered");
        Ok(())
    }

    async fn delete_webhook(&self) -> Result<()> {
        let _: bool = self.call("deleteWebhook", &json!({}), Some(SEND_TIMEOUT)).await?;
        Ok(())
    }

    async fn run_polling(&self, inbound: mpsc::Sender<InboundMessage>, cancel: CancellationToken) -> Result<()> {
        // getUpdates is refused while a webhook is registered.
        if let Err(e) = self.delete_webhook().await {
            warn!(error = %e, "Could not clear Telegram webhook before polling");
        }

        info!("Telegram polling started");
        let mut offset: Option<i64> = None;

        loop {
            tokio::select! {
                result = self.get_updates(offset) => {
                    match result {
                        Ok(updates) => {
                            for update in updates {
                                offset = Some(update.update_id + 1);
                                let Some(msg) = update.message.and_then(to_inbound) else {
                                    continue;
                                };
                                debug!(chat_id = %msg.chat_id, "Telegram message received");
                                if inbound.send(msg).await.is_err() {
                                    info!("Dispatcher closed, Telegram polling stops");
                                    return Ok(());
                                }
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to get Telegram updates");
                            tokio::select! {
                                _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                                _ = cancel.cancelled() => break,
                            }
                        }
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        info!("Telegram polling stopped");
        Ok(())
    }

    async fn run_webhook(&self, inbound: mpsc::Sender<InboundMessage>, cancel: CancellationToken) -> Result<()> {
        let webhook = &self.config.webhook;
        let listener = tokio::net::TcpListener::bind(&webhook.listen)
            .await
            .map_err(|e| Error::Channel(format!("Cannot listen on {}: {}", webhook.listen, e)))?;

        let state = WebhookState {
            secret: webhook.secret_token.clone(),
            inbound,
        };
        let app = webhook_router(&webhook.route_path(), state);

        self.set_webhook().await?;
        info!(listen = %webhook.listen, path = %webhook.route_path(), "Telegram webhook listener started");

        let shutdown = cancel.clone();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        if let Err(e) = self.delete_webhook().await {
            warn!(error = %e, "Failed to delete Telegram webhook");
        } else {
            info!("Telegram webhook deleted");
        }
        served.map_err(|e| Error::Channel(format!("Webhook server failed: {}", e)))
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn run(&self, inbound: mpsc::Sender<InboundMessage>, cancel: CancellationToken) -> Result<()> {
        match self.config.mode {
            TelegramMode::Polling => self.run_polling(inbound, cancel).await,
            TelegramMode::Webhook => self.run_webhook(inbound, cancel).await,
        }
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<()> {
        for (i, chunk) in chunk_text(&msg.content).into_iter().enumerate() {
            let mut body = json!({
                "chat_id": msg.chat_id,
                "text": chunk,
            });
            if let (0, Some(reply_to)) = (i, msg.reply_to.as_deref()) {
                if let Ok(id) = reply_to.parse::<i64>() {
                    body["reply_to_message_id"] = json!(id);
                }
            }
            let _: Value = self.call("sendMessage", &body, Some(SEND_TIMEOUT)).await?;
        }
        Ok(())
    }
}

#[derive(Clone)]
struct WebhookState {
    secret: String,
    inbound: mpsc::Sender<InboundMessage>,
}

/// `path` must start with `/`; see `WebhookConfig::route_path`.
fn webhook_router(path: &str, state: WebhookState) -> Router {
    Router::new().route(path, post(handle_update)).with_state(state)
}

async fn handle_update(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> StatusCode {
    if !state.secret.is_empty() {
        let provided = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if provided != Some(state.secret.as_str()) {
            warn!(update_id = update.update_id, "Invalid webhook secret token");
            return StatusCode::UNAUTHORIZED;
        }
    }

    if let Some(msg) = update.message.and_then(to_inbound) {
        if state.inbound.send(msg).await.is_err() {
            return StatusCode::SERVICE_UNAVAILABLE;
        }
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(text: &str) -> Update {
        serde_json::from_value(json!({
            "update_id": 10,
            "message": {
                "message_id": 5,
                "from": {"id": 111, "username": "ayse"},
                "chat": {"id": -200},
                "text": text
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_update_to_inbound() {
        let msg = update("Salon ışığını aç").message.and_then(to_inbound).unwrap();
        assert_eq!(msg.channel, "telegram");
        assert_eq!(msg.chat_id, "-200");
        assert_eq!(msg.sender_id, "111");
        assert_eq!(msg.metadata["message_id"], 5);
        assert_eq!(msg.metadata["username"], "ayse");
    }

    #[test]
    fn test_non_text_updates_are_dropped() {
        let u: Update = serde_json::from_value(json!({
            "update_id": 11,
            "message": {"message_id": 6, "chat": {"id": 1}}
        }))
        .unwrap();
        assert!(u.message.and_then(to_inbound).is_none());
        assert!(update("   ").message.and_then(to_inbound).is_none());
    }

    #[test]
    fn test_chunking_respects_char_limit() {
        let long = "ş".repeat(MAX_MESSAGE_CHARS + 10);
        let chunks = chunk_text(&long);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), MAX_MESSAGE_CHARS);
        assert_eq!(chunk_text("merhaba"), vec!["merhaba".to_string()]);
    }

    #[tokio::test]
    async fn test_webhook_rejects_wrong_secret() {
        let (tx, mut rx) = mpsc::channel(4);
        let state = WebhookState {
            secret: "s3cret".to_string(),
            inbound: tx,
        };

        let mut bad = HeaderMap::new();
        bad.insert(SECRET_HEADER, "nope".parse().unwrap());
        let status = handle_update(State(state.clone()), bad, Json(update("a"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(rx.try_recv().is_err());

        let mut good = HeaderMap::new();
        good.insert(SECRET_HEADER, "s3cret".parse().unwrap());
        let status = handle_update(State(state), good, Json(update("b"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rx.recv().await.unwrap().content, "b");
    }

    #[test]
    fn test_invalid_proxy_is_ignored() {
        let config = TelegramConfig {
            token: "123:abc".to_string(),
            proxy: Some("not a proxy url".to_string()),
            ..Default::default()
        };
        assert!(TelegramTransport::new(config).is_ok());
    }

    #[tokio::test]
    async fn test_webhook_serves_path_without_leading_slash() {
        let config = homebot_core::config::WebhookConfig {
            path: "telegram/webhook".to_string(),
            ..Default::default()
        };
        let (tx, mut rx) = mpsc::channel(4);
        let state = WebhookState {
            secret: String::new(),
            inbound: tx,
        };
        let app = webhook_router(&config.route_path(), state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        });

        let body = json!({
            "update_id": 12,
            "message": {"message_id": 3, "chat": {"id": 5}, "text": "Kombi açık mı?"}
        });
        let response = Client::builder()
            .no_proxy()
            .build()
            .unwrap()
            .post(format!("http://{}/telegram/webhook", addr))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(rx.recv().await.unwrap().content, "Kombi açık mı?");

        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
