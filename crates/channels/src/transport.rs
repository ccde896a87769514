use async_trait::async_trait;
use homebot_core::config::TelegramConfig;
use homebot_core::{InboundMessage, OutboundMessage, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A messaging transport: a stream of inbound messages plus a way to reply.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Receives messages into `inbound` until `cancel` fires. Returns once
    /// the transport has released its external resources (webhook
    /// registration, listener socket).
    async fn run(&self, inbound: mpsc::Sender<InboundMessage>, cancel: CancellationToken) -> Result<()>;

    async fn send(&self, msg: &OutboundMessage) -> Result<()>;
}

/// Builds a fresh transport from the current settings on every start.
pub trait TransportFactory: Send + Sync {
    fn create(&self, config: &TelegramConfig) -> Result<Arc<dyn Transport>>;
}

pub struct TelegramTransportFactory;

impl TransportFactory for TelegramTransportFactory {
    fn create(&self, config: &TelegramConfig) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(crate::telegram::TelegramTransport::new(config.clone())?))
    }
}
