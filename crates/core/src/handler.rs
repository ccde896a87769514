use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::message::InboundMessage;

/// Turns one inbound chat message into a reply.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// `None` means no reply should be sent (the run was cancelled).
    async fn handle(&self, msg: &InboundMessage, cancel: &CancellationToken) -> Option<String>;

    /// Picks up fresh provider and platform settings. Runs already in
    /// flight keep what they started with.
    async fn reload(&self, config: &Config) -> Result<()>;
}
