use homebot_agent::Pipeline;
use homebot_channels::{BotManager, BotState, TelegramTransportFactory};
use homebot_providers::Provider;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::watch::ConfigWatcher;
use super::Context;

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await
}

pub async fn run(ctx: &Context) -> anyhow::Result<()> {
    ctx.paths.ensure_dirs()?;
    let store = Arc::new(ctx.store());
    let config = ctx.load()?;

    let pipeline = Arc::new(Pipeline::new(&config, ctx.conversation_sink(&config)));
    match pipeline.provider().current() {
        Ok(active) => {
            if !active.provider.test().await {
                warn!(provider = %active.kind, "LLM provider is not answering yet");
            }
        }
        Err(e) => warn!(error = %e, "No usable LLM provider"),
    }

    let manager = BotManager::new(store, pipeline.clone(), Arc::new(TelegramTransportFactory));

    match manager.start().await {
        Ok(BotState::Running) => {}
        Ok(state) => info!(state = %state, "Bot not started; waiting for config changes"),
        Err(e) => error!(error = %e, "Bot failed to start; waiting for config changes"),
    }

    let mut watcher = match ConfigWatcher::new(&ctx.config_path) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!(error = %e, "Config hot reload disabled");
            None
        }
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
            _ = terminate() => {
                info!("SIGTERM received, shutting down");
                break;
            }
            changed = async {
                match watcher.as_mut() {
                    Some(w) => w.changed().await,
                    None => std::future::pending().await,
                }
            } => {
                if changed.is_none() {
                    warn!("Config watcher closed");
                    watcher = None;
                    continue;
                }
                info!("Config changed, restarting bot");
                match manager.restart().await {
                    Ok(state) => info!(state = %state, "Bot restarted"),
                    Err(e) => error!(error = %e, "Bot restart failed"),
                }
            }
        }
    }

    manager.stop().await;
    Ok(())
}
