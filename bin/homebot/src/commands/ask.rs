use homebot_agent::Pipeline;
use homebot_core::NullConversationLog;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::Context;

pub async fn run(ctx: &Context, message: &str) -> anyhow::Result<()> {
    let config = ctx.load()?;
    let pipeline = Pipeline::new(&config, Arc::new(NullConversationLog));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let answer = pipeline.process(message, &cancel).await;
    println!("{}", answer.reply_text());
    println!();
    println!(
        "[{} via {}, {} attempt(s), {}{}]",
        answer.class.as_str(),
        answer.provider,
        answer.attempts,
        answer.outcome_label(),
        if config.home_assistant.dry_run { ", dry-run" } else { "" }
    );
    Ok(())
}
