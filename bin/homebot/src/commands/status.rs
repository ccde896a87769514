use homebot_core::config::TelegramMode;

use super::Context;

fn mark(ok: bool) -> &'static str {
    if ok {
        "✓"
    } else {
        "✗"
    }
}

pub async fn run(ctx: &Context) -> anyhow::Result<()> {
    println!("homebot status");
    println!("==============");
    println!();

    let exists = ctx.config_path.exists();
    println!(
        "Config:    {} {}",
        ctx.config_path.display(),
        if exists { "✓" } else { "✗ (not found)" }
    );
    if !exists {
        println!();
        println!("Run `homebot onboard` to initialize.");
        return Ok(());
    }

    let config = ctx.load()?;

    let active = config.providers.active;
    let provider = config.providers.active_config();
    let needs_key = active != homebot_core::ProviderKind::Ollama;
    println!();
    println!("Provider:  {} (model: {})", active, if provider.model.is_empty() { "default" } else { provider.model.as_str() });
    if needs_key {
        println!("  api key  {}", mark(!provider.api_key.is_empty()));
    }

    let tg = &config.telegram;
    println!();
    println!("Telegram:  {}", if tg.enabled { "enabled" } else { "disabled" });
    println!("  token    {}", mark(!tg.token.is_empty()));
    println!(
        "  mode     {}",
        match tg.mode {
            TelegramMode::Polling => "polling".to_string(),
            TelegramMode::Webhook => format!("webhook ({})", tg.webhook.url),
        }
    );
    println!("  chats    {} allowed", tg.allowed_chat_ids.len());
    println!("  limit    {}/min per chat", tg.rate_limit_per_minute);

    let ha = &config.home_assistant;
    println!();
    println!("Home Assistant: {}", ha.base_url);
    println!("  token    {}", mark(!ha.token.is_empty()));
    println!("  dry-run  {}", if ha.dry_run { "on" } else { "off" });

    println!();
    match config.telegram_ready() {
        Ok(()) if tg.enabled => println!("Ready to run."),
        Ok(()) => println!("Bot is disabled (telegram.enabled = false)."),
        Err(e) => println!("Not ready: {}", e),
    }

    Ok(())
}
