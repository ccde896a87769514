use homebot_home::{HomeApi, HomeAssistantClient};
use homebot_providers::create_provider;
use std::io::{self, Write};

use super::Context;

pub async fn provider(ctx: &Context) -> anyhow::Result<()> {
    let config = ctx.load()?;
    let active = config.providers.active;
    let provider = create_provider(&config.providers)?;

    print!("{} ({}) ... ", active, provider.name());
    io::stdout().flush()?;
    match provider.probe().await {
        Ok(()) => println!("✓ reachable"),
        Err(e) => {
            println!("✗ {}", e);
            anyhow::bail!("provider probe failed");
        }
    }
    Ok(())
}

pub async fn home(ctx: &Context) -> anyhow::Result<()> {
    let config = ctx.load()?;
    let client = HomeAssistantClient::from_config(&config.home_assistant);

    print!("{} ... ", config.home_assistant.base_url);
    io::stdout().flush()?;
    if let Err(e) = client.ping().await {
        println!("✗ {}", e);
        anyhow::bail!("Home Assistant probe failed");
    }
    println!("✓ reachable");

    let states = client.list_states().await?;
    let services = client.list_services().await?;
    println!("  {} entities, {} services", states.len(), services.len());
    if !config.home_assistant.exposed_entities.is_empty() {
        println!(
            "  {} entities exposed to the bot",
            config.home_assistant.exposed_entities.len()
        );
    }
    Ok(())
}
