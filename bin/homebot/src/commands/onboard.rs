use homebot_core::Config;
use std::io::{self, Write};

use super::Context;

pub async fn run(ctx: &Context, force: bool) -> anyhow::Result<()> {
    if ctx.config_path.exists() && !force {
        print!("Config already exists. Overwrite? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    ctx.paths.ensure_dirs()?;
    Config::default().save(&ctx.config_path)?;
    println!("✓ Created config: {}", ctx.config_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Set telegram.token and telegram.allowedChatIds");
    println!("  2. Set homeAssistant.baseUrl and homeAssistant.token");
    println!("  3. Pick providers.active (ollama, openai or gemini)");
    println!("  4. Run `homebot status`, then `homebot run`");
    println!();
    println!("homeAssistant.dryRun is on: service calls are logged, not sent.");

    Ok(())
}
