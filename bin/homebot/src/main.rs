mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "homebot")]
#[command(about = "Telegram assistant that drives Home Assistant through an LLM", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (default: ~/.homebot/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Onboard {
        #[arg(long)]
        force: bool,
    },

    /// Show configuration and readiness
    Status,

    /// Run the bot until Ctrl-C, restarting on config changes
    Run,

    /// Send one message through the pipeline and print the reply
    Ask { message: String },

    /// Probe the active LLM provider
    TestProvider,

    /// Probe the Home Assistant API
    TestHome,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    let ctx = commands::Context::new(cli.config);

    match cli.command {
        Commands::Onboard { force } => commands::onboard::run(&ctx, force).await?,
        Commands::Status => commands::status::run(&ctx).await?,
        Commands::Run => commands::run_cmd::run(&ctx).await?,
        Commands::Ask { message } => commands::ask::run(&ctx, &message).await?,
        Commands::TestProvider => commands::probe::provider(&ctx).await?,
        Commands::TestHome => commands::probe::home(&ctx).await?,
    }

    Ok(())
}
