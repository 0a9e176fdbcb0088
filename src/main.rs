//! Main entry point for the translation router CLI

#![forbid(unsafe_code)]

use clap::Parser;
use dotenvy::dotenv;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod core;

use cli::commands::Commands;

/// Multi-backend translation router for technical catalog phrases
#[derive(Parser, Debug)]
#[command(name = "polyroute", version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Maximum concurrent translation jobs
    #[arg(long)]
    max_concurrent: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}={}", env!("CARGO_PKG_NAME"), log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(max_concurrent) = args.max_concurrent {
        std::env::set_var("MAX_CONCURRENT", max_concurrent.to_string());
    }

    // Execute command
    match args.command {
        Some(Commands::Run {
            catalog,
            glossary,
            output,
            targets,
            config,
            budget,
            concurrency,
            memory,
        }) => {
            cli::commands::handle_run(
                catalog, glossary, output, targets, config, budget, concurrency, memory,
            )
            .await?;
        }
        Some(Commands::Glossary { file }) => {
            cli::commands::handle_glossary(file).await?;
        }
        None => {
            println!("Please specify a command. Use --help for more information.");
        }
    }

    Ok(())
}
