//! Relay CLI - Main entry point

mod cli;

use clap::{Parser, Subcommand};
use relay_foundation::RelayConfig;
use relay_task::TaskPriority;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Relay - dispatch tasks to a command-execution CLI
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file to use instead of the global + project config
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a task, run it and stream its output until it ends
    Run {
        /// Task title
        #[arg(short, long)]
        title: String,

        /// Task description; this is the command text handed to the bridge
        #[arg(short = 'D', long)]
        description: String,

        /// high, medium or low
        #[arg(short, long)]
        priority: Option<String>,

        /// Context entry id to link (repeatable)
        #[arg(long = "context")]
        contexts: Vec<String>,
    },
    /// Connect the capability servers and print their status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = match &args.config {
        Some(path) => RelayConfig::load_from(path)?,
        None => RelayConfig::load()?,
    };

    match args.command {
        Command::Run {
            title,
            description,
            priority,
            contexts,
        } => {
            let priority = priority.map(|p| p.parse::<TaskPriority>()).transpose()?;
            let ok = cli::run_task(&config, &title, &description, priority, contexts).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Command::Status => cli::show_status(&config).await?,
    }

    Ok(())
}
