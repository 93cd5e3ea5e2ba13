//! Shelfwise CLI, the main entry point.
//!
//! Commands:
//! - `query`      Query one shelf with `key=value` parameters
//! - `view`       Run a composed view
//! - `views`      List the available views
//! - `connectors` List configured connectors
//! - `config`     Show, locate, or validate configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "shelfwise",
    about = "Shelfwise: real-time data-access mediator for agents",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.shelfwise/config.toml
    #[arg(short, long, global = true, env = "SHELFWISE_CONFIG")]
    config: Option<PathBuf>,

    /// Agent id to act as
    #[arg(long, global = true, default_value = "cli")]
    agent: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Query a shelf (identity, comms, calendar, docs, tasks)
    Query {
        shelf: String,
        /// Parameters as key=value, e.g. due_date_before=today status=pending
        params: Vec<String>,
    },

    /// Run a composed view
    View {
        name: String,
        /// Parameters as key=value, e.g. query=roadmap limit=5
        params: Vec<String>,
    },

    /// List available views
    Views,

    /// List configured connectors
    Connectors {
        /// Authenticate each connector and report the outcome
        #[arg(long)]
        check: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (secrets masked)
    Show,
    /// Print the config file path
    Path,
    /// Validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays pure JSON
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Query { shelf, params } => {
            commands::query::run(config_path, &cli.agent, &shelf, &params).await?
        }
        Commands::View { name, params } => {
            commands::view::run(config_path, &cli.agent, &name, &params).await?
        }
        Commands::Views => commands::view::list()?,
        Commands::Connectors { check } => commands::connectors::run(config_path, check).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Path => commands::config_cmd::path(config_path)?,
            ConfigAction::Validate => commands::config_cmd::validate(config_path)?,
        },
    }

    Ok(())
}
