//! Command-line interface

pub mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::SyncConfig;
use commands::media::MediaCommands;
use commands::seed::SeedArgs;

#[derive(Debug, Parser)]
#[command(name = "heritage-sync", version, about = "Seed and sync heritage-sites content")]
pub struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to <config dir>/heritage-sync/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Reconcile the content tables with the seed file
    Seed(SeedArgs),
    /// Reconcile media records with the S3 bucket
    #[command(subcommand)]
    Media(MediaCommands),
    /// Apply pending database migrations
    Migrate,
}

/// Run the parsed command and return the process exit code
pub async fn run(cli: Cli) -> Result<i32> {
    let config = SyncConfig::load(cli.config.as_deref())?;
    log::debug!(
        "Using database {} ({:?} environment)",
        config.database_url,
        config.environment
    );

    match cli.command {
        Commands::Seed(args) => commands::seed::handle_seed_command(args, &config).await,
        Commands::Media(command) => commands::media::handle_media_command(command, &config).await,
        Commands::Migrate => commands::handle_migrate_command(&config).await,
    }
}
