//! `heritage-sync media`

mod handler;

pub use handler::handle_media_command;

use clap::{Args, Subcommand};

use super::ReportArgs;

#[derive(Debug, Clone, Subcommand)]
pub enum MediaCommands {
    /// Create media records for bucket objects that have none
    Sync(MediaSyncArgs),
    /// Delete media records outside the kept prefix (objects are untouched)
    Prune(MediaPruneArgs),
}

#[derive(Debug, Clone, Args)]
pub struct MediaSyncArgs {
    /// Key prefix to scan; repeatable (defaults to images/gallery)
    #[arg(long, value_name = "PREFIX", conflicts_with = "all")]
    pub prefix: Vec<String>,

    /// Scan the whole bucket
    #[arg(long)]
    pub all: bool,

    /// Compute and report the plan without writing anything
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub output: ReportArgs,
}

#[derive(Debug, Clone, Args)]
pub struct MediaPruneArgs {
    /// Records whose key starts with this prefix are kept (defaults to images/gallery/)
    #[arg(long, value_name = "PREFIX")]
    pub keep_prefix: Option<String>,

    /// Report what would be deleted without deleting
    #[arg(long)]
    pub dry_run: bool,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,

    #[command(flatten)]
    pub output: ReportArgs,
}
