//! `heritage-sync seed`

mod handler;

pub use handler::handle_seed_command;

use clap::Args;
use std::path::PathBuf;

use super::ReportArgs;
use crate::models::{EntityKind, UnknownKind};

/// Comma-separated kind names, in dependency order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables(pub Vec<EntityKind>);

impl Tables {
    fn parse(raw: &str) -> Result<Self, UnknownKind> {
        EntityKind::parse_list(raw).map(Tables)
    }
}

#[derive(Debug, Clone, Args)]
pub struct SeedArgs {
    /// Seed file (defaults to SEED_DATA_PATH or seed_data.json)
    #[arg(long, value_name = "FILE")]
    pub seed: Option<PathBuf>,

    /// Only reconcile these kinds: categories, sites, visit_info, timeline, news, media
    #[arg(long, value_name = "KINDS", value_parser = Tables::parse)]
    pub tables: Option<Tables>,

    /// Delete every existing row of the selected kinds before reseeding
    #[arg(long)]
    pub reset: bool,

    /// Compute and report the plan without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Do not ask for confirmation before a reset
    #[arg(short, long)]
    pub yes: bool,

    #[command(flatten)]
    pub output: ReportArgs,
}
