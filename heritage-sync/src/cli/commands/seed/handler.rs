//! Seed command handler

use anyhow::Result;
use colored::*;

use super::SeedArgs;
use crate::cli::commands::{
    confirm_destructive, emit_report, failed_report, open_store, run_until_cancelled,
};
use crate::config::SyncConfig;
use crate::models::EntityKind;
use crate::sync::report::EXIT_OK;
use crate::sync::{Reconciler, SeedOptions};

pub async fn handle_seed_command(args: SeedArgs, config: &SyncConfig) -> Result<i32> {
    let kinds = args
        .tables
        .map(|t| t.0)
        .unwrap_or_else(|| EntityKind::all().to_vec());

    if args.reset && !args.dry_run {
        let names: Vec<&str> = kinds.iter().map(|k| k.cli_name()).collect();
        let prompt = format!(
            "Delete ALL rows of {} in {} before reseeding?",
            names.join(", "),
            config.database_url
        );
        if !confirm_destructive(&prompt, args.yes)? {
            println!("{}", "Aborted; nothing was changed.".yellow());
            return Ok(EXIT_OK);
        }
    }

    let store = match open_store(config, args.dry_run).await {
        Ok(store) => store,
        Err(e) => {
            let report = failed_report("seed", args.dry_run, args.reset, &kinds, &e.into());
            return emit_report(&report, &args.output);
        }
    };
    let options = SeedOptions {
        kinds: kinds.clone(),
        reset: args.reset,
        dry_run: args.dry_run,
        seed_path: args.seed,
    };

    let mut reconciler = Reconciler::new(&store, config);
    let report = run_until_cancelled(
        reconciler.run_seed(&options),
        "seed",
        options.dry_run,
        options.reset,
        &kinds,
    )
    .await;

    emit_report(&report, &args.output)
}
