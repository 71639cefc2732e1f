//! Media command handlers

use anyhow::Result;
use colored::*;

use super::{MediaCommands, MediaPruneArgs, MediaSyncArgs};
use crate::cli::commands::{
    confirm_destructive, emit_report, failed_report, open_store, run_until_cancelled,
};
use crate::config::SyncConfig;
use crate::models::EntityKind;
use crate::storage::S3ObjectStore;
use crate::sync::media::folder_prefix;
use crate::sync::report::EXIT_OK;
use crate::sync::{MediaPruneOptions, MediaSyncOptions, Reconciler};

pub async fn handle_media_command(command: MediaCommands, config: &SyncConfig) -> Result<i32> {
    match command {
        MediaCommands::Sync(args) => handle_sync(args, config).await,
        MediaCommands::Prune(args) => handle_prune(args, config).await,
    }
}

async fn handle_sync(args: MediaSyncArgs, config: &SyncConfig) -> Result<i32> {
    let kinds = [EntityKind::Media];
    let bucket = match S3ObjectStore::from_config(&config.s3) {
        Ok(bucket) => bucket,
        Err(e) => {
            let report = failed_report("media sync", args.dry_run, false, &kinds, &e.into());
            return emit_report(&report, &args.output);
        }
    };
    let scope = if args.all {
        "all objects".to_string()
    } else if args.prefix.is_empty() {
        config.gallery_prefix.clone()
    } else {
        args.prefix.join(", ")
    };
    log::info!("Scanning s3://{} ({})", config.s3.bucket, scope);

    let store = match open_store(config, args.dry_run).await {
        Ok(store) => store,
        Err(e) => {
            let report = failed_report("media sync", args.dry_run, false, &kinds, &e.into());
            return emit_report(&report, &args.output);
        }
    };
    let options = MediaSyncOptions {
        prefixes: args.prefix,
        all: args.all,
        dry_run: args.dry_run,
    };

    let mut reconciler = Reconciler::new(&store, config);
    let report = run_until_cancelled(
        reconciler.run_media_sync(&bucket, &options),
        "media sync",
        options.dry_run,
        false,
        &kinds,
    )
    .await;

    emit_report(&report, &args.output)
}

async fn handle_prune(args: MediaPruneArgs, config: &SyncConfig) -> Result<i32> {
    let keep = args
        .keep_prefix
        .clone()
        .unwrap_or_else(|| config.gallery_prefix.clone());

    if !args.dry_run {
        let prompt = format!(
            "Delete every media record outside '{}' from {}?",
            folder_prefix(&keep),
            config.database_url
        );
        if !confirm_destructive(&prompt, args.yes)? {
            println!("{}", "Aborted; nothing was changed.".yellow());
            return Ok(EXIT_OK);
        }
    }

    let kinds = [EntityKind::Media];
    let store = match open_store(config, args.dry_run).await {
        Ok(store) => store,
        Err(e) => {
            let report = failed_report("media prune", args.dry_run, false, &kinds, &e.into());
            return emit_report(&report, &args.output);
        }
    };
    let options = MediaPruneOptions {
        keep_prefix: Some(keep),
        dry_run: args.dry_run,
    };

    let mut reconciler = Reconciler::new(&store, config);
    let report = run_until_cancelled(
        reconciler.run_media_prune(&options),
        "media prune",
        options.dry_run,
        false,
        &kinds,
    )
    .await;

    emit_report(&report, &args.output)
}
