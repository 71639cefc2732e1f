//! Command handlers and the output helpers they share

pub mod media;
pub mod seed;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use colored::*;
use is_terminal::IsTerminal;
use std::future::Future;
use std::path::PathBuf;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::models::EntityKind;
use crate::store::{SqliteStore, StoreError};
use crate::sync::report::{RunReport, EXIT_OK};
use crate::sync::types::RunState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Colored summary
    #[default]
    Text,
    /// Machine-readable report
    Json,
}

/// Report options shared by every reconciling command
#[derive(Debug, Clone, Args)]
pub struct ReportArgs {
    /// How to print the report
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Also write the report to a file (.json or .xlsx)
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

/// Open the configured database
///
/// A normal run brings the schema up to date first. A dry run opens the
/// database read-only and only checks that the schema is current, so it
/// never creates or migrates anything.
pub async fn open_store(config: &SyncConfig, dry_run: bool) -> Result<SqliteStore, StoreError> {
    let store = SqliteStore::connect(&config.database_url, config.acquire_timeout, dry_run).await?;
    if dry_run {
        store.check_schema().await?;
    } else {
        store.migrate().await?;
    }
    Ok(store)
}

pub async fn handle_migrate_command(config: &SyncConfig) -> Result<i32> {
    open_store(config, false)
        .await
        .with_context(|| format!("Failed to migrate {}", config.database_url))?;
    println!(
        "{} {}",
        "Database schema is up to date:".green(),
        config.database_url
    );
    Ok(EXIT_OK)
}

/// Report for a run that failed before it could start
pub fn failed_report(
    command: &str,
    dry_run: bool,
    reset: bool,
    kinds: &[EntityKind],
    error: &SyncError,
) -> RunReport {
    log::error!("{} could not start: {}", command, error);
    let mut report = RunReport::new(command, dry_run, reset);
    report.finish(
        RunState::RolledBack,
        kinds,
        None,
        &Default::default(),
        Some(error),
    );
    report
}

/// Ask before a destructive run
///
/// `--yes` skips the prompt; without a terminal to ask on, `--yes` is
/// required.
pub fn confirm_destructive(prompt: &str, yes: bool) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        anyhow::bail!("Refusing to run non-interactively without --yes: {}", prompt);
    }

    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Failed to read confirmation")
}

/// Drive a run to completion unless the operator interrupts it first
///
/// Dropping the run future drops its open transaction, which rolls back.
pub async fn run_until_cancelled<F>(
    run: F,
    command: &str,
    dry_run: bool,
    reset: bool,
    kinds: &[EntityKind],
) -> RunReport
where
    F: Future<Output = RunReport>,
{
    tokio::select! {
        report = run => report,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("Interrupted; rolling back");
            failed_report(command, dry_run, reset, kinds, &SyncError::Cancelled)
        }
    }
}

/// Print the report, write the optional export, and return the exit code
pub fn emit_report(report: &RunReport, args: &ReportArgs) -> Result<i32> {
    match args.format {
        OutputFormat::Text => print!("{}", report.render_text(std::io::stdout().is_terminal())),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }

    if let Some(path) = &args.report {
        report.export(path)?;
    }

    Ok(report.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::sync::report::EXIT_FATAL;
    use crate::sync::{Reconciler, SeedOptions};
    use serde_json::json;
    use std::io::Write;

    fn config_for(path: &std::path::Path) -> SyncConfig {
        SyncConfig {
            database_url: format!("sqlite://{}", path.display()),
            ..SyncConfig::default()
        }
    }

    #[tokio::test]
    async fn test_dry_run_does_not_create_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content.db");

        let err = open_store(&config_for(&path), true).await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_dry_run_does_not_migrate_existing_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content.db");
        let config = config_for(&path);
        SqliteStore::connect(&config.database_url, config.acquire_timeout, false)
            .await
            .unwrap();
        let size = std::fs::metadata(&path).unwrap().len();

        let err = open_store(&config, true).await.unwrap_err();
        assert!(matches!(err, StoreError::SchemaOutdated { .. }));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), size);
    }

    #[tokio::test]
    async fn test_sqlite_dry_run_leaves_rows_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content.db");
        let config = config_for(&path);
        open_store(&config, false).await.unwrap();

        let mut seed = tempfile::NamedTempFile::new().unwrap();
        let doc = json!({"heritage_categories": [{"name": "temples", "name_zh": "寺廟"}]});
        seed.write_all(doc.to_string().as_bytes()).unwrap();

        let store = open_store(&config, true).await.unwrap();
        let mut reconciler = Reconciler::new(&store, &config);
        let report = reconciler
            .run_seed(&SeedOptions {
                dry_run: true,
                seed_path: Some(seed.path().to_path_buf()),
                ..SeedOptions::default()
            })
            .await;
        assert_eq!(report.state, RunState::DryRunReport, "{}", report.render_text(false));
        assert_eq!(report.summaries[0].created, 1);

        let store = open_store(&config, false).await.unwrap();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.list(EntityKind::Categories).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_store_still_produces_report() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(&dir.path().join("missing").join("content.db"));

        let err = open_store(&config, false).await.unwrap_err();
        let report = failed_report("seed", false, false, EntityKind::all(), &err.into());

        assert_eq!(report.state, RunState::RolledBack);
        assert_eq!(report.fatal_error.as_ref().unwrap().kind, "StoreError");
        assert_eq!(report.summaries.len(), EntityKind::all().len());
        assert_eq!(report.exit_code(), EXIT_FATAL);
        assert!(report.to_json().unwrap().contains("StoreError"));
    }

    #[test]
    fn test_missing_bucket_credentials_produce_report() {
        let mut config = SyncConfig::default();
        config.s3.access_key_id = None;
        let err = crate::storage::S3ObjectStore::from_config(&config.s3).unwrap_err();

        let report = failed_report("media sync", true, false, &[EntityKind::Media], &err.into());
        assert_eq!(report.fatal_error.as_ref().unwrap().kind, "StorageError");
        assert_eq!(report.exit_code(), EXIT_FATAL);
    }
}
