//! Reconciliation runs
//!
//! A run walks `Idle -> Loading -> Diffing -> (DryRunReport | Applying ->
//! Committed | Applying -> RolledBack)`. Every read and write goes through a
//! single store transaction. Fatal errors end the run in `RolledBack`; a
//! report is returned whatever the outcome.

use std::path::PathBuf;

use super::apply::{apply_plan, ApplyLog};
use super::diff::diff_kind;
use super::media::{plan_media_prune, plan_media_sync};
use super::report::RunReport;
use super::seed_loader::{load_seed_file, SeedSet};
use super::types::{Action, ReconciliationPlan, RunState};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::models::EntityKind;
use crate::storage::ObjectStore;
use crate::store::{Store, StoreTransaction};

/// What a seed run should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedOptions {
    /// Kinds to reconcile, in dependency order
    pub kinds: Vec<EntityKind>,
    /// Delete every existing row of the selected kinds before reseeding
    pub reset: bool,
    pub dry_run: bool,
    /// Overrides the configured seed file
    pub seed_path: Option<PathBuf>,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            kinds: EntityKind::all().to_vec(),
            reset: false,
            dry_run: false,
            seed_path: None,
        }
    }
}

/// What a media sync run should scan
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaSyncOptions {
    /// Prefixes to list; empty means the configured gallery prefix
    pub prefixes: Vec<String>,
    /// List the whole bucket, ignoring `prefixes`
    pub all: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaPruneOptions {
    /// Prefix whose records survive; defaults to the configured gallery prefix
    pub keep_prefix: Option<String>,
    pub dry_run: bool,
}

/// Runs reconciliations against one store
pub struct Reconciler<'a> {
    store: &'a dyn Store,
    config: &'a SyncConfig,
    state: RunState,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn Store, config: &'a SyncConfig) -> Self {
        Self {
            store,
            config,
            state: RunState::Idle,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) {
        log::debug!("Run state: {} -> {}", self.state.label(), next.label());
        self.state = next;
    }

    /// Reconcile the seed file with the store
    pub async fn run_seed(&mut self, options: &SeedOptions) -> RunReport {
        let mut report = RunReport::new("seed", options.dry_run, options.reset);
        let kinds = options.kinds.as_slice();
        let seed_path = options
            .seed_path
            .clone()
            .unwrap_or_else(|| self.config.seed_path.clone());

        self.state = RunState::Idle;
        self.transition(RunState::Loading);
        log::info!(
            "Loading seed data from {} ({})",
            seed_path.display(),
            kinds.iter().map(|k| k.cli_name()).collect::<Vec<_>>().join(", ")
        );

        let seeds = match load_seed_file(&seed_path, kinds) {
            Ok(seeds) => seeds,
            Err(e) => {
                self.abort(&mut report, kinds, None, &ApplyLog::default(), e);
                return report;
            }
        };
        log::info!(
            "Loaded {} seed records ({} rejected)",
            seeds.total_records(),
            seeds.failures.len()
        );
        let mut progress = ApplyLog {
            applied: Vec::new(),
            failures: seeds.failures.clone(),
        };

        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                self.abort(&mut report, kinds, None, &progress, e.into());
                return report;
            }
        };

        self.transition(RunState::Diffing);
        let plan = match build_seed_plan(&mut *tx, seeds, kinds, options.reset).await {
            Ok(plan) => plan,
            Err(e) => {
                discard(tx).await;
                self.abort(&mut report, kinds, None, &progress, e);
                return report;
            }
        };

        self.execute(tx, plan, options.dry_run, kinds, &mut progress, &mut report)
            .await;
        report
    }

    /// Create media records for objects in the bucket that have none
    pub async fn run_media_sync(
        &mut self,
        objects: &dyn ObjectStore,
        options: &MediaSyncOptions,
    ) -> RunReport {
        let mut report = RunReport::new("media sync", options.dry_run, false);
        let kinds = [EntityKind::Media];
        let prefixes: Vec<String> = if options.all {
            Vec::new()
        } else if options.prefixes.is_empty() {
            vec![self.config.gallery_prefix.clone()]
        } else {
            options.prefixes.clone()
        };

        self.state = RunState::Idle;
        self.transition(RunState::Loading);
        let mut listed = Vec::new();
        let scan: Vec<&str> = if prefixes.is_empty() {
            vec![""]
        } else {
            prefixes.iter().map(String::as_str).collect()
        };
        for prefix in scan {
            match objects.list_objects(prefix).await {
                Ok(found) => {
                    log::info!("Found {} objects under '{}'", found.len(), prefix);
                    listed.extend(found);
                }
                Err(e) => {
                    self.abort(&mut report, &kinds, None, &ApplyLog::default(), e.into());
                    return report;
                }
            }
        }

        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                self.abort(&mut report, &kinds, None, &ApplyLog::default(), e.into());
                return report;
            }
        };

        self.transition(RunState::Diffing);
        let persisted = match tx.list(EntityKind::Media).await {
            Ok(rows) => rows,
            Err(e) => {
                discard(tx).await;
                self.abort(&mut report, &kinds, None, &ApplyLog::default(), e.into());
                return report;
            }
        };

        let mut progress = ApplyLog::default();
        let kind_plan = plan_media_sync(
            &listed,
            &persisted,
            &prefixes,
            |key| objects.public_url(key),
            &mut progress.failures,
        );
        let plan = ReconciliationPlan {
            kinds: vec![kind_plan],
        };

        self.execute(tx, plan, options.dry_run, &kinds, &mut progress, &mut report)
            .await;
        report
    }

    /// Delete media records outside the kept prefix
    pub async fn run_media_prune(&mut self, options: &MediaPruneOptions) -> RunReport {
        let mut report = RunReport::new("media prune", options.dry_run, false);
        let kinds = [EntityKind::Media];
        let keep = options
            .keep_prefix
            .clone()
            .unwrap_or_else(|| self.config.gallery_prefix.clone());

        self.state = RunState::Idle;
        self.transition(RunState::Loading);
        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                self.abort(&mut report, &kinds, None, &ApplyLog::default(), e.into());
                return report;
            }
        };

        self.transition(RunState::Diffing);
        let persisted = match tx.list(EntityKind::Media).await {
            Ok(rows) => rows,
            Err(e) => {
                discard(tx).await;
                self.abort(&mut report, &kinds, None, &ApplyLog::default(), e.into());
                return report;
            }
        };
        let plan = ReconciliationPlan {
            kinds: vec![plan_media_prune(&persisted, &keep)],
        };
        log::info!(
            "{} of {} media records are outside '{}'",
            plan.kinds[0].deletions.len(),
            persisted.len(),
            keep
        );

        let mut progress = ApplyLog::default();
        self.execute(tx, plan, options.dry_run, &kinds, &mut progress, &mut report)
            .await;
        report
    }

    /// Apply `plan`, then commit, roll back or discard the transaction
    async fn execute(
        &mut self,
        mut tx: Box<dyn StoreTransaction>,
        plan: ReconciliationPlan,
        dry_run: bool,
        kinds: &[EntityKind],
        progress: &mut ApplyLog,
        report: &mut RunReport,
    ) {
        if plan.is_noop() {
            log::info!("Store already matches the source; nothing to change");
        } else {
            log::info!(
                "Plan: {} to create, {} to update, {} to delete, {} unchanged",
                plan.count(Action::Create),
                plan.count(Action::Update),
                plan.count(Action::Delete),
                plan.count(Action::Skip)
            );
        }

        if dry_run {
            let result = apply_plan(&mut *tx, &plan, true, progress).await;
            discard(tx).await;
            match result {
                Ok(()) => {
                    self.transition(RunState::DryRunReport);
                    report.finish(RunState::DryRunReport, kinds, Some(&plan), progress, None);
                }
                Err(e) => self.abort(report, kinds, Some(&plan), progress, e),
            }
            return;
        }

        self.transition(RunState::Applying);
        if let Err(e) = apply_plan(&mut *tx, &plan, false, progress).await {
            discard(tx).await;
            self.abort(report, kinds, Some(&plan), progress, e);
            return;
        }

        match tx.commit().await {
            Ok(()) => {
                self.transition(RunState::Committed);
                let changes = progress
                    .applied
                    .iter()
                    .filter(|e| e.action.is_mutating())
                    .count();
                log::info!("Committed {} changes", changes);
                report.finish(RunState::Committed, kinds, Some(&plan), progress, None);
            }
            Err(e) => self.abort(report, kinds, Some(&plan), progress, e.into()),
        }
    }

    fn abort(
        &mut self,
        report: &mut RunReport,
        kinds: &[EntityKind],
        plan: Option<&ReconciliationPlan>,
        progress: &ApplyLog,
        error: SyncError,
    ) {
        log::error!("Run aborted in state '{}': {}", self.state.label(), error);
        self.transition(RunState::RolledBack);
        report.finish(RunState::RolledBack, kinds, plan, progress, Some(&error));
    }
}

/// Diff every selected kind against its persisted rows
async fn build_seed_plan(
    tx: &mut dyn StoreTransaction,
    mut seeds: SeedSet,
    kinds: &[EntityKind],
    reset: bool,
) -> Result<ReconciliationPlan, SyncError> {
    let mut plan = ReconciliationPlan::default();
    for &kind in kinds {
        let persisted = tx.list(kind).await?;
        let records = seeds.records.remove(&kind).unwrap_or_default();
        plan.kinds.push(diff_kind(kind, records, &persisted, reset));
    }
    Ok(plan)
}

/// Roll back, logging instead of failing: the run is already over
async fn discard(tx: Box<dyn StoreTransaction>) {
    if let Err(e) = tx.rollback().await {
        log::warn!("Rollback failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryObjectStore;
    use crate::store::memory::MemoryStore;
    use crate::store::SqliteStore;
    use crate::sync::report::{EXIT_FATAL, EXIT_OK, EXIT_RECORD_FAILURES};
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn seed_file(doc: serde_json::Value) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(doc.to_string().as_bytes()).unwrap();
        file
    }

    fn options(file: &NamedTempFile) -> SeedOptions {
        SeedOptions {
            seed_path: Some(file.path().to_path_buf()),
            ..SeedOptions::default()
        }
    }

    fn temples() -> serde_json::Value {
        json!({"heritage_categories": [{"name": "temples", "name_zh": "寺廟"}]})
    }

    fn heritage() -> serde_json::Value {
        json!({
            "heritage_categories": [
                {"name": "temples", "name_zh": "寺廟"},
                {"name": "mansions", "name_zh": "宅第"}
            ],
            "heritage_sites": [
                {"name": "Meihe Villa", "name_zh": "梅鶴山莊", "slug": "meihe-villa",
                 "latitude": 25.0375, "longitude": 121.5637, "category_name": "mansions",
                 "designation_date": "1985-08-19", "is_published": true}
            ],
            "visit_info": [
                {"section": "hours", "title": "Opening hours", "title_zh": "開放時間",
                 "extra_data": "{\"weekdays\": \"9-17\"}"}
            ],
            "timeline_events": [
                {"year": 1869, "title": "Founded", "title_zh": "創建"},
                {"year": 1985, "month": 8, "title": "Designated", "title_zh": "指定古蹟"}
            ],
            "news": [
                {"title": "Reopening", "title_zh": "重新開放", "slug": "reopening",
                 "published_at": "2024-03-01T09:00:00+08:00", "is_published": true}
            ]
        })
    }

    #[tokio::test]
    async fn test_temples_example() {
        let store = MemoryStore::new();
        let config = SyncConfig::default();
        let file = seed_file(temples());
        let mut reconciler = Reconciler::new(&store, &config);

        let first = reconciler.run_seed(&options(&file)).await;
        assert_eq!(first.state, RunState::Committed);
        assert_eq!(first.changes.len(), 1);
        assert_eq!(first.changes[0].key.as_str(), "temples");
        assert_eq!(first.summaries[0].created, 1);
        assert_eq!(store.rows(EntityKind::Categories).len(), 1);

        let second = reconciler.run_seed(&options(&file)).await;
        assert_eq!(second.state, RunState::Committed);
        assert!(second.changes.is_empty());
        assert_eq!(second.summaries[0].skipped, 1);
        assert_eq!(store.rows(EntityKind::Categories).len(), 1);
        assert_eq!(second.exit_code(), EXIT_OK);
    }

    #[tokio::test]
    async fn test_second_run_is_all_skips() {
        let store = MemoryStore::new();
        let config = SyncConfig::default();
        let file = seed_file(heritage());
        let mut reconciler = Reconciler::new(&store, &config);

        let first = reconciler.run_seed(&options(&file)).await;
        assert!(first.is_success(), "{}", first.render_text(false));
        assert_eq!(first.totals().created, 7);

        let writes = store.write_count();
        let second = reconciler.run_seed(&options(&file)).await;
        let totals = second.totals();
        assert_eq!(totals.skipped, 7);
        assert_eq!(totals.created + totals.updated + totals.deleted, 0);
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn test_dry_run_never_mutates() {
        let store = MemoryStore::new();
        let config = SyncConfig::default();
        let file = seed_file(heritage());
        let mut reconciler = Reconciler::new(&store, &config);
        let before = store.snapshot();

        let report = reconciler
            .run_seed(&SeedOptions {
                dry_run: true,
                reset: true,
                ..options(&file)
            })
            .await;

        assert_eq!(report.state, RunState::DryRunReport);
        assert_eq!(reconciler.state(), RunState::DryRunReport);
        assert_eq!(report.totals().created, 7);
        assert_eq!(store.write_count(), 0);
        assert_eq!(store.snapshot(), before);
        assert_eq!(report.exit_code(), EXIT_OK);
    }

    #[tokio::test]
    async fn test_store_failure_rolls_back_earlier_writes() {
        let store = MemoryStore::new().failing_on_write(3);
        let config = SyncConfig::default();
        let file = seed_file(heritage());
        let mut reconciler = Reconciler::new(&store, &config);

        let report = reconciler.run_seed(&options(&file)).await;

        assert_eq!(report.state, RunState::RolledBack);
        assert_eq!(report.fatal_error.as_ref().unwrap().kind, "StoreError");
        assert_eq!(report.exit_code(), EXIT_FATAL);
        for &kind in EntityKind::all() {
            assert!(store.rows(kind).is_empty(), "{kind} kept rows after rollback");
        }
    }

    #[tokio::test]
    async fn test_update_reports_changed_fields() {
        let store = MemoryStore::new();
        let config = SyncConfig::default();
        let mut reconciler = Reconciler::new(&store, &config);
        reconciler.run_seed(&options(&seed_file(temples()))).await;

        let changed = seed_file(json!({"heritage_categories": [
            {"name": "temples", "name_zh": "廟宇", "description": "Places of worship"}
        ]}));
        let report = reconciler.run_seed(&options(&changed)).await;

        assert_eq!(report.summaries[0].updated, 1);
        let mut fields = report.changes[0].changed_fields();
        fields.sort();
        assert_eq!(fields, vec!["description", "name_zh"]);
        assert_eq!(
            store.rows(EntityKind::Categories)[0].fields["name_zh"],
            json!("廟宇")
        );
    }

    #[tokio::test]
    async fn test_reference_error_fails_only_that_record() {
        let store = MemoryStore::new();
        let config = SyncConfig::default();
        let file = seed_file(json!({
            "heritage_categories": [{"name": "temples", "name_zh": "寺廟"}],
            "heritage_sites": [
                {"name": "A", "name_zh": "甲", "slug": "a", "category_name": "temples"},
                {"name": "B", "name_zh": "乙", "slug": "b", "category_name": "gardens"}
            ]
        }));
        let mut reconciler = Reconciler::new(&store, &config);

        let report = reconciler.run_seed(&options(&file)).await;

        assert_eq!(report.state, RunState::Committed);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error.label(), "ReferenceError");
        assert_eq!(report.exit_code(), EXIT_RECORD_FAILURES);
        assert_eq!(store.rows(EntityKind::Sites).len(), 1);
    }

    #[tokio::test]
    async fn test_input_errors_and_duplicates_are_reported() {
        let store = MemoryStore::new();
        let config = SyncConfig::default();
        let file = seed_file(json!({"news": [
            {"title": "Old", "title_zh": "舊", "slug": "event"},
            {"title": "Broken", "title_zh": "壞", "slug": "broken", "published_at": "someday"},
            {"title": "New", "title_zh": "新", "slug": "event"}
        ]}));
        let mut reconciler = Reconciler::new(&store, &config);

        let report = reconciler.run_seed(&options(&file)).await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error.label(), "InputError");
        assert_eq!(report.duplicates.len(), 1);
        let rows = store.rows(EntityKind::News);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fields["title"], json!("New"));
    }

    #[tokio::test]
    async fn test_table_subset_touches_only_selected_kinds() {
        let store = MemoryStore::new();
        let config = SyncConfig::default();
        let file = seed_file(heritage());
        let mut reconciler = Reconciler::new(&store, &config);

        let report = reconciler
            .run_seed(&SeedOptions {
                kinds: vec![EntityKind::Timeline],
                ..options(&file)
            })
            .await;

        assert_eq!(report.summaries.len(), 1);
        assert_eq!(store.rows(EntityKind::Timeline).len(), 2);
        assert!(store.rows(EntityKind::Categories).is_empty());
        assert!(store.rows(EntityKind::News).is_empty());
    }

    #[tokio::test]
    async fn test_reset_deletes_unmatched_rows() {
        let store = MemoryStore::new();
        let config = SyncConfig::default();
        let mut reconciler = Reconciler::new(&store, &config);
        reconciler
            .run_seed(&options(&seed_file(json!({"heritage_categories": [
                {"name": "temples", "name_zh": "寺廟"},
                {"name": "halls", "name_zh": "廳堂"}
            ]}))))
            .await;

        let file = seed_file(temples());
        let plain = reconciler.run_seed(&options(&file)).await;
        assert_eq!(plain.unmatched.len(), 1);
        assert_eq!(store.rows(EntityKind::Categories).len(), 2);

        let reset = reconciler
            .run_seed(&SeedOptions {
                reset: true,
                ..options(&file)
            })
            .await;
        assert_eq!(reset.summaries[0].deleted, 2);
        assert_eq!(reset.summaries[0].created, 1);
        let rows = store.rows(EntityKind::Categories);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key.as_str(), "temples");
    }

    #[tokio::test]
    async fn test_parse_error_aborts_before_any_write() {
        let store = MemoryStore::new();
        let config = SyncConfig::default();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        let mut reconciler = Reconciler::new(&store, &config);

        let report = reconciler.run_seed(&options(&file)).await;

        assert_eq!(report.state, RunState::RolledBack);
        assert_eq!(report.fatal_error.as_ref().unwrap().kind, "ParseError");
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_sqlite_reset_reseeds_in_dependency_order() {
        let store = SqliteStore::in_memory().await;
        let config = SyncConfig::default();
        let file = seed_file(heritage());
        let mut reconciler = Reconciler::new(&store, &config);

        let first = reconciler.run_seed(&options(&file)).await;
        assert!(first.is_success(), "{}", first.render_text(false));

        let again = reconciler.run_seed(&options(&file)).await;
        assert_eq!(again.totals().skipped, 7, "{}", again.render_text(false));

        let reset = reconciler
            .run_seed(&SeedOptions {
                reset: true,
                ..options(&file)
            })
            .await;
        assert_eq!(reset.state, RunState::Committed, "{}", reset.render_text(false));
        assert_eq!(reset.totals().deleted, 7);
        assert_eq!(reset.totals().created, 7);
    }

    #[tokio::test]
    async fn test_sqlite_rows_with_padded_keys_are_updated_in_place() {
        let store = SqliteStore::in_memory().await;
        store
            .execute_raw("INSERT INTO heritage_categories (name, name_zh) VALUES ('temples ', 'old')")
            .await;
        let config = SyncConfig::default();
        let file = seed_file(temples());
        let mut reconciler = Reconciler::new(&store, &config);

        let report = reconciler.run_seed(&options(&file)).await;
        assert_eq!(report.state, RunState::Committed, "{}", report.render_text(false));
        assert_eq!(report.summaries[0].updated, 1);
        assert_eq!(report.summaries[0].created, 0);

        let reset = reconciler
            .run_seed(&SeedOptions {
                reset: true,
                kinds: vec![EntityKind::Categories],
                ..options(&file)
            })
            .await;
        assert_eq!(reset.state, RunState::Committed, "{}", reset.render_text(false));
        assert_eq!(reset.summaries[0].deleted, 1);
        assert_eq!(reset.summaries[0].created, 1);
    }

    #[tokio::test]
    async fn test_media_sync_creates_missing_and_skips_existing() {
        let store = MemoryStore::new();
        let config = SyncConfig::default();
        let bucket = MemoryObjectStore::new([
            ("images/gallery/hall.jpg", 100),
            ("images/gallery/tour.mp4", 200),
            ("uploads/misc.pdf", 300),
        ]);
        let mut reconciler = Reconciler::new(&store, &config);

        let first = reconciler
            .run_media_sync(&bucket, &MediaSyncOptions::default())
            .await;
        assert_eq!(first.state, RunState::Committed);
        assert_eq!(first.summaries[0].created, 2);

        let second = reconciler
            .run_media_sync(
                &bucket,
                &MediaSyncOptions {
                    all: true,
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(second.summaries[0].created, 1);
        assert_eq!(second.summaries[0].skipped, 2);
        assert_eq!(store.rows(EntityKind::Media).len(), 3);
    }

    #[tokio::test]
    async fn test_media_prune_dry_run_then_apply() {
        let store = MemoryStore::new();
        let config = SyncConfig::default();
        let bucket = MemoryObjectStore::new([
            ("images/gallery/hall.jpg", 100),
            ("uploads/misc.pdf", 300),
        ]);
        let mut reconciler = Reconciler::new(&store, &config);
        reconciler
            .run_media_sync(
                &bucket,
                &MediaSyncOptions {
                    all: true,
                    ..Default::default()
                },
            )
            .await;
        let writes = store.write_count();

        let preview = reconciler
            .run_media_prune(&MediaPruneOptions {
                keep_prefix: None,
                dry_run: true,
            })
            .await;
        assert_eq!(preview.state, RunState::DryRunReport);
        assert_eq!(preview.summaries[0].deleted, 1);
        assert_eq!(store.write_count(), writes);

        let pruned = reconciler
            .run_media_prune(&MediaPruneOptions::default())
            .await;
        assert_eq!(pruned.state, RunState::Committed);
        let rows = store.rows(EntityKind::Media);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key.as_str(), "images/gallery/hall.jpg");
    }
}
