//! Seed file loading
//!
//! The seed file is a JSON object holding one list per entity kind. A file
//! that cannot be read or parsed aborts the run; a malformed entry only fails
//! that entry.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use super::resolver;
use super::types::RecordFailure;
use crate::error::{RecordError, SyncError};
use crate::models::seed::decode_entry;
use crate::models::{EntityKind, SeedRecord};

/// Validated seed records of the selected kinds plus per-entry failures
#[derive(Debug, Clone, Default)]
pub struct SeedSet {
    pub records: BTreeMap<EntityKind, Vec<SeedRecord>>,
    pub failures: Vec<RecordFailure>,
}

impl SeedSet {
    #[cfg(test)]
    pub fn records_for(&self, kind: EntityKind) -> &[SeedRecord] {
        self.records.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total_records(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }
}

/// Read and validate the seed file at `path` for the given kinds
pub fn load_seed_file(path: &Path, kinds: &[EntityKind]) -> Result<SeedSet, SyncError> {
    let text = std::fs::read_to_string(path).map_err(|e| SyncError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_seed_document(&text, path, kinds)
}

/// Validate an already-read seed document
pub fn parse_seed_document(
    text: &str,
    path: &Path,
    kinds: &[EntityKind],
) -> Result<SeedSet, SyncError> {
    let parse_error = |message: String| SyncError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let document: Value = serde_json::from_str(text).map_err(|e| parse_error(e.to_string()))?;
    let Value::Object(mut lists) = document else {
        return Err(parse_error("top level must be a JSON object".to_string()));
    };

    let mut set = SeedSet::default();

    for &kind in kinds {
        let entries = match lists.remove(kind.seed_list_name()) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(entries)) => entries,
            Some(_) => {
                return Err(parse_error(format!(
                    "'{}' must be a list",
                    kind.seed_list_name()
                )));
            }
        };

        let mut records = Vec::with_capacity(entries.len());
        for (index, raw) in entries.into_iter().enumerate() {
            match decode_record(kind, index, raw) {
                Ok(record) => records.push(record),
                Err((key, error)) => {
                    log::warn!("Skipping {} entry #{}: {}", kind, index, error);
                    set.failures.push(RecordFailure {
                        kind,
                        key,
                        index: Some(index),
                        error,
                    });
                }
            }
        }

        log::debug!("Loaded {} {} seed records", records.len(), kind);
        set.records.insert(kind, records);
    }

    Ok(set)
}

fn decode_record(
    kind: EntityKind,
    index: usize,
    raw: Value,
) -> Result<SeedRecord, (Option<crate::models::NaturalKey>, RecordError)> {
    let mut fields = decode_entry(kind, raw).map_err(|e| (None, RecordError::input(e)))?;
    let key = resolver::resolve_key(kind, &mut fields).map_err(|e| (None, e))?;
    let references = resolver::resolve_references(kind, &mut fields);

    Ok(SeedRecord {
        kind,
        key,
        index,
        fields,
        references,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SEED: &str = r#"{
        "heritage_categories": [
            {"name": "temples", "name_zh": "寺廟"},
            {"name": "  ", "name_zh": "空白"},
            {"name_zh": "no name"}
        ],
        "heritage_sites": [
            {"name": "Villa", "name_zh": "別莊", "slug": "villa", "category_name": "temples"}
        ],
        "news": []
    }"#;

    fn all_kinds() -> Vec<EntityKind> {
        EntityKind::all().to_vec()
    }

    #[test]
    fn test_malformed_entries_are_reported_not_fatal() {
        let set = parse_seed_document(SEED, Path::new("seed.json"), &all_kinds()).unwrap();

        assert_eq!(set.records_for(EntityKind::Categories).len(), 1);
        assert_eq!(set.failures.len(), 2);
        assert_eq!(set.failures[0].index, Some(1));
        assert_eq!(set.failures[1].index, Some(2));
        assert!(set.failures.iter().all(|f| f.error.label() == "InputError"));
    }

    #[test]
    fn test_missing_lists_are_empty() {
        let set = parse_seed_document(SEED, Path::new("seed.json"), &all_kinds()).unwrap();
        assert!(set.records_for(EntityKind::Timeline).is_empty());
        assert!(set.records_for(EntityKind::Media).is_empty());
    }

    #[test]
    fn test_only_selected_kinds_are_loaded() {
        let set =
            parse_seed_document(SEED, Path::new("seed.json"), &[EntityKind::Sites]).unwrap();
        assert!(set.records_for(EntityKind::Categories).is_empty());
        assert!(set.failures.is_empty());

        let site = &set.records_for(EntityKind::Sites)[0];
        assert_eq!(site.references.len(), 1);
        assert_eq!(site.references[0].key.as_str(), "temples");
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = parse_seed_document("{ nope", Path::new("seed.json"), &all_kinds()).unwrap_err();
        assert_eq!(err.label(), "ParseError");
    }

    #[test]
    fn test_list_of_wrong_type_is_parse_error() {
        let err = parse_seed_document(
            r#"{"news": {"slug": "x"}}"#,
            Path::new("seed.json"),
            &[EntityKind::News],
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Parse { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SEED.as_bytes()).unwrap();

        let set = load_seed_file(file.path(), &all_kinds()).unwrap();
        assert_eq!(set.total_records(), 2);
    }

    #[test]
    fn test_missing_file_is_parse_error() {
        let err = load_seed_file(Path::new("/nonexistent/seed.json"), &all_kinds()).unwrap_err();
        assert_eq!(err.label(), "ParseError");
    }
}
