//! Natural-key resolution
//!
//! Keys are case-sensitive and trimmed. Single-field kinds use the field value
//! as-is; the timeline's composite key renders as `<year>::<title>`.

use serde_json::Value;

use crate::error::RecordError;
use crate::models::{EntityKind, FieldMap, NaturalKey, Reference};

/// Separator between the parts of a composite key
pub const KEY_SEPARATOR: &str = "::";

/// Derive the natural key of a record and trim its key fields in place
pub fn resolve_key(kind: EntityKind, fields: &mut FieldMap) -> Result<NaturalKey, RecordError> {
    let mut parts = Vec::with_capacity(kind.key_fields().len());

    for name in kind.key_fields() {
        let part = match fields.get(*name) {
            Some(Value::String(s)) => {
                let trimmed = s.trim().to_string();
                if trimmed.is_empty() {
                    return Err(RecordError::input(format!("empty natural key field '{name}'")));
                }
                fields.insert(name.to_string(), Value::String(trimmed.clone()));
                trimmed
            }
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Null) | None => {
                return Err(RecordError::input(format!("missing natural key field '{name}'")));
            }
            Some(other) => {
                return Err(RecordError::input(format!(
                    "natural key field '{name}' has unsupported value {other}"
                )));
            }
        };
        parts.push(part);
    }

    Ok(NaturalKey::new(parts.join(KEY_SEPARATOR)))
}

/// Split a key back into `(field, value)` pairs for building a store lookup
pub fn key_bindings(kind: EntityKind, key: &NaturalKey) -> Result<Vec<(&'static str, Value)>, RecordError> {
    let names = kind.key_fields();
    let raw: Vec<&str> = if names.len() == 1 {
        vec![key.as_str()]
    } else {
        key.as_str().splitn(names.len(), KEY_SEPARATOR).collect()
    };

    if raw.len() != names.len() {
        return Err(RecordError::input(format!(
            "key '{key}' does not have {} parts for {kind}",
            names.len()
        )));
    }

    names
        .iter()
        .zip(raw)
        .map(|(name, part)| {
            let value = match kind.field(name).map(|f| f.field_type) {
                Some(crate::models::FieldType::Integer) => part
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| RecordError::input(format!("key part '{part}' of {name} is not an integer")))?,
                _ => Value::String(part.to_string()),
            };
            Ok((*name, value))
        })
        .collect()
}

/// Collect the foreign references a record makes, trimming reference values
pub fn resolve_references(kind: EntityKind, fields: &mut FieldMap) -> Vec<Reference> {
    let mut refs = Vec::new();

    for spec in kind.reference_fields() {
        let Some(target) = spec.references else { continue };
        if let Some(Value::String(s)) = fields.get(spec.name) {
            let trimmed = s.trim().to_string();
            if trimmed.is_empty() {
                fields.insert(spec.name.to_string(), Value::Null);
                continue;
            }
            fields.insert(spec.name.to_string(), Value::String(trimmed.clone()));
            refs.push(Reference {
                field: spec.name.to_string(),
                kind: target,
                key: NaturalKey::new(trimmed),
            });
        }
    }

    refs
}
