//! Typed seed entries per entity kind
//!
//! Each entry of the seed file is decoded into its kind's struct, which
//! supplies defaults and required-field checks, then flattened into a
//! normalized [`FieldMap`] matching the kind's schema.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::kind::{EntityKind, FieldType};
use super::record::FieldMap;

/// Canonical timestamp format stored for timestamp fields
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySeed {
    pub name: String,
    pub name_zh: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteSeed {
    pub name: String,
    pub name_zh: String,
    pub slug: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub description: Option<String>,
    pub description_zh: Option<String>,
    pub history: Option<String>,
    pub history_zh: Option<String>,
    pub featured_image: Option<String>,
    pub images: Option<String>,
    pub designation_level: Option<String>,
    pub designation_date: Option<String>,
    #[serde(default)]
    pub is_published: bool,
    pub category_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitInfoSeed {
    pub section: String,
    pub title: String,
    pub title_zh: String,
    pub content: Option<String>,
    pub content_zh: Option<String>,
    /// Bilingual key-value payload stored as JSON text
    pub extra_data: Option<String>,
    #[serde(default)]
    pub display_order: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEventSeed {
    pub year: i64,
    pub month: Option<i64>,
    pub day: Option<i64>,
    pub era: Option<String>,
    pub era_year: Option<String>,
    pub title: String,
    pub title_zh: String,
    pub description: Option<String>,
    pub description_zh: Option<String>,
    pub image: Option<String>,
    pub category: Option<String>,
    #[serde(default = "default_importance")]
    pub importance: String,
    #[serde(default = "default_true")]
    pub is_published: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsSeed {
    pub title: String,
    pub title_zh: String,
    pub slug: String,
    pub summary: Option<String>,
    pub summary_zh: Option<String>,
    pub content: Option<String>,
    pub content_zh: Option<String>,
    pub featured_image: Option<String>,
    pub images: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub is_published: bool,
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFileSeed {
    pub filename: String,
    pub original_filename: String,
    pub s3_key: String,
    pub public_url: String,
    pub content_type: String,
    pub file_size: Option<i64>,
    pub category: String,
    pub folder: Option<String>,
    pub alt_text: Option<String>,
    pub alt_text_zh: Option<String>,
    pub caption: Option<String>,
    pub caption_zh: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

fn default_true() -> bool {
    true
}

fn default_importance() -> String {
    "normal".to_string()
}

/// Decode one raw seed entry into the normalized fields of `kind`
pub fn decode_entry(kind: EntityKind, raw: Value) -> Result<FieldMap, String> {
    let fields = match kind {
        EntityKind::Categories => typed::<CategorySeed>(raw)?,
        EntityKind::Sites => typed::<SiteSeed>(raw)?,
        EntityKind::VisitInfo => typed::<VisitInfoSeed>(raw)?,
        EntityKind::Timeline => typed::<TimelineEventSeed>(raw)?,
        EntityKind::News => typed::<NewsSeed>(raw)?,
        EntityKind::Media => typed::<MediaFileSeed>(raw)?,
    };
    normalize_fields(kind, fields)
}

fn typed<T: DeserializeOwned + Serialize>(raw: Value) -> Result<FieldMap, String> {
    let entry: T = serde_json::from_value(raw).map_err(|e| e.to_string())?;
    match serde_json::to_value(entry).map_err(|e| e.to_string())? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(format!("expected an object, got {other}")),
    }
}

/// Restrict `fields` to the schema of `kind` and normalize typed values
///
/// Missing schema fields become null. Timestamp fields are rewritten to
/// [`TIMESTAMP_FORMAT`]; JSON fields must hold parseable JSON text.
pub fn normalize_fields(kind: EntityKind, mut fields: FieldMap) -> Result<FieldMap, String> {
    let mut normalized = FieldMap::new();

    for spec in kind.fields() {
        let value = fields.remove(spec.name).unwrap_or(Value::Null);
        let value = match (spec.field_type, value) {
            (_, Value::Null) => Value::Null,
            (FieldType::Timestamp, Value::String(s)) => Value::String(
                normalize_timestamp(&s).map_err(|e| format!("{}: {}", spec.name, e))?,
            ),
            (FieldType::Json, Value::String(s)) => {
                serde_json::from_str::<Value>(&s)
                    .map_err(|e| format!("{} must be valid JSON: {}", spec.name, e))?;
                Value::String(s)
            }
            (_, value) => value,
        };
        normalized.insert(spec.name.to_string(), value);
    }

    Ok(normalized)
}

/// Normalize a date or date-time string to UTC in [`TIMESTAMP_FORMAT`]
///
/// Accepts `YYYY-MM-DD` (midnight), RFC 3339 with offset or `Z`, and naive
/// `YYYY-MM-DDTHH:MM:SS[.f]` (taken as UTC).
pub fn normalize_timestamp(raw: &str) -> Result<String, String> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc).format(TIMESTAMP_FORMAT).to_string());
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc().format(TIMESTAMP_FORMAT).to_string());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let midnight = date.and_hms_opt(0, 0, 0).ok_or("invalid date")?;
        return Ok(midnight.and_utc().format(TIMESTAMP_FORMAT).to_string());
    }

    Err(format!("invalid timestamp '{}'", raw))
}
