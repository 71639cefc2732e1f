//! Entity kinds managed by the reconciler and their field schemas

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Storage type of a field, used for normalization and column decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Real,
    Boolean,
    /// ISO-8601 text, normalized to `YYYY-MM-DDTHH:MM:SSZ`
    Timestamp,
    /// Text that must parse as JSON
    Json,
}

/// A single column of an entity kind
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    /// Set when the field holds the natural key of another kind
    pub references: Option<EntityKind>,
}

const fn field(name: &'static str, field_type: FieldType) -> FieldSpec {
    FieldSpec {
        name,
        field_type,
        references: None,
    }
}

const fn reference(name: &'static str, target: EntityKind) -> FieldSpec {
    FieldSpec {
        name,
        field_type: FieldType::Text,
        references: Some(target),
    }
}

use FieldType::{Boolean, Integer, Json, Real, Text, Timestamp};

const CATEGORY_FIELDS: &[FieldSpec] = &[
    field("name", Text),
    field("name_zh", Text),
    field("description", Text),
];

const SITE_FIELDS: &[FieldSpec] = &[
    field("name", Text),
    field("name_zh", Text),
    field("slug", Text),
    field("address", Text),
    field("city", Text),
    field("latitude", Real),
    field("longitude", Real),
    field("description", Text),
    field("description_zh", Text),
    field("history", Text),
    field("history_zh", Text),
    field("featured_image", Text),
    field("images", Json),
    field("designation_level", Text),
    field("designation_date", Timestamp),
    field("is_published", Boolean),
    reference("category_name", EntityKind::Categories),
];

const VISIT_INFO_FIELDS: &[FieldSpec] = &[
    field("section", Text),
    field("title", Text),
    field("title_zh", Text),
    field("content", Text),
    field("content_zh", Text),
    field("extra_data", Json),
    field("display_order", Integer),
    field("is_active", Boolean),
];

const TIMELINE_FIELDS: &[FieldSpec] = &[
    field("year", Integer),
    field("month", Integer),
    field("day", Integer),
    field("era", Text),
    field("era_year", Text),
    field("title", Text),
    field("title_zh", Text),
    field("description", Text),
    field("description_zh", Text),
    field("image", Text),
    field("category", Text),
    field("importance", Text),
    field("is_published", Boolean),
];

const NEWS_FIELDS: &[FieldSpec] = &[
    field("title", Text),
    field("title_zh", Text),
    field("slug", Text),
    field("summary", Text),
    field("summary_zh", Text),
    field("content", Text),
    field("content_zh", Text),
    field("featured_image", Text),
    field("images", Json),
    field("category", Text),
    field("is_published", Boolean),
    field("published_at", Timestamp),
];

const MEDIA_FIELDS: &[FieldSpec] = &[
    field("filename", Text),
    field("original_filename", Text),
    field("s3_key", Text),
    field("public_url", Text),
    field("content_type", Text),
    field("file_size", Integer),
    field("category", Text),
    field("folder", Text),
    field("alt_text", Text),
    field("alt_text_zh", Text),
    field("caption", Text),
    field("caption_zh", Text),
    field("width", Integer),
    field("height", Integer),
];

/// A content table the reconciler can seed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Categories,
    Sites,
    VisitInfo,
    Timeline,
    News,
    Media,
}

impl EntityKind {
    /// All kinds in dependency order (referenced kinds first)
    pub fn all() -> &'static [EntityKind] {
        &[
            EntityKind::Categories,
            EntityKind::Sites,
            EntityKind::VisitInfo,
            EntityKind::Timeline,
            EntityKind::News,
            EntityKind::Media,
        ]
    }

    /// Name accepted by `--tables`
    pub fn cli_name(&self) -> &'static str {
        match self {
            Self::Categories => "categories",
            Self::Sites => "sites",
            Self::VisitInfo => "visit_info",
            Self::Timeline => "timeline",
            Self::News => "news",
            Self::Media => "media",
        }
    }

    /// Name of the list holding this kind in the seed file
    pub fn seed_list_name(&self) -> &'static str {
        match self {
            Self::Categories => "heritage_categories",
            Self::Sites => "heritage_sites",
            Self::VisitInfo => "visit_info",
            Self::Timeline => "timeline_events",
            Self::News => "news",
            Self::Media => "media_files",
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Categories => "heritage_categories",
            Self::Sites => "heritage_sites",
            Self::VisitInfo => "visit_info",
            Self::Timeline => "timeline_events",
            Self::News => "news",
            Self::Media => "media_files",
        }
    }

    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            Self::Categories => CATEGORY_FIELDS,
            Self::Sites => SITE_FIELDS,
            Self::VisitInfo => VISIT_INFO_FIELDS,
            Self::Timeline => TIMELINE_FIELDS,
            Self::News => NEWS_FIELDS,
            Self::Media => MEDIA_FIELDS,
        }
    }

    /// Fields that together form the natural key, in key order
    pub fn key_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Categories => &["name"],
            Self::Sites | Self::News => &["slug"],
            Self::VisitInfo => &["section"],
            Self::Timeline => &["year", "title"],
            Self::Media => &["s3_key"],
        }
    }

    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields().iter().find(|f| f.name == name)
    }

    /// Fields holding references to other kinds
    pub fn reference_fields(&self) -> impl Iterator<Item = &'static FieldSpec> {
        self.fields().iter().filter(|f| f.references.is_some())
    }

    /// Position in the dependency order; lower is applied first
    pub fn dependency_rank(&self) -> usize {
        Self::all()
            .iter()
            .position(|k| k == self)
            .unwrap_or(usize::MAX)
    }

    /// Parse a comma-separated `--tables` value into kinds in dependency order
    pub fn parse_list(raw: &str) -> Result<Vec<EntityKind>, UnknownKind> {
        let mut kinds = Vec::new();
        for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let kind: EntityKind = name.parse()?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        kinds.sort_by_key(|k| k.dependency_rank());
        Ok(kinds)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cli_name())
    }
}

/// Returned when a kind name matches none of the known kinds
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown table '{0}' (expected one of: categories, sites, visit_info, timeline, news, media)")]
pub struct UnknownKind(pub String);

impl FromStr for EntityKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|k| k.cli_name() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}
