//! Content model shared by the seed loader, stores and reconciler

pub mod kind;
pub mod record;
pub mod seed;

pub use kind::{EntityKind, FieldSpec, FieldType, UnknownKind};
pub use record::{FieldMap, NaturalKey, PersistedRecord, Reference, SeedRecord};
