//! Error taxonomy for reconciliation runs
//!
//! Per-record problems ([`RecordError`]) are collected into the run report
//! and never stop the run. Fatal problems ([`SyncError`]) abort the run and
//! roll back anything applied so far.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::models::{EntityKind, NaturalKey};
use crate::storage::StorageError;
use crate::store::StoreError;

/// A problem with a single record; the run continues with the others
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordError {
    /// Malformed seed entry or missing natural key
    #[error("input error: {message}")]
    Input { message: String },
    /// A referenced record does not exist
    #[error("reference error: {field} -> {kind} '{key}' does not exist")]
    Reference {
        field: String,
        kind: EntityKind,
        key: NaturalKey,
    },
}

impl RecordError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Input { .. } => "InputError",
            Self::Reference { .. } => "ReferenceError",
        }
    }
}

/// A problem that aborts the whole run
#[derive(Debug, Error)]
pub enum SyncError {
    /// The seed file could not be read or is not valid JSON
    #[error("failed to parse seed file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    /// Store connectivity or constraint failure
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Object storage listing failure
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The operator interrupted the run before commit
    #[error("run cancelled before commit")]
    Cancelled,
}

impl SyncError {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "ParseError",
            Self::Store(_) => "StoreError",
            Self::Storage(_) => "StorageError",
            Self::Cancelled => "Cancelled",
        }
    }
}
