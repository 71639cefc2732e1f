//! Object storage consumed by media sync
//!
//! Only listing is needed: media sync never uploads, moves or deletes
//! objects.

pub mod content_type;
#[cfg(test)]
pub mod memory;
pub mod s3;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use s3::S3ObjectStore;

/// One object in a bucket listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    /// Derived from the key's extension
    pub content_type: String,
}

impl ObjectInfo {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        let key = key.into();
        let content_type = content_type::from_key(&key).to_string();
        Self {
            key,
            size,
            content_type,
        }
    }

    /// Folder-like prefixes end with `/` and carry no content
    pub fn is_folder_marker(&self) -> bool {
        self.key.ends_with('/')
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object storage request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("object storage returned {status}: {code} {message}")]
    Status {
        status: u16,
        code: String,
        message: String,
    },
    #[error("invalid listing response: {0}")]
    InvalidResponse(String),
    #[error("object storage is not configured: {0}")]
    NotConfigured(String),
}

/// Read-only view of a bucket
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every object whose key starts with `prefix`; an empty prefix lists the
    /// whole bucket
    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError>;

    /// URL under which the object is publicly served
    fn public_url(&self, key: &str) -> String;
}
