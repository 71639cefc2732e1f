//! Fixed object listing for media sync tests

use async_trait::async_trait;

use super::{ObjectInfo, ObjectStore, StorageError};

#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Vec<ObjectInfo>,
}

impl MemoryObjectStore {
    pub fn new(objects: impl IntoIterator<Item = (&'static str, u64)>) -> Self {
        Self {
            objects: objects
                .into_iter()
                .map(|(key, size)| ObjectInfo::new(key, size))
                .collect(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        Ok(self
            .objects
            .iter()
            .filter(|o| o.key.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://cdn.test/{key}")
    }
}
