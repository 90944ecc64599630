use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{BlobStore, Result, StorageError, VersionedBlob};

/// In-memory blob store for tests and single-process deployments.
///
/// Thread-safe via `RwLock`. Uses numeric versions internally (exposed as
/// strings) to simulate object-store generation semantics.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, StoredBlob>>,
}

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    version: i64,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.objects.read().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current version of `key`, for tests asserting write counts.
    pub fn version_of(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .expect("store lock poisoned")
            .get(key)
            .map(|o| o.version.to_string())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<VersionedBlob>> {
        let objects = self.objects.read().expect("store lock poisoned");
        Ok(objects.get(key).map(|o| VersionedBlob {
            data: o.data.clone(),
            version: o.version.to_string(),
        }))
    }

    async fn put(&self, key: &str, data: Bytes, cas: Option<&str>) -> Result<String> {
        let mut objects = self.objects.write().expect("store lock poisoned");
        let current = objects.get(key);

        match cas {
            None => {
                if let Some(existing) = current {
                    return Err(StorageError::Conflict {
                        key: key.to_string(),
                        current_version: Some(existing.version.to_string()),
                    });
                }
            }
            Some(expected) => {
                let expected_num: i64 = expected.parse().unwrap_or(-1);
                match current {
                    Some(existing) if existing.version != expected_num => {
                        return Err(StorageError::Conflict {
                            key: key.to_string(),
                            current_version: Some(existing.version.to_string()),
                        });
                    }
                    None => {
                        return Err(StorageError::Conflict {
                            key: key.to_string(),
                            current_version: None,
                        });
                    }
                    _ => {}
                }
            }
        }

        let new_version = current.map_or(1, |o| o.version + 1);
        objects.insert(
            key.to_string(),
            StoredBlob {
                data,
                version: new_version,
            },
        );
        Ok(new_version.to_string())
    }
}
