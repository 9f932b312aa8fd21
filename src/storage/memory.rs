//! In-memory blob store
//!
//! Everything lives in a pair of nested `BTreeMap`s behind one lock, so the
//! key order needed for listing comes for free and conditional writes are
//! evaluated atomically with the write itself. Ranged reads, copy and
//! multipart are left to the gateway's fallbacks.

use super::listing::paginate;
use super::traits::{
    body_from_bytes, md5_hex, BlobData, BlobStore, Capabilities, ListPage, ListRequest,
    StorageError, DEFAULT_MIN_PART_SIZE,
};
use crate::types::{BlobDescriptor, ByteRange, ContainerInfo, ContentMetadata, PutCondition};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use tracing::{debug, instrument};

struct Container {
    created: DateTime<Utc>,
    blobs: BTreeMap<String, StoredBlob>,
}

struct StoredBlob {
    descriptor: BlobDescriptor,
    data: Bytes,
}

pub struct MemoryBackend {
    containers: RwLock<BTreeMap<String, Container>>,
    min_part_size: u64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_min_part_size(DEFAULT_MIN_PART_SIZE)
    }

    /// Lower the multipart part-size floor (handy for tests).
    pub fn with_min_part_size(min_part_size: u64) -> Self {
        Self {
            containers: RwLock::new(BTreeMap::new()),
            min_part_size,
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBackend {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            ranged_reads: false,
            native_copy: false,
            native_multipart: false,
            conditional_put: true,
            min_part_size: self.min_part_size,
        }
    }

    async fn create_container(&self, name: &str) -> Result<bool, StorageError> {
        let mut containers = self.containers.write();
        if containers.contains_key(name) {
            return Ok(false);
        }
        containers.insert(
            name.to_string(),
            Container {
                created: Utc::now(),
                blobs: BTreeMap::new(),
            },
        );
        debug!("Created container {}", name);
        Ok(true)
    }

    async fn container_exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.containers.read().contains_key(name))
    }

    async fn delete_container(&self, name: &str) -> Result<(), StorageError> {
        let mut containers = self.containers.write();
        match containers.get(name) {
            None => Err(StorageError::ContainerNotFound(name.to_string())),
            Some(c) if !c.blobs.is_empty() => {
                Err(StorageError::ContainerNotEmpty(name.to_string()))
            }
            Some(_) => {
                containers.remove(name);
                Ok(())
            }
        }
    }

    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, StorageError> {
        Ok(self
            .containers
            .read()
            .iter()
            .map(|(name, c)| ContainerInfo {
                name: name.clone(),
                creation_date: c.created,
            })
            .collect())
    }

    async fn list_blobs(
        &self,
        container: &str,
        request: &ListRequest,
    ) -> Result<ListPage, StorageError> {
        let containers = self.containers.read();
        let c = containers
            .get(container)
            .ok_or_else(|| StorageError::ContainerNotFound(container.to_string()))?;
        let start = request
            .marker
            .as_deref()
            .filter(|m| m.as_bytes() > request.prefix.as_bytes())
            .unwrap_or(request.prefix.as_str());
        let entries = c
            .blobs
            .range::<str, _>((Bound::Included(start), Bound::Unbounded))
            .map(|(_, blob)| blob.descriptor.summary());
        Ok(paginate(entries, request))
    }

    #[instrument(skip(self, data, metadata))]
    async fn put_blob(
        &self,
        container: &str,
        key: &str,
        data: Bytes,
        metadata: &ContentMetadata,
        condition: &PutCondition,
    ) -> Result<BlobDescriptor, StorageError> {
        let descriptor = BlobDescriptor {
            container: container.to_string(),
            key: key.to_string(),
            content_length: data.len() as u64,
            etag: md5_hex(&data),
            last_modified: Utc::now(),
            metadata: metadata.clone(),
        };

        let mut containers = self.containers.write();
        let c = containers
            .get_mut(container)
            .ok_or_else(|| StorageError::ContainerNotFound(container.to_string()))?;
        let existing = c.blobs.get(key).map(|b| b.descriptor.etag.as_str());
        if !condition.allows(existing) {
            return Err(StorageError::PreconditionFailed(key.to_string()));
        }
        c.blobs.insert(
            key.to_string(),
            StoredBlob {
                descriptor: descriptor.clone(),
                data,
            },
        );
        debug!("Stored {}/{} ({} bytes)", container, key, descriptor.content_length);
        Ok(descriptor)
    }

    async fn get_blob(
        &self,
        container: &str,
        key: &str,
        _range: Option<ByteRange>,
    ) -> Result<BlobData, StorageError> {
        let containers = self.containers.read();
        let c = containers
            .get(container)
            .ok_or_else(|| StorageError::ContainerNotFound(container.to_string()))?;
        let blob = c
            .blobs
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(BlobData {
            descriptor: blob.descriptor.clone(),
            body: body_from_bytes(blob.data.clone()),
            range: None,
        })
    }

    async fn head_blob(&self, container: &str, key: &str) -> Result<BlobDescriptor, StorageError> {
        let containers = self.containers.read();
        let c = containers
            .get(container)
            .ok_or_else(|| StorageError::ContainerNotFound(container.to_string()))?;
        c.blobs
            .get(key)
            .map(|b| b.descriptor.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete_blob(&self, container: &str, key: &str) -> Result<(), StorageError> {
        let mut containers = self.containers.write();
        let c = containers
            .get_mut(container)
            .ok_or_else(|| StorageError::ContainerNotFound(container.to_string()))?;
        c.blobs.remove(key);
        Ok(())
    }
}
