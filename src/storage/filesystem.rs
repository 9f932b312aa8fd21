//! Filesystem-based blob store
//!
//! Storage layout:
//! ```text
//! {root}/{container}/.container.json      # creation date
//! {root}/{container}/{sha256(key)}.blob   # envelope: header + data
//! {root}/.multipart/{upload_id}/{n}.part  # staged multipart parts
//! ```
//!
//! Each blob file starts with a small envelope (`S3GB` magic, little-endian
//! `u32` header length, JSON [`BlobDescriptor`]) followed by the raw bytes,
//! so a blob and its metadata are replaced together by a single rename.
//! Keys are hashed into file names, which keeps arbitrary S3 keys (slashes,
//! `..`, very long names) away from path semantics.

use super::listing::paginate;
use super::traits::{
    md5_hex, multipart_etag, BlobData, BlobStore, Capabilities, ListPage, ListRequest, PartRef,
    StorageError, DEFAULT_MIN_PART_SIZE,
};
use crate::types::{
    BlobDescriptor, ByteRange, ContainerInfo, ContentMetadata, MetadataDirective, PutCondition,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument, warn};

const MAGIC: &[u8; 4] = b"S3GB";
const BLOB_EXT: &str = "blob";
const CONTAINER_MARKER: &str = ".container.json";
const MULTIPART_DIR: &str = ".multipart";
/// Refuse absurd header lengths from corrupt files.
const MAX_HEADER_LEN: u32 = 1024 * 1024;

#[derive(Serialize, Deserialize)]
struct ContainerMarker {
    created: DateTime<Utc>,
}

/// Async-safe path existence check (avoids blocking the Tokio runtime)
async fn path_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

fn join_error(e: tokio::task::JoinError) -> StorageError {
    StorageError::Other(format!("spawn_blocking join failed: {}", e))
}

/// Atomically write data to a file using write-to-temp + fsync + rename.
async fn atomic_write(path: &Path, chunks: Vec<Bytes>) -> Result<(), StorageError> {
    let parent = path
        .parent()
        .ok_or_else(|| StorageError::Other("Cannot atomic-write to a path with no parent".into()))?
        .to_path_buf();
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
        let mut tmp = NamedTempFile::new_in(&parent)?;
        for chunk in &chunks {
            tmp.write_all(chunk)?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(join_error)?
}

/// Serialize the envelope header for a descriptor.
fn encode_header(descriptor: &BlobDescriptor) -> Result<Bytes, StorageError> {
    let json = serde_json::to_vec(descriptor)?;
    let len = u32::try_from(json.len())
        .map_err(|_| StorageError::Other("blob header too large".into()))?;
    let mut header = Vec::with_capacity(8 + json.len());
    header.extend_from_slice(MAGIC);
    header.extend_from_slice(&len.to_le_bytes());
    header.extend_from_slice(&json);
    Ok(Bytes::from(header))
}

fn corrupt(path: &Path) -> StorageError {
    StorageError::Other(format!("corrupt blob file {}", path.display()))
}

/// Read the envelope header, returning the descriptor and the data offset.
async fn read_header(file: &mut fs::File, path: &Path) -> Result<(BlobDescriptor, u64), StorageError> {
    let mut prefix = [0u8; 8];
    file.read_exact(&mut prefix).await.map_err(|_| corrupt(path))?;
    if &prefix[..4] != MAGIC {
        return Err(corrupt(path));
    }
    let len = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
    if len > MAX_HEADER_LEN {
        return Err(corrupt(path));
    }
    let mut json = vec![0u8; len as usize];
    file.read_exact(&mut json).await.map_err(|_| corrupt(path))?;
    let descriptor = serde_json::from_slice(&json)?;
    Ok((descriptor, 8 + len as u64))
}

/// Blocking variant used inside `spawn_blocking` sections.
fn read_header_blocking(file: &mut std::fs::File, path: &Path) -> Result<(BlobDescriptor, u64), StorageError> {
    let mut prefix = [0u8; 8];
    file.read_exact(&mut prefix).map_err(|_| corrupt(path))?;
    if &prefix[..4] != MAGIC {
        return Err(corrupt(path));
    }
    let len = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
    if len > MAX_HEADER_LEN {
        return Err(corrupt(path));
    }
    let mut json = vec![0u8; len as usize];
    file.read_exact(&mut json).map_err(|_| corrupt(path))?;
    let descriptor = serde_json::from_slice(&json)?;
    Ok((descriptor, 8 + len as u64))
}

/// Map a not-found IO error onto the given storage error.
fn not_found_as(e: std::io::Error, err: impl FnOnce() -> StorageError) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        err()
    } else {
        StorageError::Io(e)
    }
}

/// Filesystem blob store rooted at a directory.
pub struct FilesystemBackend {
    root: PathBuf,
    min_part_size: u64,
}

impl FilesystemBackend {
    /// Create a new filesystem backend with the given root directory.
    pub async fn new(root: PathBuf) -> Result<Self, StorageError> {
        Self::with_min_part_size(root, DEFAULT_MIN_PART_SIZE).await
    }

    pub async fn with_min_part_size(root: PathBuf, min_part_size: u64) -> Result<Self, StorageError> {
        fs::create_dir_all(root.join(MULTIPART_DIR)).await?;
        Ok(Self {
            root,
            min_part_size,
        })
    }

    fn container_dir(&self, name: &str) -> Result<PathBuf, StorageError> {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(StorageError::ContainerNotFound(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    fn blob_path(&self, container: &str, key: &str) -> Result<PathBuf, StorageError> {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        Ok(self
            .container_dir(container)?
            .join(format!("{}.{}", digest, BLOB_EXT)))
    }

    fn upload_dir(&self, upload_id: &str) -> Result<PathBuf, StorageError> {
        let safe = !upload_id.is_empty()
            && upload_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !safe {
            return Err(StorageError::UploadNotFound(upload_id.to_string()));
        }
        Ok(self.root.join(MULTIPART_DIR).join(upload_id))
    }

    fn part_path(dir: &Path, part_number: u32) -> PathBuf {
        dir.join(format!("{:05}.part", part_number))
    }

    async fn require_container(&self, name: &str) -> Result<PathBuf, StorageError> {
        let dir = self.container_dir(name)?;
        if !path_exists(&dir.join(CONTAINER_MARKER)).await {
            return Err(StorageError::ContainerNotFound(name.to_string()));
        }
        Ok(dir)
    }

    /// Open a blob and read its envelope header.
    async fn open_blob(
        &self,
        container: &str,
        key: &str,
    ) -> Result<(fs::File, BlobDescriptor, u64), StorageError> {
        self.require_container(container).await?;
        let path = self.blob_path(container, key)?;
        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| not_found_as(e, || StorageError::NotFound(key.to_string())))?;
        let (descriptor, offset) = read_header(&mut file, &path).await?;
        Ok((file, descriptor, offset))
    }

    /// Iterate every blob file in a container directory.
    async fn blob_files(&self, dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(BLOB_EXT) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl BlobStore for FilesystemBackend {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            ranged_reads: true,
            native_copy: true,
            native_multipart: true,
            conditional_put: false,
            min_part_size: self.min_part_size,
        }
    }

    #[instrument(skip(self))]
    async fn create_container(&self, name: &str) -> Result<bool, StorageError> {
        let dir = self.container_dir(name)?;
        let marker = dir.join(CONTAINER_MARKER);
        if path_exists(&marker).await {
            return Ok(false);
        }
        fs::create_dir_all(&dir).await?;
        let json = serde_json::to_vec(&ContainerMarker {
            created: Utc::now(),
        })?;
        atomic_write(&marker, vec![Bytes::from(json)]).await?;
        debug!("Created container directory {}", dir.display());
        Ok(true)
    }

    async fn container_exists(&self, name: &str) -> Result<bool, StorageError> {
        match self.container_dir(name) {
            Ok(dir) => Ok(path_exists(&dir.join(CONTAINER_MARKER)).await),
            Err(_) => Ok(false),
        }
    }

    #[instrument(skip(self))]
    async fn delete_container(&self, name: &str) -> Result<(), StorageError> {
        let dir = self.require_container(name).await?;
        if !self.blob_files(&dir).await?.is_empty() {
            return Err(StorageError::ContainerNotEmpty(name.to_string()));
        }
        fs::remove_dir_all(&dir).await?;
        debug!("Removed container directory {}", dir.display());
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, StorageError> {
        let mut containers = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') || !entry.file_type().await?.is_dir() {
                continue;
            }
            let marker = match fs::read(entry.path().join(CONTAINER_MARKER)).await {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };
            match serde_json::from_slice::<ContainerMarker>(&marker) {
                Ok(m) => containers.push(ContainerInfo {
                    name,
                    creation_date: m.created,
                }),
                Err(e) => warn!("Skipping container {} with unreadable marker: {}", name, e),
            }
        }
        containers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(containers)
    }

    #[instrument(skip(self))]
    async fn list_blobs(
        &self,
        container: &str,
        request: &ListRequest,
    ) -> Result<ListPage, StorageError> {
        let dir = self.require_container(container).await?;
        let mut summaries = Vec::new();
        for path in self.blob_files(&dir).await? {
            // A blob deleted mid-listing simply drops out
            let mut file = match fs::File::open(&path).await {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match read_header(&mut file, &path).await {
                Ok((descriptor, _)) if descriptor.key.starts_with(&request.prefix) => {
                    summaries.push(descriptor.summary())
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable blob {}: {}", path.display(), e),
            }
        }
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        debug!("Scanned {} blobs in {}", summaries.len(), container);
        Ok(paginate(summaries, request))
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
        self.require_container(container).await?;
        if !condition.is_empty() {
            // Best effort only; the capability flag tells callers so
            let existing = match self.head_blob(container, key).await {
                Ok(d) => Some(d.etag),
                Err(StorageError::NotFound(_)) => None,
                Err(e) => return Err(e),
            };
            if !condition.allows(existing.as_deref()) {
                return Err(StorageError::PreconditionFailed(key.to_string()));
            }
        }

        let descriptor = BlobDescriptor {
            container: container.to_string(),
            key: key.to_string(),
            content_length: data.len() as u64,
            etag: md5_hex(&data),
            last_modified: Utc::now(),
            metadata: metadata.clone(),
        };
        let header = encode_header(&descriptor)?;
        let path = self.blob_path(container, key)?;
        atomic_write(&path, vec![header, data]).await?;
        debug!("Wrote {}/{} ({} bytes)", container, key, descriptor.content_length);
        Ok(descriptor)
    }

    #[instrument(skip(self))]
    async fn get_blob(
        &self,
        container: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<BlobData, StorageError> {
        let (mut file, descriptor, offset) = self.open_blob(container, key).await?;

        let served = match range {
            Some(r) => Some(
                r.resolve(descriptor.content_length)
                    .ok_or(StorageError::InvalidRange)?,
            ),
            None => None,
        };
        let (start, len) = match served {
            Some((first, last)) => (first, last - first + 1),
            None => (0, descriptor.content_length),
        };

        file.seek(SeekFrom::Start(offset + start)).await?;
        let stream = ReaderStream::new(file.take(len)).map(|r| r.map_err(StorageError::Io));
        Ok(BlobData {
            descriptor,
            body: Box::pin(stream),
            range: served,
        })
    }

    async fn head_blob(&self, container: &str, key: &str) -> Result<BlobDescriptor, StorageError> {
        let (_, descriptor, _) = self.open_blob(container, key).await?;
        Ok(descriptor)
    }

    #[instrument(skip(self))]
    async fn delete_blob(&self, container: &str, key: &str) -> Result<(), StorageError> {
        self.require_container(container).await?;
        let path = self.blob_path(container, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, directive))]
    async fn copy_blob(
        &self,
        src_container: &str,
        src_key: &str,
        dst_container: &str,
        dst_key: &str,
        directive: &MetadataDirective,
    ) -> Result<BlobDescriptor, StorageError> {
        self.require_container(src_container).await?;
        self.require_container(dst_container).await?;
        let src_path = self.blob_path(src_container, src_key)?;
        let dst_path = self.blob_path(dst_container, dst_key)?;
        let dst_container = dst_container.to_string();
        let dst_key = dst_key.to_string();
        let src_key = src_key.to_string();
        let directive = directive.clone();

        tokio::task::spawn_blocking(move || -> Result<BlobDescriptor, StorageError> {
            let mut src = std::fs::File::open(&src_path)
                .map_err(|e| not_found_as(e, || StorageError::NotFound(src_key.clone())))?;
            let (source, offset) = read_header_blocking(&mut src, &src_path)?;
            src.seek(SeekFrom::Start(offset))?;

            let metadata = match directive {
                MetadataDirective::Copy => source.metadata,
                MetadataDirective::Replace(m) => m,
            };
            let descriptor = BlobDescriptor {
                container: dst_container,
                key: dst_key,
                content_length: source.content_length,
                etag: source.etag,
                last_modified: Utc::now(),
                metadata,
            };

            let parent = dst_path
                .parent()
                .ok_or_else(|| StorageError::Other("blob path has no parent".into()))?;
            let mut tmp = NamedTempFile::new_in(parent)?;
            tmp.write_all(&encode_header(&descriptor)?)?;
            std::io::copy(&mut src, &mut tmp)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&dst_path).map_err(|e| StorageError::Io(e.error))?;
            Ok(descriptor)
        })
        .await
        .map_err(join_error)?
    }

    #[instrument(skip(self))]
    async fn initiate_multipart(
        &self,
        container: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        self.require_container(container).await?;
        fs::create_dir_all(self.upload_dir(upload_id)?).await?;
        Ok(())
    }

    #[instrument(skip(self, data))]
    async fn upload_part(
        &self,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, StorageError> {
        let dir = self.upload_dir(upload_id)?;
        if !path_exists(&dir).await {
            return Err(StorageError::UploadNotFound(upload_id.to_string()));
        }
        let etag = md5_hex(&data);
        atomic_write(&Self::part_path(&dir, part_number), vec![data]).await?;
        debug!("Staged part {} of upload {}", part_number, upload_id);
        Ok(etag)
    }

    #[instrument(skip(self, parts, metadata))]
    async fn complete_multipart(
        &self,
        container: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartRef],
        metadata: &ContentMetadata,
    ) -> Result<BlobDescriptor, StorageError> {
        self.require_container(container).await?;
        let dir = self.upload_dir(upload_id)?;
        if !path_exists(&dir).await {
            return Err(StorageError::UploadNotFound(upload_id.to_string()));
        }

        let mut part_files = Vec::with_capacity(parts.len());
        let mut total = 0u64;
        for part in parts {
            let path = Self::part_path(&dir, part.part_number);
            let meta = fs::metadata(&path)
                .await
                .map_err(|e| not_found_as(e, || StorageError::PartNotFound(part.part_number)))?;
            total += meta.len();
            part_files.push(path);
        }

        let descriptor = BlobDescriptor {
            container: container.to_string(),
            key: key.to_string(),
            content_length: total,
            etag: multipart_etag(parts.iter().map(|p| p.etag.as_str())),
            last_modified: Utc::now(),
            metadata: metadata.clone(),
        };
        let header = encode_header(&descriptor)?;
        let target = self.blob_path(container, key)?;

        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let parent = target
                .parent()
                .ok_or_else(|| StorageError::Other("blob path has no parent".into()))?;
            let mut tmp = NamedTempFile::new_in(parent)?;
            tmp.write_all(&header)?;
            for path in &part_files {
                let mut part = std::fs::File::open(path)?;
                std::io::copy(&mut part, &mut tmp)?;
            }
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|e| StorageError::Io(e.error))?;
            Ok(())
        })
        .await
        .map_err(join_error)??;

        if let Err(e) = fs::remove_dir_all(&dir).await {
            warn!("Failed to remove staging for upload {}: {}", upload_id, e);
        }
        debug!(
            "Assembled {} parts into {}/{} ({} bytes)",
            parts.len(),
            container,
            key,
            total
        );
        Ok(descriptor)
    }

    #[instrument(skip(self))]
    async fn abort_multipart(&self, upload_id: &str) -> Result<(), StorageError> {
        let dir = self.upload_dir(upload_id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
