//! Backing-store capability interface

use crate::types::{
    BlobDescriptor, BlobSummary, ByteRange, ContainerInfo, ContentMetadata, MetadataDirective,
    PutCondition,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;
use md5::{Digest, Md5};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Container not empty: {0}")]
    ContainerNotEmpty(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Requested range not satisfiable")]
    InvalidRange,

    #[error("Multipart upload not found: {0}")]
    UploadNotFound(String),

    #[error("Part {0} has not been uploaded")]
    PartNotFound(u32),

    #[error("Blob too large to buffer: {size} bytes (max: {max} bytes)")]
    TooLarge { size: u64, max: u64 },

    #[error("Operation not supported by this store: {0}")]
    Unsupported(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Other(String),
}

/// Optional features a store may offer. The gateway emulates whatever is
/// missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// `get_blob` honours a byte range without reading the whole blob
    pub ranged_reads: bool,
    /// `copy_blob` is implemented
    pub native_copy: bool,
    /// The multipart part/complete/abort primitives are implemented
    pub native_multipart: bool,
    /// `put_blob` evaluates its `PutCondition` atomically
    pub conditional_put: bool,
    /// Smallest size allowed for every multipart part but the last
    pub min_part_size: u64,
}

/// Default minimum multipart part size (5 MiB, as on S3).
pub const DEFAULT_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Listing parameters, in S3 terms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    pub prefix: String,
    pub delimiter: Option<String>,
    /// Exclusive start key (v1 marker / v2 continuation token or start-after)
    pub marker: Option<String>,
    pub max_keys: usize,
}

/// One page of listing results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<BlobSummary>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    /// Last key or common prefix returned when the page is truncated
    pub next_marker: Option<String>,
}

/// Streaming blob payload.
pub type BlobBody = BoxStream<'static, Result<Bytes, StorageError>>;

/// Result of `get_blob`.
pub struct BlobData {
    pub descriptor: BlobDescriptor,
    pub body: BlobBody,
    /// Inclusive byte range actually served, when a range was requested and
    /// honoured by the store
    pub range: Option<(u64, u64)>,
}

/// A part named in a completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRef {
    pub part_number: u32,
    pub etag: String,
}

/// Abstract blob store the gateway translates S3 operations onto.
///
/// Object-safe; handlers hold stores as `Arc<dyn BlobStore>`. The copy and
/// multipart primitives are optional and reported through
/// [`Capabilities`]; their default bodies return `Unsupported`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Create a container. Returns `false` if it already existed.
    async fn create_container(&self, name: &str) -> Result<bool, StorageError>;

    async fn container_exists(&self, name: &str) -> Result<bool, StorageError>;

    /// Delete an empty container. Fails with `ContainerNotEmpty` otherwise.
    async fn delete_container(&self, name: &str) -> Result<(), StorageError>;

    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, StorageError>;

    async fn list_blobs(
        &self,
        container: &str,
        request: &ListRequest,
    ) -> Result<ListPage, StorageError>;

    /// Store a blob. The write must not become visible until complete.
    async fn put_blob(
        &self,
        container: &str,
        key: &str,
        data: Bytes,
        metadata: &ContentMetadata,
        condition: &PutCondition,
    ) -> Result<BlobDescriptor, StorageError>;

    async fn get_blob(
        &self,
        container: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<BlobData, StorageError>;

    async fn head_blob(&self, container: &str, key: &str) -> Result<BlobDescriptor, StorageError>;

    /// Delete a blob. Deleting a missing blob succeeds.
    async fn delete_blob(&self, container: &str, key: &str) -> Result<(), StorageError>;

    async fn copy_blob(
        &self,
        _src_container: &str,
        _src_key: &str,
        _dst_container: &str,
        _dst_key: &str,
        _directive: &MetadataDirective,
    ) -> Result<BlobDescriptor, StorageError> {
        Err(StorageError::Unsupported("copy"))
    }

    async fn initiate_multipart(
        &self,
        _container: &str,
        _key: &str,
        _upload_id: &str,
    ) -> Result<(), StorageError> {
        Err(StorageError::Unsupported("multipart"))
    }

    /// Stage one part, returning its unquoted ETag.
    async fn upload_part(
        &self,
        _upload_id: &str,
        _part_number: u32,
        _data: Bytes,
    ) -> Result<String, StorageError> {
        Err(StorageError::Unsupported("multipart"))
    }

    /// Materialize the named parts, in order, as a single blob.
    async fn complete_multipart(
        &self,
        _container: &str,
        _key: &str,
        _upload_id: &str,
        _parts: &[PartRef],
        _metadata: &ContentMetadata,
    ) -> Result<BlobDescriptor, StorageError> {
        Err(StorageError::Unsupported("multipart"))
    }

    async fn abort_multipart(&self, _upload_id: &str) -> Result<(), StorageError> {
        Err(StorageError::Unsupported("multipart"))
    }
}

/// Hex MD5 of a payload (the single-part S3 ETag).
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// S3 multipart ETag: MD5 over the concatenated raw part MD5s, suffixed
/// with the part count.
pub fn multipart_etag<'a>(part_etags: impl IntoIterator<Item = &'a str>) -> String {
    let mut concat = Vec::new();
    let mut count = 0usize;
    for etag in part_etags {
        if let Ok(raw) = hex::decode(crate::types::normalize_etag(etag)) {
            concat.extend_from_slice(&raw);
        }
        count += 1;
    }
    format!("{}-{}", hex::encode(Md5::digest(&concat)), count)
}

/// Drain a blob body into memory, refusing to buffer more than `max` bytes.
pub async fn collect_body(mut body: BlobBody, max: u64) -> Result<Bytes, StorageError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        let size = (buf.len() + chunk.len()) as u64;
        if size > max {
            return Err(StorageError::TooLarge { size, max });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Wrap an in-memory payload as a single-chunk body.
pub fn body_from_bytes(data: Bytes) -> BlobBody {
    futures::stream::once(async move { Ok(data) }).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_hex_empty() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_multipart_etag_suffix() {
        let a = md5_hex(b"part one");
        let b = md5_hex(b"part two");
        let etag = multipart_etag([a.as_str(), b.as_str()]);
        assert!(etag.ends_with("-2"));
        assert_eq!(etag.len(), 32 + 2);
        // Quoted input yields the same result
        let quoted = [format!("\"{}\"", a), format!("\"{}\"", b)];
        assert_eq!(multipart_etag(quoted.iter().map(|s| s.as_str())), etag);
    }

    #[tokio::test]
    async fn test_collect_body_limit() {
        let body = body_from_bytes(Bytes::from_static(b"0123456789"));
        assert!(matches!(
            collect_body(body, 4).await,
            Err(StorageError::TooLarge { size: 10, max: 4 })
        ));

        let body = body_from_bytes(Bytes::from_static(b"0123"));
        assert_eq!(collect_body(body, 4).await.unwrap().as_ref(), b"0123");
    }
}
