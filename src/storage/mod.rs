//! Storage backend abstraction

mod filesystem;
mod listing;
mod memory;
mod traits;

pub use filesystem::FilesystemBackend;
pub use listing::paginate;
pub use memory::MemoryBackend;
pub use traits::{
    body_from_bytes, collect_body, md5_hex, multipart_etag, BlobBody, BlobData, BlobStore,
    Capabilities, ListPage, ListRequest, PartRef, StorageError, DEFAULT_MIN_PART_SIZE,
};
