//! Key/bytes storage consumed by manifests, pages and source readers.
//!
//! Every component talks to storage through [`BlobStore`]. Keys are
//! `/`-separated strings relative to the store's root; implementations map
//! them onto their own namespace (a directory tree, an object-store prefix or a
//! map in memory).

#[cfg(feature = "tokio")]
mod local;
mod memory;
mod object;

use bytes::Bytes;
use futures_util::future::BoxFuture;

pub use crate::error::BlobError;
#[cfg(feature = "tokio")]
pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;
pub use object::FusioBlobStore;

/// Result alias for storage operations.
pub type BlobResult<T> = Result<T, BlobError>;

/// Storage interface shared by every tome component.
pub trait BlobStore: Send + Sync {
    /// Read the full object stored under `key`.
    ///
    /// A missing object is reported as [`BlobError::NotFound`].
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BlobResult<Bytes>>;

    /// Store `bytes` under `key`, replacing any previous object.
    fn put<'a>(&'a self, key: &'a str, bytes: Bytes) -> BoxFuture<'a, BlobResult<()>>;

    /// List every object key under `prefix`, recursively, in lexical order.
    ///
    /// A prefix with no objects yields an empty list rather than an error.
    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, BlobResult<Vec<String>>>;
}

/// Split a key into its non-empty segments, rejecting traversal segments.
pub(crate) fn key_segments(key: &str) -> BlobResult<Vec<&str>> {
    let segments: Vec<&str> = key.split('/').filter(|part| !part.is_empty()).collect();
    if segments.is_empty() {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    if segments.iter().any(|part| *part == "." || *part == "..") {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(segments)
}
