use std::{error::Error as StdError, io};

use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use thiserror::Error;

/// Failures raised by a [`BlobStore`](crate::store::BlobStore) implementation.
#[derive(Debug, Error)]
pub enum BlobError {
    /// No object is stored under the key.
    #[error("blob not found: {key}")]
    NotFound { key: String },
    /// Local filesystem failure.
    #[error("blob io error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
    /// Failure reported by a fusio backend.
    #[error("blob fusio error on {key}: {source}")]
    Fusio {
        key: String,
        #[source]
        source: fusio::Error,
    },
    /// The key cannot be mapped onto the backend's path scheme.
    #[error("invalid blob key: {0}")]
    InvalidKey(String),
}

impl BlobError {
    /// Whether this error means the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound { .. })
    }
}

/// Error type shared by manifests, pages, scribes, loaders and makers.
#[derive(Debug, Error)]
pub enum TomeError {
    /// A manifest, page or source artifact is missing.
    #[error("not found: {key}")]
    NotFound { key: String },
    /// A page, manifest or channel declares a format this crate does not handle.
    #[error("unsupported format: {detail}")]
    UnsupportedFormat { detail: String },
    /// The existing-tome policy resolved to `fail`.
    #[error("tome {tome} already exists ({state}) and the build policy is fail")]
    PolicyConflict { tome: String, state: &'static str },
    /// `finish` was called before any data reached the tome.
    #[error("empty tome not supported: {tome}")]
    EmptyTome { tome: String },
    /// The source reader failed for one key.
    #[error("failed to read source {locator}: {source}")]
    Upstream {
        locator: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    /// Storage backend failure other than a missing object.
    #[error("storage error: {0}")]
    Store(BlobError),
    /// Parquet encoding or decoding failed.
    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),
    /// Arrow kernel failure (concat, filter, cast).
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
    /// Manifest or metadata JSON could not be encoded or decoded.
    #[error("manifest codec error: {0}")]
    Codec(#[from] serde_json::Error),
    /// Rows pushed into a page do not share one schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    /// A required column is absent or has the wrong type.
    #[error("missing or invalid column {column}")]
    MissingColumn { column: String },
    /// A work-queue key has no row in the header tome.
    #[error("key {key} has no locator in the header tome")]
    UnknownKey { key: String },
    /// The requested channel is not listed in the source manifest.
    #[error("channel {channel} not found in source {locator}")]
    ChannelNotFound { channel: String, locator: String },
    /// `end_page` was called without a matching `start_page`.
    #[error("page {page} ended before it was started")]
    PageNotStarted { page: u32 },
    /// `end_page` was called with a page number that breaks contiguity.
    #[error("page {page} out of order, expected page {expected}")]
    PageOutOfOrder { page: u32, expected: u32 },
    /// `concat` was called on a maker that has not handed out a key.
    #[error("concat called before any key was produced")]
    NoCurrentKey,
    /// A key failed earlier in this build; start a new maker to resume.
    #[error("build of tome `{tome}` was aborted by an earlier failure")]
    BuildAborted { tome: String },
}

impl TomeError {
    /// Whether this error means the underlying object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TomeError::NotFound { .. })
    }
}

impl From<BlobError> for TomeError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound { key } => TomeError::NotFound { key },
            other => TomeError::Store(other),
        }
    }
}

/// Result alias used across the crate.
pub type TomeResult<T> = Result<T, TomeError>;
