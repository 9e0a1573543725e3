//! Paginated, resumable builds of derived tabular datasets ("tomes").
//!
//! A tome is built by walking the keys of a header tome, reading each key's
//! source record as named Arrow channels and appending the rows the caller
//! derives from them. Rows and keys are buffered by a [`Scribe`] and flushed
//! as size-bounded parquet pages; the JSON manifest is rewritten after every
//! page so an interrupted build can be resumed where it stopped.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use tomes::{CuratorOptions, DsSourceReader, LocalBlobStore, MakeOptions, TomeCurator};
//! # async fn build() -> tomes::TomeResult<()> {
//! let tomes = Arc::new(LocalBlobStore::new("tomes"));
//! let data = Arc::new(LocalBlobStore::new("."));
//! let curator = TomeCurator::new(
//!     tomes,
//!     Arc::new(DsSourceReader::new(data, "csds")),
//!     CuratorOptions::new("csds"),
//! );
//!
//! let mut maker = curator.make_tome("kills", MakeOptions::default());
//! while let Some(item) = maker.next().await? {
//!     if let Some(kills) = item.channels.get("kills") {
//!         maker.concat(kills.clone()).await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod curator;
pub mod error;
pub mod header;
mod id;
pub mod layout;
pub mod loader;
pub mod maker;
pub mod manifest;
mod observability;
pub mod option;
pub mod page;
pub mod scribe;
pub mod source;
pub mod store;

pub use crate::{
    curator::TomeCurator,
    error::{BlobError, TomeError, TomeResult},
    id::{TomeId, TomeIdGenerator},
    layout::{ArtifactKind, TomeLocation},
    loader::TomeLoader,
    maker::{BuildAction, ExistingBehavior, SourceItem, TomeMaker, TomeState},
    manifest::{ContentType, ManifestData, PageDescriptor},
    option::{CuratorOptions, HeaderTomeOptions, MakeOptions, PagingOptions},
    page::PageCompression,
    scribe::{KeyBatch, Scribe},
    source::{ChannelInstruction, Channels, DsSourceReader, EmptyChannelPolicy, SourceReader},
    store::{BlobStore, FusioBlobStore, MemoryBlobStore},
};
#[cfg(feature = "tokio")]
pub use crate::store::LocalBlobStore;
