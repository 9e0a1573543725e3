//! Read-only access to a persisted tome.

use std::sync::Arc;

use arrow::{
    array::RecordBatch,
    datatypes::{Schema, SchemaRef},
};
use async_stream::stream;
use futures_core::Stream;
use serde_json::{Map, Value};
use tracing::Span;

use crate::{
    error::TomeResult,
    layout::TomeLocation,
    manifest::ManifestData,
    observability::{component_span, log_debug},
    page::{concat_same_schema, PageReader},
    store::BlobStore,
};

/// Lazily loads a tome's manifest and pages.
///
/// The manifest and metadata are fetched on first access and cached for the
/// lifetime of the loader.
pub struct TomeLoader {
    store: Arc<dyn BlobStore>,
    location: TomeLocation,
    reader: PageReader,
    manifest: Option<ManifestData>,
    metadata: Option<Map<String, Value>>,
    header: Option<Box<TomeLoader>>,
    span: Span,
}

impl TomeLoader {
    pub fn new(store: Arc<dyn BlobStore>, location: TomeLocation) -> Self {
        let span = component_span("loader", location.tome_name());
        Self {
            reader: PageReader::new(Arc::clone(&store), span.clone()),
            store,
            location,
            manifest: None,
            metadata: None,
            header: None,
            span,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.reader = PageReader::new(Arc::clone(&self.store), span.clone());
        self.span = span;
        self
    }

    /// Link the header snapshot stored alongside this tome.
    ///
    /// Only one level is linked: the header loader never carries a header itself.
    pub fn with_header(mut self) -> Self {
        if !self.location.is_copied_header() {
            let header = TomeLoader::new(Arc::clone(&self.store), self.location.copied_header())
                .with_span(self.span.clone());
            self.header = Some(Box::new(header));
        }
        self
    }

    pub fn header(&mut self) -> Option<&mut TomeLoader> {
        self.header.as_deref_mut()
    }

    pub fn location(&self) -> &TomeLocation {
        &self.location
    }

    /// Whether the tome's manifest can be read.
    ///
    /// A missing manifest yields `false`; any other failure is returned.
    pub async fn exists(&mut self) -> TomeResult<bool> {
        match self.manifest().await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub async fn manifest(&mut self) -> TomeResult<&ManifestData> {
        let manifest = match self.manifest.take() {
            Some(manifest) => manifest,
            None => {
                let key = self.location.manifest_key();
                log_debug!(
                    parent: &self.span,
                    component = "loader",
                    event = "manifest_read",
                    key = %key,
                );
                let bytes = self.store.get(&key).await?;
                ManifestData::decode(&bytes)?
            }
        };
        Ok(self.manifest.insert(manifest))
    }

    /// Caller-supplied metadata; empty when the tome was written without any.
    pub async fn metadata(&mut self) -> TomeResult<&Map<String, Value>> {
        let metadata = match self.metadata.take() {
            Some(metadata) => metadata,
            None => match self.store.get(&self.location.metadata_key()).await {
                Ok(bytes) => serde_json::from_slice(&bytes)?,
                Err(err) if err.is_not_found() => Map::new(),
                Err(err) => return Err(err.into()),
            },
        };
        Ok(self.metadata.insert(metadata))
    }

    /// All rows of the tome, concatenated in page order.
    pub async fn get_dataframe(&mut self) -> TomeResult<RecordBatch> {
        let pages = self.manifest().await?.pages.clone();
        let mut batches = Vec::with_capacity(pages.len());
        for page in &pages {
            batches.push(self.reader.read_rows(page).await?);
        }

        let schema: SchemaRef = batches
            .iter()
            .find(|batch| batch.num_rows() > 0)
            .or_else(|| batches.first())
            .map(RecordBatch::schema)
            .unwrap_or_else(|| Arc::new(Schema::empty()));
        batches.retain(|batch| batch.num_rows() > 0);
        concat_same_schema(&schema, &batches)
    }

    /// All keys of the tome in page order, duplicates preserved.
    pub async fn get_keyset(&mut self) -> TomeResult<Vec<String>> {
        let pages = self.manifest().await?.pages.clone();
        let mut keyset = Vec::new();
        for page in &pages {
            keyset.extend(self.reader.read_keyset(page).await?);
        }
        Ok(keyset)
    }

    /// Stream `(rows, keys)` page by page in manifest order.
    ///
    /// Pages are read only as the stream is polled; every call starts a fresh
    /// stream from page 0. The stream ends after the first failed page.
    pub async fn iterate_pages(
        &mut self,
    ) -> TomeResult<impl Stream<Item = TomeResult<(RecordBatch, Vec<String>)>> + Send + 'static>
    {
        let pages = self.manifest().await?.pages.clone();
        let reader = self.reader.clone();
        Ok(stream! {
            for page in pages {
                let item = reader.read_page(&page).await;
                let failed = item.is_err();
                yield item;
                if failed {
                    break;
                }
            }
        })
    }
}
