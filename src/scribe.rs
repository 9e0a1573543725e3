//! Buffering writer that turns a stream of `concat` calls into pages.
//!
//! The scribe owns the tome's [`TomeManifest`] for the duration of a build.
//! Rows and keys accumulate in memory until the paging limits are exceeded,
//! at which point the buffer is written as one page and the manifest is
//! persisted again, so a crash after any page leaves a resumable tome.

use std::sync::Arc;

use arrow::{
    array::RecordBatch,
    datatypes::{Schema, SchemaRef},
};
use bytes::Bytes;
use serde_json::{Map, Value};
use tracing::Span;

use crate::{
    error::{TomeError, TomeResult},
    layout::TomeLocation,
    manifest::{ManifestData, TomeManifest},
    observability::{component_span, log_debug, log_info},
    option::PagingOptions,
    page::{concat_same_schema, field_names, PageWriter},
    store::BlobStore,
};

/// Keys accompanying one `concat` call: a single key or a batch of keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyBatch {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for KeyBatch {
    fn from(key: &str) -> Self {
        KeyBatch::One(key.to_string())
    }
}

impl From<String> for KeyBatch {
    fn from(key: String) -> Self {
        KeyBatch::One(key)
    }
}

impl From<&String> for KeyBatch {
    fn from(key: &String) -> Self {
        KeyBatch::One(key.clone())
    }
}

impl From<Vec<String>> for KeyBatch {
    fn from(keys: Vec<String>) -> Self {
        KeyBatch::Many(keys)
    }
}

impl From<Vec<&str>> for KeyBatch {
    fn from(keys: Vec<&str>) -> Self {
        KeyBatch::Many(keys.into_iter().map(str::to_string).collect())
    }
}

impl From<&[String]> for KeyBatch {
    fn from(keys: &[String]) -> Self {
        KeyBatch::Many(keys.to_vec())
    }
}

/// Accumulates rows and keys and flushes them as pages.
pub struct Scribe {
    manifest: TomeManifest,
    writer: PageWriter,
    options: PagingOptions,
    metadata: Option<Map<String, Value>>,
    schema: Option<SchemaRef>,
    rows: Vec<RecordBatch>,
    keyset: Vec<String>,
    page_counter: u32,
    span: Span,
}

impl Scribe {
    pub fn new(manifest: TomeManifest, store: Arc<dyn BlobStore>, options: PagingOptions) -> Self {
        let span = component_span("scribe", manifest.location().tome_name());
        let writer = PageWriter::new(store, options.compression, span.clone());
        Self {
            manifest,
            writer,
            options,
            metadata: None,
            schema: None,
            rows: Vec::new(),
            keyset: Vec::new(),
            page_counter: 0,
            span,
        }
    }

    /// Route this scribe's events (and its page writer's) through `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.writer = PageWriter::new(
            Arc::clone(self.writer.store()),
            self.options.compression,
            span.clone(),
        );
        self.span = span;
        self
    }

    /// Free-form metadata persisted next to the manifest on [`start`](Self::start).
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn location(&self) -> &TomeLocation {
        self.manifest.location()
    }

    pub fn manifest(&self) -> &ManifestData {
        self.manifest.data()
    }

    pub fn page_counter(&self) -> u32 {
        self.page_counter
    }

    /// Keys buffered for the page in progress.
    pub fn keyset(&self) -> &[String] {
        &self.keyset
    }

    /// In-memory footprint of the buffered rows, in MB.
    pub fn page_size_mb(&self) -> f64 {
        let bytes: usize = self
            .rows
            .iter()
            .map(RecordBatch::get_array_memory_size)
            .sum();
        bytes as f64 / 1024.0 / 1024.0
    }

    pub fn page_row_count(&self) -> usize {
        self.rows.iter().map(RecordBatch::num_rows).sum()
    }

    /// Persist the initial manifest so the tome is discoverable, then open page timing.
    pub async fn start(&mut self) -> TomeResult<()> {
        log_info!(
            parent: &self.span,
            component = "scribe",
            event = "scribe_start",
            tome = %self.location(),
            id = %self.manifest.id(),
            resumed_pages = self.page_counter,
        );
        if let Some(metadata) = &self.metadata {
            let bytes = serde_json::to_vec(metadata)?;
            let key = self.location().metadata_key();
            self.writer.store().put(&key, Bytes::from(bytes)).await?;
        }
        self.persist_manifest().await?;
        self.manifest.start_page();
        Ok(())
    }

    /// Append `rows` and `keys` to the current page, flushing if it is full.
    pub async fn concat(&mut self, rows: RecordBatch, keys: impl Into<KeyBatch>) -> TomeResult<()> {
        self.buffer_rows(rows)?;
        match keys.into() {
            KeyBatch::One(key) => self.keyset.push(key),
            KeyBatch::Many(keys) => self.keyset.extend(keys),
        }
        if self.will_write_page() {
            self.write().await?;
        }
        Ok(())
    }

    /// Flush leftovers and mark the tome complete.
    pub async fn finish(&mut self) -> TomeResult<()> {
        let buffer_empty = self.keyset.is_empty() && self.rows.is_empty();
        if self.page_counter == 0 && buffer_empty {
            return Err(TomeError::EmptyTome {
                tome: self.location().tome_name().to_string(),
            });
        }
        if !buffer_empty {
            self.write().await?;
        }
        self.manifest.finish();
        self.persist_manifest().await?;
        log_info!(
            parent: &self.span,
            component = "scribe",
            event = "tome_finished",
            tome = %self.location(),
            pages = self.page_counter,
            elapsed_ms = self.manifest.data().timings.total_elapsed_ms,
        );
        Ok(())
    }

    /// Continue an earlier build: adopt its manifest and page numbering.
    pub fn set_manifest_data(&mut self, existing: ManifestData) {
        self.page_counter = existing.pages.len() as u32;
        self.manifest.replace(existing);
    }

    fn buffer_rows(&mut self, batch: RecordBatch) -> TomeResult<()> {
        if batch.num_rows() == 0 {
            if self.schema.is_none() {
                self.schema = Some(batch.schema());
            }
            return Ok(());
        }
        if let Some(schema) = &self.schema {
            if !self.rows.is_empty() && schema.fields() != batch.schema().fields() {
                return Err(TomeError::SchemaMismatch(format!(
                    "page {} buffers columns {:?}, got {:?}",
                    self.page_counter,
                    field_names(schema),
                    field_names(&batch.schema()),
                )));
            }
        }
        self.schema = Some(batch.schema());
        self.rows.push(batch);
        Ok(())
    }

    fn will_write_page(&self) -> bool {
        let buffered_keys = self.keyset.len();
        if buffered_keys == 0 || buffered_keys % self.options.limit_check_frequency != 0 {
            return false;
        }
        if let Some(max_mb) = self.options.max_page_size_mb {
            if self.page_size_mb() > max_mb {
                return true;
            }
        }
        if let Some(max_rows) = self.options.max_page_row_count {
            if self.page_row_count() > max_rows {
                return true;
            }
        }
        false
    }

    async fn write(&mut self) -> TomeResult<()> {
        let page = self.manifest.end_page(self.page_counter)?;
        let rows = self.page_rows()?;
        self.writer.write_page(&page, &rows, &self.keyset).await?;
        self.persist_manifest().await?;
        log_info!(
            parent: &self.span,
            component = "scribe",
            event = "page_written",
            page = page.number,
            rows = rows.num_rows(),
            keys = self.keyset.len(),
            elapsed_ms = page.timings.elapsed_ms,
        );
        self.page_counter += 1;
        self.new_page();
        Ok(())
    }

    fn page_rows(&self) -> TomeResult<RecordBatch> {
        let schema = self
            .schema
            .clone()
            .unwrap_or_else(|| Arc::new(Schema::empty()));
        concat_same_schema(&schema, &self.rows)
    }

    fn new_page(&mut self) {
        self.rows.clear();
        self.keyset.clear();
        self.schema = None;
        self.manifest.start_page();
    }

    async fn persist_manifest(&self) -> TomeResult<()> {
        let key = self.location().manifest_key();
        let bytes = self.manifest.data().encode()?;
        log_debug!(
            parent: &self.span,
            component = "scribe",
            event = "manifest_write",
            key = %key,
            pages = self.manifest.page_count(),
            complete = self.manifest.data().is_complete,
        );
        self.writer.store().put(&key, Bytes::from(bytes)).await?;
        Ok(())
    }
}
