//! Collection-level entry point.
//!
//! A [`TomeCurator`] knows where a collection of tomes lives and which ds type
//! it is built from, and hands out loaders and makers for tomes by name.

use std::sync::Arc;

use arrow::array::{BooleanArray, RecordBatch};
use futures_core::Stream;
use tracing::Span;

use crate::{
    error::TomeResult,
    header,
    layout::TomeLocation,
    loader::TomeLoader,
    maker::TomeMaker,
    manifest::ManifestData,
    observability::{component_span, log_info},
    option::{CuratorOptions, HeaderTomeOptions, MakeOptions, PagingOptions},
    source::SourceReader,
    store::BlobStore,
};

pub struct TomeCurator {
    store: Arc<dyn BlobStore>,
    source: Arc<dyn SourceReader>,
    options: CuratorOptions,
    span: Span,
}

impl TomeCurator {
    pub fn new(
        store: Arc<dyn BlobStore>,
        source: Arc<dyn SourceReader>,
        options: CuratorOptions,
    ) -> Self {
        let span = component_span("curator", options.ds_type());
        Self {
            store,
            source,
            options,
            span,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn options(&self) -> &CuratorOptions {
        &self.options
    }

    /// Where the tome called `tome_name` lives in this collection.
    pub fn location(&self, tome_name: &str) -> TomeLocation {
        TomeLocation::new(self.options.ds_type.clone(), tome_name)
            .with_prefix(self.options.prefix.clone())
    }

    /// Build a header tome from every source record found under `source_root`.
    ///
    /// `None` uses the collection's default header name.
    pub async fn create_header_tome(
        &self,
        tome_name: Option<&str>,
        source_root: &str,
        options: HeaderTomeOptions,
    ) -> TomeResult<TomeLoader> {
        let name = tome_name.unwrap_or(&self.options.default_header_name);
        header::create_header_tome(
            Arc::clone(&self.store),
            self.source.as_ref(),
            self.location(name),
            source_root,
            &self.options.locator_column,
            &options,
            self.span.clone(),
        )
        .await
    }

    /// Build a header tome from the rows of `src_tome_name` kept by `selector`.
    pub async fn create_subheader_tome<F>(
        &self,
        tome_name: &str,
        src_tome_name: Option<&str>,
        selector: F,
    ) -> TomeResult<TomeLoader>
    where
        F: FnOnce(&RecordBatch) -> TomeResult<BooleanArray>,
    {
        let src_name = src_tome_name.unwrap_or(&self.options.default_header_name);
        let mut src = self.get_loader(src_name);
        header::create_subheader_tome(
            Arc::clone(&self.store),
            &mut src,
            self.location(tome_name),
            selector,
            PagingOptions::default(),
            self.span.clone(),
        )
        .await
    }

    /// Loader for `tome_name`, linked to the header snapshot stored with it.
    pub fn get_loader(&self, tome_name: &str) -> TomeLoader {
        TomeLoader::new(Arc::clone(&self.store), self.location(tome_name))
            .with_span(self.span.clone())
            .with_header()
    }

    pub async fn get_dataframe(&self, tome_name: &str) -> TomeResult<RecordBatch> {
        self.get_loader(tome_name).get_dataframe().await
    }

    pub async fn get_keyset(&self, tome_name: &str) -> TomeResult<Vec<String>> {
        self.get_loader(tome_name).get_keyset().await
    }

    pub async fn get_manifest(&self, tome_name: &str) -> TomeResult<ManifestData> {
        Ok(self.get_loader(tome_name).manifest().await?.clone())
    }

    pub async fn iterate_pages(
        &self,
        tome_name: &str,
    ) -> TomeResult<impl Stream<Item = TomeResult<(RecordBatch, Vec<String>)>> + Send + 'static>
    {
        self.get_loader(tome_name).iterate_pages().await
    }

    /// Maker for `tome_name`, driven by the header named in `options` (or the default header).
    pub fn make_tome(&self, tome_name: &str, options: MakeOptions) -> TomeMaker {
        let header_name = options
            .header_tome_name
            .clone()
            .unwrap_or_else(|| self.options.default_header_name.clone());
        log_info!(
            parent: &self.span,
            component = "curator",
            event = "make_tome",
            tome = tome_name,
            header = %header_name,
        );
        let header = TomeLoader::new(Arc::clone(&self.store), self.location(&header_name));
        TomeMaker::new(
            Arc::clone(&self.store),
            self.location(tome_name),
            header,
            Arc::clone(&self.source),
            options,
        )
        .with_locator_column(self.options.locator_column.clone())
        .with_span(self.span.clone())
    }
}
