//! Page artifacts: one parquet file for rows and one for keys.
//!
//! Pages are encoded in memory and handed to the [`BlobStore`] as whole
//! objects, so the same codec works for local disks and object stores.

use std::sync::Arc;

use arrow::{
    array::{Array, ArrayRef, AsArray, RecordBatch, StringArray},
    compute::concat_batches,
    datatypes::{DataType, Field, Schema, SchemaRef},
};
use bytes::Bytes;
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    basic::{Compression, ZstdLevel},
    file::properties::WriterProperties,
};
use tracing::Span;

use crate::{
    error::{TomeError, TomeResult},
    manifest::{PageArtifact, PageDescriptor},
    observability::{log_debug, log_info},
    store::BlobStore,
};

/// Column name of the single-column keyset artifact.
pub const KEYSET_COLUMN: &str = "key";

/// Compression choices supported by the page writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PageCompression {
    /// Leave pages uncompressed (useful for tests and debugging).
    None,
    /// Apply Zstd compression with default tuning.
    #[default]
    Zstd,
}

fn writer_properties(compression: PageCompression) -> WriterProperties {
    let builder = match compression {
        PageCompression::None => {
            WriterProperties::builder().set_compression(Compression::UNCOMPRESSED)
        }
        PageCompression::Zstd => {
            WriterProperties::builder().set_compression(Compression::ZSTD(ZstdLevel::default()))
        }
    };
    builder.build()
}

/// Serialize one batch into an in-memory parquet file.
pub(crate) fn encode_parquet(
    batch: &RecordBatch,
    compression: PageCompression,
) -> TomeResult<Bytes> {
    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(
        &mut buffer,
        batch.schema(),
        Some(writer_properties(compression)),
    )?;
    writer.write(batch)?;
    writer.close()?;
    Ok(Bytes::from(buffer))
}

/// Decode an in-memory parquet file into a single batch.
pub(crate) fn decode_parquet(bytes: Bytes) -> TomeResult<RecordBatch> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
    let schema = Arc::clone(builder.schema());
    let batches = builder.build()?.collect::<Result<Vec<_>, _>>()?;
    concat_same_schema(&schema, &batches)
}

/// Concatenate batches after checking that their columns line up with `schema`.
pub(crate) fn concat_same_schema(
    schema: &SchemaRef,
    batches: &[RecordBatch],
) -> TomeResult<RecordBatch> {
    if let Some(batch) = batches
        .iter()
        .find(|batch| batch.schema().fields() != schema.fields())
    {
        return Err(TomeError::SchemaMismatch(format!(
            "expected columns {:?}, found {:?}",
            field_names(schema),
            field_names(&batch.schema()),
        )));
    }
    Ok(concat_batches(schema, batches)?)
}

pub(crate) fn field_names(schema: &Schema) -> Vec<&str> {
    schema.fields().iter().map(|f| f.name().as_str()).collect()
}

/// Borrow the Utf8 column `name` of `batch`.
pub(crate) fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> TomeResult<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|column| column.as_string_opt::<i32>())
        .ok_or_else(|| TomeError::MissingColumn {
            column: name.to_string(),
        })
}

/// Non-null values of the Utf8 column `name`, in row order.
pub(crate) fn string_values(batch: &RecordBatch, name: &str) -> TomeResult<Vec<String>> {
    Ok(string_column(batch, name)?
        .iter()
        .map(|value| value.unwrap_or_default().to_string())
        .collect())
}

fn keyset_batch(keys: &[String]) -> TomeResult<RecordBatch> {
    let schema = Arc::new(Schema::new(vec![Field::new(
        KEYSET_COLUMN,
        DataType::Utf8,
        false,
    )]));
    let column: ArrayRef = Arc::new(StringArray::from_iter_values(keys.iter()));
    Ok(RecordBatch::try_new(schema, vec![column])?)
}

fn keys_from_batch(batch: &RecordBatch) -> TomeResult<Vec<String>> {
    if batch.num_columns() == 0 {
        return Err(TomeError::MissingColumn {
            column: KEYSET_COLUMN.to_string(),
        });
    }
    let column = batch.column(0);
    let strings = column
        .as_string_opt::<i32>()
        .ok_or_else(|| TomeError::UnsupportedFormat {
            detail: format!("keyset column of type {}", column.data_type()),
        })?;
    Ok(strings
        .iter()
        .map(|value| value.unwrap_or_default().to_string())
        .collect())
}

/// Writes page artifacts for one tome.
pub struct PageWriter {
    store: Arc<dyn BlobStore>,
    compression: PageCompression,
    span: Span,
}

impl PageWriter {
    pub fn new(store: Arc<dyn BlobStore>, compression: PageCompression, span: Span) -> Self {
        Self {
            store,
            compression,
            span,
        }
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Persist the rows and keys of `page` under the keys its descriptor names.
    pub async fn write_page(
        &self,
        page: &PageDescriptor,
        rows: &RecordBatch,
        keys: &[String],
    ) -> TomeResult<()> {
        page.rows.content_type.ensure_supported()?;
        page.keyset.content_type.ensure_supported()?;

        log_info!(
            parent: &self.span,
            component = "page_writer",
            event = "page_write_start",
            page = page.number,
            rows = rows.num_rows(),
            keys = keys.len(),
        );
        self.write_artifact(&page.rows, rows).await?;
        self.write_artifact(&page.keyset, &keyset_batch(keys)?)
            .await
    }

    async fn write_artifact(&self, artifact: &PageArtifact, batch: &RecordBatch) -> TomeResult<()> {
        let bytes = encode_parquet(batch, self.compression)?;
        log_debug!(
            parent: &self.span,
            component = "page_writer",
            event = "artifact_write",
            key = %artifact.key,
            bytes = bytes.len(),
        );
        self.store.put(&artifact.key, bytes).await?;
        Ok(())
    }
}

/// Reads page artifacts back.
#[derive(Clone)]
pub struct PageReader {
    store: Arc<dyn BlobStore>,
    span: Span,
}

impl PageReader {
    pub fn new(store: Arc<dyn BlobStore>, span: Span) -> Self {
        Self { store, span }
    }

    pub async fn read_rows(&self, page: &PageDescriptor) -> TomeResult<RecordBatch> {
        page.rows.content_type.ensure_supported()?;
        log_debug!(
            parent: &self.span,
            component = "page_reader",
            event = "rows_read",
            page = page.number,
        );
        let bytes = self.store.get(&page.rows.key).await?;
        decode_parquet(bytes)
    }

    /// Keys of `page`, taken from the first column of its keyset artifact.
    pub async fn read_keyset(&self, page: &PageDescriptor) -> TomeResult<Vec<String>> {
        page.keyset.content_type.ensure_supported()?;
        log_debug!(
            parent: &self.span,
            component = "page_reader",
            event = "keyset_read",
            page = page.number,
        );
        let bytes = self.store.get(&page.keyset.key).await?;
        keys_from_batch(&decode_parquet(bytes)?)
    }

    pub async fn read_page(&self, page: &PageDescriptor) -> TomeResult<(RecordBatch, Vec<String>)> {
        let rows = self.read_rows(page).await?;
        let keys = self.read_keyset(page).await?;
        Ok((rows, keys))
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::Int64Array;

    use super::*;
    use crate::{
        layout::TomeLocation,
        manifest::{ContentType, ManifestSpec, TomeManifest},
        store::MemoryBlobStore,
    };

    fn rows() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("round", DataType::Int64, false),
            Field::new("winner", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef,
                Arc::new(StringArray::from(vec![Some("ct"), None, Some("t")])) as ArrayRef,
            ],
        )
        .expect("rows")
    }

    fn page_zero() -> PageDescriptor {
        let mut manifest =
            TomeManifest::create(TomeLocation::new("csds", "pages"), ManifestSpec::default());
        manifest.start_page();
        manifest.end_page(0).expect("page")
    }

    #[tokio::test]
    async fn page_round_trips_rows_and_keys() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let writer = PageWriter::new(Arc::clone(&store), PageCompression::Zstd, Span::none());
        let reader = PageReader::new(Arc::clone(&store), Span::none());
        let page = page_zero();
        let keys = vec!["a".to_string(), "a".to_string(), "b".to_string()];

        writer.write_page(&page, &rows(), &keys).await.expect("write");
        let (read_rows, read_keys) = reader.read_page(&page).await.expect("read");

        assert_eq!(read_rows, rows());
        assert_eq!(read_keys, keys);
    }

    #[tokio::test]
    async fn unsupported_content_type_fails_before_io() {
        let store = Arc::new(MemoryBlobStore::new());
        let dyn_store: Arc<dyn BlobStore> = store.clone();
        let writer = PageWriter::new(Arc::clone(&dyn_store), PageCompression::None, Span::none());
        let reader = PageReader::new(dyn_store, Span::none());

        let mut page = page_zero();
        page.keyset.content_type = ContentType::new("text/csv");

        let err = writer
            .write_page(&page, &rows(), &["a".to_string()])
            .await
            .expect_err("write rejected");
        assert!(matches!(err, TomeError::UnsupportedFormat { .. }));
        assert_eq!(store.put_count(), 0);

        let err = reader.read_keyset(&page).await.expect_err("read rejected");
        assert!(matches!(err, TomeError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn missing_page_is_not_found() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let reader = PageReader::new(store, Span::none());
        let err = reader.read_rows(&page_zero()).await.expect_err("missing");
        assert!(err.is_not_found());
    }

    #[test]
    fn concat_rejects_mismatched_columns() {
        let other = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, false)])),
            vec![Arc::new(Int64Array::from(vec![1])) as ArrayRef],
        )
        .expect("other");
        let err = concat_same_schema(&rows().schema(), &[rows(), other]).expect_err("mismatch");
        assert!(matches!(err, TomeError::SchemaMismatch(_)));
    }
}
