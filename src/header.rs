//! Header tomes: the per-key enumeration that drives every build.
//!
//! A header tome holds one row per source record with at least a `key` column
//! and a locator column. Subheaders are row selections of another header, and
//! every fresh build stores a snapshot of its header next to the tome.

use std::{collections::BTreeSet, sync::Arc};

use arrow::{
    array::{ArrayRef, BooleanArray, RecordBatch, StringArray},
    compute::filter_record_batch,
    datatypes::{DataType, Field, Schema},
};
use tracing::Span;

use crate::{
    error::TomeResult,
    layout::TomeLocation,
    loader::TomeLoader,
    manifest::{ManifestData, ManifestSpec, TomeManifest},
    observability::{log_debug, log_info},
    option::{HeaderTomeOptions, PagingOptions},
    page::string_values,
    scribe::{KeyBatch, Scribe},
    source::{ChannelInstruction, SourceReader},
    store::BlobStore,
};

/// Header column holding each record's key.
pub const KEY_COLUMN: &str = "key";
/// Source channel read for every record when building a header tome.
pub const HEADER_CHANNEL: &str = "header";

/// Locators `depth` segments below `root` that contain at least one object.
pub async fn discover_sources(
    store: &dyn BlobStore,
    root: &str,
    depth: usize,
) -> TomeResult<Vec<String>> {
    let root = root.trim_matches('/');
    let keys = store.list(root).await?;
    let mut locators = BTreeSet::new();
    for key in &keys {
        let relative = key
            .strip_prefix(root)
            .unwrap_or(key)
            .trim_start_matches('/');
        let segments: Vec<&str> = relative.split('/').collect();
        if depth == 0 || segments.len() <= depth {
            continue;
        }
        let record = segments[..depth].join("/");
        locators.insert(if root.is_empty() {
            record
        } else {
            format!("{root}/{record}")
        });
    }
    Ok(locators.into_iter().collect())
}

/// Build a header tome with one page-row group per discovered source record.
///
/// Each record's header channel is extended with the locator column and the
/// `key` column (the record id) before it is appended under that key.
pub async fn create_header_tome(
    store: Arc<dyn BlobStore>,
    source: &dyn SourceReader,
    location: TomeLocation,
    source_root: &str,
    locator_column: &str,
    options: &HeaderTomeOptions,
    span: Span,
) -> TomeResult<TomeLoader> {
    let locators = source.discover(source_root, options.path_depth).await?;
    log_info!(
        parent: &span,
        component = "header",
        event = "header_build_start",
        tome = %location,
        sources = locators.len(),
    );

    let spec = ManifestSpec {
        is_header: true,
        ..ManifestSpec::default()
    };
    let manifest = TomeManifest::create(location.clone(), spec);
    let mut scribe = Scribe::new(manifest, Arc::clone(&store), options.paging.clone())
        .with_span(span.clone());
    scribe.start().await?;

    let instructions = [ChannelInstruction::all(HEADER_CHANNEL)];
    for locator in &locators {
        let key = source.record_id(locator).await?;
        let mut channels = source.read_channels(locator, Some(&instructions)).await?;
        let rows = channels.remove(HEADER_CHANNEL).unwrap_or_else(|| {
            RecordBatch::new_empty(Arc::new(Schema::empty()))
        });
        log_debug!(
            parent: &span,
            component = "header",
            event = "header_source",
            locator = %locator,
            key = %key,
            rows = rows.num_rows(),
        );
        let rows = with_constant_columns(
            &rows,
            &[(locator_column, locator.as_str()), (KEY_COLUMN, key.as_str())],
        )?;
        scribe.concat(rows, key).await?;
    }
    scribe.finish().await?;

    Ok(TomeLoader::new(store, location).with_span(span))
}

/// Build a header tome from the rows of `src` that `selector` keeps.
pub async fn create_subheader_tome<F>(
    store: Arc<dyn BlobStore>,
    src: &mut TomeLoader,
    location: TomeLocation,
    selector: F,
    paging: PagingOptions,
    span: Span,
) -> TomeResult<TomeLoader>
where
    F: FnOnce(&RecordBatch) -> TomeResult<BooleanArray>,
{
    let rows = src.get_dataframe().await?;
    let mask = selector(&rows)?;
    let rows = filter_record_batch(&rows, &mask)?;
    log_info!(
        parent: &span,
        component = "header",
        event = "subheader_build",
        tome = %location,
        source = %src.location(),
        rows = rows.num_rows(),
    );

    let spec = ManifestSpec {
        is_header: true,
        header_tome_name: Some(src.location().tome_name().to_string()),
        ..ManifestSpec::default()
    };
    let keys = string_values(&rows, KEY_COLUMN)?;
    write_header(Arc::clone(&store), location.clone(), spec, rows, keys, paging, &span).await?;
    Ok(TomeLoader::new(store, location).with_span(span))
}

/// Snapshot `header` into the copied-header slot of `target`.
///
/// The snapshot gets a fresh id and records the source header's id as its
/// `sourceId`.
pub async fn copy_header(
    store: Arc<dyn BlobStore>,
    header: &mut TomeLoader,
    target: &TomeLocation,
    span: &Span,
) -> TomeResult<ManifestData> {
    let source = header.manifest().await?.clone();
    let rows = header.get_dataframe().await?;
    let keys = header.get_keyset().await?;
    log_info!(
        parent: span,
        component = "header",
        event = "header_copy",
        source = %header.location(),
        target = %target.copied_header(),
        rows = rows.num_rows(),
    );

    let spec = ManifestSpec {
        is_header: true,
        is_copied_header: true,
        header_tome_name: Some(source.tome_name.clone()),
        source_id: Some(source.id),
    };
    write_header(
        store,
        target.copied_header(),
        spec,
        rows,
        keys,
        PagingOptions::default(),
        span,
    )
    .await
}

async fn write_header(
    store: Arc<dyn BlobStore>,
    location: TomeLocation,
    spec: ManifestSpec,
    rows: RecordBatch,
    keys: Vec<String>,
    paging: PagingOptions,
    span: &Span,
) -> TomeResult<ManifestData> {
    let manifest = TomeManifest::create(location, spec);
    let mut scribe = Scribe::new(manifest, store, paging).with_span(span.clone());
    scribe.start().await?;
    scribe.concat(rows, KeyBatch::Many(keys)).await?;
    scribe.finish().await?;
    Ok(scribe.manifest().clone())
}

/// Replace or append Utf8 columns holding one value on every row.
fn with_constant_columns(batch: &RecordBatch, columns: &[(&str, &str)]) -> TomeResult<RecordBatch> {
    let schema = batch.schema();
    let mut fields: Vec<Field> = Vec::with_capacity(schema.fields().len() + columns.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(fields.capacity());
    for (field, array) in schema.fields().iter().zip(batch.columns()) {
        if columns.iter().any(|(name, _)| name == field.name()) {
            continue;
        }
        fields.push((**field).clone());
        arrays.push(Arc::clone(array));
    }
    for (name, value) in columns {
        fields.push(Field::new(*name, DataType::Utf8, false));
        arrays.push(Arc::new(StringArray::from(vec![*value; batch.num_rows()])));
    }
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

#[cfg(test)]
mod tests {
    use arrow::array::Int64Array;
    use bytes::Bytes;

    use super::*;
    use crate::{page::string_column, store::MemoryBlobStore};

    fn header_rows(keys: &[&str]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new(KEY_COLUMN, DataType::Utf8, false),
            Field::new("ds_path", DataType::Utf8, false),
            Field::new("map", DataType::Utf8, false),
        ]));
        let paths: Vec<String> = keys.iter().map(|key| format!("data/{key}")).collect();
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(keys.to_vec())) as ArrayRef,
                Arc::new(StringArray::from(paths)) as ArrayRef,
                Arc::new(StringArray::from(vec!["dust2"; keys.len()])) as ArrayRef,
            ],
        )
        .expect("header rows")
    }

    async fn seed_header(store: &Arc<MemoryBlobStore>, keys: &[&str]) -> TomeLoader {
        let location = TomeLocation::new("csds", "header");
        let spec = ManifestSpec {
            is_header: true,
            ..ManifestSpec::default()
        };
        write_header(
            store.clone(),
            location.clone(),
            spec,
            header_rows(keys),
            keys.iter().map(|k| k.to_string()).collect(),
            PagingOptions::default(),
            &Span::none(),
        )
        .await
        .expect("header");
        TomeLoader::new(store.clone(), location)
    }

    #[tokio::test]
    async fn discovers_records_at_depth() {
        let store = MemoryBlobStore::new();
        for key in [
            "data/2024/01/job-a/csds",
            "data/2024/01/job-a/kills.parquet",
            "data/2024/02/job-b/csds",
            "data/2024/readme",
        ] {
            store.put(key, Bytes::from_static(b"x")).await.expect("put");
        }
        let found = discover_sources(&store, "data", 3).await.expect("discover");
        assert_eq!(found, vec!["data/2024/01/job-a", "data/2024/02/job-b"]);
    }

    #[tokio::test]
    async fn subheader_keeps_selected_rows() {
        let store = Arc::new(MemoryBlobStore::new());
        let mut header = seed_header(&store, &["A", "B", "X", "C"]).await;

        let mut subheader = create_subheader_tome(
            store.clone(),
            &mut header,
            TomeLocation::new("csds", "no_x"),
            |rows| {
                let keys = string_column(rows, KEY_COLUMN)?;
                Ok(keys.iter().map(|key| Some(key != Some("X"))).collect())
            },
            PagingOptions::default(),
            Span::none(),
        )
        .await
        .expect("subheader");

        let rows = subheader.get_dataframe().await.expect("rows");
        let keys = subheader.get_keyset().await.expect("keys");
        assert_eq!(rows.num_rows(), 3);
        assert_eq!(keys, vec!["A", "B", "C"]);
        assert_eq!(rows.num_rows(), keys.len());

        let manifest = subheader.manifest().await.expect("manifest");
        assert!(manifest.is_header);
        assert_eq!(manifest.header_tome_name.as_deref(), Some("header"));
    }

    #[tokio::test]
    async fn copied_header_records_its_source() {
        let store = Arc::new(MemoryBlobStore::new());
        let mut header = seed_header(&store, &["A", "B"]).await;
        let header_id = header.manifest().await.expect("manifest").id;

        let target = TomeLocation::new("csds", "kills");
        let copy = copy_header(store.clone(), &mut header, &target, &Span::none())
            .await
            .expect("copy");
        assert_ne!(copy.id, header_id);
        assert_eq!(copy.source_id, Some(header_id));
        assert!(copy.is_copied_header);
        assert_eq!(copy.path, "csds/kills/header");

        let mut loader = TomeLoader::new(store, target).with_header();
        let snapshot = loader.header().expect("linked header");
        assert_eq!(snapshot.get_keyset().await.expect("keys"), vec!["A", "B"]);
    }

    #[test]
    fn constant_columns_replace_existing_ones() {
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("round", DataType::Int64, false),
                Field::new(KEY_COLUMN, DataType::Utf8, false),
            ])),
            vec![
                Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef,
                Arc::new(StringArray::from(vec!["old", "old"])) as ArrayRef,
            ],
        )
        .expect("batch");
        let out = with_constant_columns(&batch, &[("ds_path", "data/j"), (KEY_COLUMN, "j")])
            .expect("columns");
        assert_eq!(out.num_columns(), 3);
        assert_eq!(
            string_values(&out, KEY_COLUMN).expect("keys"),
            vec!["j", "j"]
        );
        assert_eq!(out.schema().field(2).name(), KEY_COLUMN);
    }
}
