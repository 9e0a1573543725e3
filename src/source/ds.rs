//! Reader for ds records stored in a [`BlobStore`].
//!
//! ```text
//! {root}/{record}/{ds_type}        # JSON manifest, locator = {root}/{record}
//! {root}/{channel.key}             # one parquet artifact per channel
//! ```

use std::sync::Arc;

use arrow::{
    array::RecordBatch,
    datatypes::{DataType, Field, Schema},
};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::Span;

use super::{normalize_instructions, ChannelInstruction, Channels, SourceReader};
use crate::{
    error::{TomeError, TomeResult},
    header::discover_sources,
    manifest::ContentType,
    observability::{component_span, log_debug, log_warn},
    page::decode_parquet,
    store::BlobStore,
};

/// Manifest of one ds record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DsManifest {
    pub job_id: String,
    #[serde(default)]
    pub channels: Vec<DsChannel>,
}

impl DsManifest {
    fn channel(&self, name: &str) -> Option<&DsChannel> {
        self.channels.iter().find(|channel| channel.channel == name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DsChannel {
    pub channel: String,
    /// Artifact key relative to the record's root.
    pub key: String,
    pub content_type: ContentType,
    #[serde(default)]
    pub columns: Vec<DsColumn>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsColumn {
    pub name: String,
}

/// What to do with a channel whose artifact holds no data at all.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EmptyChannelPolicy {
    /// Report the channel as unreadable.
    #[default]
    Fail,
    /// Yield an empty table with the columns the manifest declares.
    EmptyTable,
}

/// [`SourceReader`] over ds records of one `ds_type`.
pub struct DsSourceReader {
    store: Arc<dyn BlobStore>,
    ds_type: String,
    empty_channels: EmptyChannelPolicy,
    span: Span,
}

impl DsSourceReader {
    pub fn new(store: Arc<dyn BlobStore>, ds_type: impl Into<String>) -> Self {
        let ds_type = ds_type.into();
        Self {
            store,
            span: component_span("ds_reader", &ds_type),
            ds_type,
            empty_channels: EmptyChannelPolicy::default(),
        }
    }

    pub fn with_empty_channel_policy(mut self, policy: EmptyChannelPolicy) -> Self {
        self.empty_channels = policy;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn ds_type(&self) -> &str {
        &self.ds_type
    }

    pub async fn read_manifest(&self, locator: &str) -> TomeResult<DsManifest> {
        let key = format!("{}/{}", locator.trim_end_matches('/'), self.ds_type);
        log_debug!(
            parent: &self.span,
            component = "ds_reader",
            event = "ds_manifest_read",
            key = %key,
        );
        let bytes = self.store.get(&key).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Read one channel of the record at `locator`.
    pub async fn read_channel(
        &self,
        locator: &str,
        manifest: &DsManifest,
        instruction: &ChannelInstruction,
    ) -> TomeResult<RecordBatch> {
        let channel =
            manifest
                .channel(&instruction.channel)
                .ok_or_else(|| TomeError::ChannelNotFound {
                    channel: instruction.channel.clone(),
                    locator: locator.to_string(),
                })?;
        channel.content_type.ensure_supported()?;

        let key = artifact_key(locator, &channel.key);
        log_debug!(
            parent: &self.span,
            component = "ds_reader",
            event = "channel_read",
            channel = %channel.channel,
            key = %key,
        );
        let bytes = self.store.get(&key).await?;
        if bytes.is_empty() {
            return self.empty_channel(channel, instruction, &key);
        }
        let batch = decode_parquet(bytes)?;
        match &instruction.columns {
            Some(columns) => project(&batch, columns),
            None => Ok(batch),
        }
    }

    fn empty_channel(
        &self,
        channel: &DsChannel,
        instruction: &ChannelInstruction,
        key: &str,
    ) -> TomeResult<RecordBatch> {
        if self.empty_channels == EmptyChannelPolicy::Fail {
            return Err(TomeError::UnsupportedFormat {
                detail: format!("empty artifact {key} for channel {}", channel.channel),
            });
        }
        log_warn!(
            parent: &self.span,
            component = "ds_reader",
            event = "empty_channel",
            channel = %channel.channel,
            key = %key,
        );
        let declared: Vec<&str> = channel.columns.iter().map(|c| c.name.as_str()).collect();
        let names: Vec<&str> = match &instruction.columns {
            Some(columns) => columns
                .iter()
                .map(String::as_str)
                .filter(|name| declared.contains(name))
                .collect(),
            None => declared,
        };
        let fields: Vec<Field> = names
            .into_iter()
            .map(|name| Field::new(name, DataType::Null, true))
            .collect();
        Ok(RecordBatch::new_empty(Arc::new(Schema::new(fields))))
    }
}

impl SourceReader for DsSourceReader {
    fn read_channels<'a>(
        &'a self,
        locator: &'a str,
        instructions: Option<&'a [ChannelInstruction]>,
    ) -> BoxFuture<'a, TomeResult<Channels>> {
        Box::pin(async move {
            let manifest = self.read_manifest(locator).await?;
            let instructions = match instructions {
                Some(instructions) => normalize_instructions(instructions),
                None => manifest
                    .channels
                    .iter()
                    .map(|channel| ChannelInstruction::all(channel.channel.clone()))
                    .collect(),
            };
            let mut channels = Channels::with_capacity(instructions.len());
            for instruction in &instructions {
                let batch = self.read_channel(locator, &manifest, instruction).await?;
                channels.insert(instruction.channel.clone(), batch);
            }
            Ok(channels)
        })
    }

    fn record_id<'a>(&'a self, locator: &'a str) -> BoxFuture<'a, TomeResult<String>> {
        Box::pin(async move { Ok(self.read_manifest(locator).await?.job_id) })
    }

    fn discover<'a>(&'a self, root: &'a str, depth: usize) -> BoxFuture<'a, TomeResult<Vec<String>>> {
        Box::pin(discover_sources(self.store.as_ref(), root, depth))
    }
}

fn artifact_key(locator: &str, channel_key: &str) -> String {
    let channel_key = channel_key.trim_start_matches('/');
    match locator.trim_end_matches('/').rsplit_once('/') {
        Some((root, _)) => format!("{root}/{channel_key}"),
        None => channel_key.to_string(),
    }
}

fn project(batch: &RecordBatch, columns: &[String]) -> TomeResult<RecordBatch> {
    let schema = batch.schema();
    let indices = columns
        .iter()
        .map(|column| {
            schema
                .index_of(column)
                .map_err(|_| TomeError::MissingColumn {
                    column: column.clone(),
                })
        })
        .collect::<TomeResult<Vec<_>>>()?;
    Ok(batch.project(&indices)?)
}

#[cfg(test)]
mod tests {
    use arrow::array::{ArrayRef, Int64Array, StringArray};
    use bytes::Bytes;

    use super::*;
    use crate::{
        page::{encode_parquet, PageCompression},
        store::MemoryBlobStore,
    };

    fn kills() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("tick", DataType::Int64, false),
            Field::new("attacker", DataType::Utf8, false),
            Field::new("weapon", DataType::Utf8, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![10, 20])) as ArrayRef,
                Arc::new(StringArray::from(vec!["p1", "p2"])) as ArrayRef,
                Arc::new(StringArray::from(vec!["ak47", "awp"])) as ArrayRef,
            ],
        )
        .expect("kills")
    }

    fn manifest(content_type: &str) -> DsManifest {
        DsManifest {
            job_id: "job-1".into(),
            channels: vec![DsChannel {
                channel: "kills".into(),
                key: "match-1/kills.parquet".into(),
                content_type: ContentType::new(content_type),
                columns: ["tick", "attacker", "weapon"]
                    .into_iter()
                    .map(|name| DsColumn { name: name.into() })
                    .collect(),
            }],
        }
    }

    async fn seed(store: &MemoryBlobStore, manifest: &DsManifest, kills: Bytes) {
        store
            .put(
                "data/match-1/csds",
                Bytes::from(serde_json::to_vec(manifest).expect("manifest")),
            )
            .await
            .expect("put manifest");
        store
            .put("data/match-1/kills.parquet", kills)
            .await
            .expect("put kills");
    }

    fn parquet(batch: &RecordBatch) -> Bytes {
        encode_parquet(batch, PageCompression::None).expect("encode")
    }

    #[tokio::test]
    async fn reads_all_channels_by_default() {
        let store = Arc::new(MemoryBlobStore::new());
        seed(&store, &manifest(ContentType::PARQUET), parquet(&kills())).await;
        let reader = DsSourceReader::new(store, "csds");

        let channels = reader
            .read_channels("data/match-1", None)
            .await
            .expect("channels");
        assert_eq!(channels.len(), 1);
        assert_eq!(channels["kills"], kills());
        assert_eq!(
            reader
                .read_manifest("data/match-1")
                .await
                .expect("manifest")
                .job_id,
            "job-1"
        );
    }

    #[tokio::test]
    async fn projects_requested_columns_in_order() {
        let store = Arc::new(MemoryBlobStore::new());
        seed(&store, &manifest(ContentType::PARQUET), parquet(&kills())).await;
        let reader = DsSourceReader::new(store, "csds");

        let instructions = [ChannelInstruction::columns("kills", ["weapon", "tick"])];
        let channels = reader
            .read_channels("data/match-1", Some(&instructions))
            .await
            .expect("channels");
        let kills = &channels["kills"];
        let names: Vec<_> = kills
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(names, vec!["weapon", "tick"]);

        let instructions = [ChannelInstruction::columns("kills", ["health"])];
        let err = reader
            .read_channels("data/match-1", Some(&instructions))
            .await
            .expect_err("unknown column");
        assert!(matches!(err, TomeError::MissingColumn { .. }));
    }

    #[tokio::test]
    async fn unknown_channel_and_content_type_are_errors() {
        let store = Arc::new(MemoryBlobStore::new());
        seed(&store, &manifest("text/csv"), parquet(&kills())).await;
        let reader = DsSourceReader::new(store, "csds");

        let instructions = [ChannelInstruction::all("grenades")];
        let err = reader
            .read_channels("data/match-1", Some(&instructions))
            .await
            .expect_err("missing channel");
        assert!(matches!(err, TomeError::ChannelNotFound { .. }));

        let err = reader
            .read_channels("data/match-1", None)
            .await
            .expect_err("csv channel");
        assert!(matches!(err, TomeError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn empty_channel_follows_policy() {
        let store = Arc::new(MemoryBlobStore::new());
        seed(&store, &manifest(ContentType::PARQUET), Bytes::new()).await;

        let strict = DsSourceReader::new(store.clone(), "csds");
        let err = strict
            .read_channels("data/match-1", None)
            .await
            .expect_err("empty artifact");
        assert!(matches!(err, TomeError::UnsupportedFormat { .. }));

        let lenient = DsSourceReader::new(store, "csds")
            .with_empty_channel_policy(EmptyChannelPolicy::EmptyTable);
        let instructions = [ChannelInstruction::columns("kills", ["tick", "weapon"])];
        let channels = lenient
            .read_channels("data/match-1", Some(&instructions))
            .await
            .expect("empty table");
        let kills = &channels["kills"];
        assert_eq!(kills.num_rows(), 0);
        assert_eq!(kills.num_columns(), 2);
    }

    #[test]
    fn channel_keys_resolve_against_the_record_root() {
        assert_eq!(artifact_key("data/a/job", "job/ch.parquet"), "data/a/job/ch.parquet");
        assert_eq!(artifact_key("job", "job/ch.parquet"), "job/ch.parquet");
    }
}
