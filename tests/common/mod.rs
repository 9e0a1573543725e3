//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use arrow::{
    array::{ArrayRef, Int64Array, RecordBatch, StringArray},
    datatypes::{DataType, Field, Schema},
};
use futures::future::BoxFuture;
use tomes::{
    manifest::{ManifestSpec, TomeManifest},
    BlobStore, ChannelInstruction, Channels, CuratorOptions, MakeOptions, ManifestData,
    PagingOptions, Scribe, SourceReader, TomeCurator, TomeError, TomeLocation, TomeMaker,
    TomeResult,
};

pub const DS_TYPE: &str = "csds";
pub const CHANNEL: &str = "rounds";

/// Header rows for `keys`, each pointing at `src/<key>`.
pub fn header_batch(keys: &[&str]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("ds_path", DataType::Utf8, false),
    ]));
    let locators: Vec<String> = keys.iter().map(|key| format!("src/{key}")).collect();
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(keys.to_vec())) as ArrayRef,
            Arc::new(StringArray::from(locators)) as ArrayRef,
        ],
    )
    .expect("header batch")
}

/// `count` rows of round numbers for `key`.
pub fn rounds(key: &str, count: usize) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("match", DataType::Utf8, false),
        Field::new("round", DataType::Int64, false),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(vec![key; count])) as ArrayRef,
            Arc::new(Int64Array::from_iter_values(0..count as i64)) as ArrayRef,
        ],
    )
    .expect("rounds")
}

/// Write a complete header tome named "header" holding `keys`.
pub async fn seed_header(store: Arc<dyn BlobStore>, keys: &[&str]) -> ManifestData {
    let location = TomeLocation::new(DS_TYPE, "header");
    let spec = ManifestSpec {
        is_header: true,
        ..ManifestSpec::default()
    };
    let mut scribe = Scribe::new(
        TomeManifest::create(location, spec),
        store,
        PagingOptions::default(),
    );
    scribe.start().await.expect("header start");
    scribe
        .concat(header_batch(keys), keys.to_vec())
        .await
        .expect("header concat");
    scribe.finish().await.expect("header finish");
    scribe.manifest().clone()
}

pub fn curator(store: Arc<dyn BlobStore>, source: Arc<FakeSource>) -> TomeCurator {
    TomeCurator::new(store, source, CuratorOptions::new(DS_TYPE))
}

/// Flush a page after every key (each key contributes two rows).
pub fn page_per_key() -> MakeOptions {
    MakeOptions::default().paging(
        PagingOptions::default()
            .max_page_row_count(Some(1))
            .limit_check_frequency(1),
    )
}

/// Process `count` keys of `maker` without letting it finish.
pub async fn process(maker: &mut TomeMaker, count: usize) -> Vec<String> {
    let mut keys = Vec::with_capacity(count);
    for _ in 0..count {
        let item = maker.next().await.expect("next").expect("key available");
        maker
            .concat(item.channels[CHANNEL].clone())
            .await
            .expect("concat");
        keys.push(item.key);
    }
    keys
}

/// Process every remaining key of `maker`.
pub async fn process_all(maker: &mut TomeMaker) -> Vec<String> {
    let mut keys = Vec::new();
    while let Some(item) = maker.next().await.expect("next") {
        maker
            .concat(item.channels[CHANNEL].clone())
            .await
            .expect("concat");
        keys.push(item.key);
    }
    keys
}

/// In-memory source: every locator `src/<key>` yields two rounds for `key`.
#[derive(Default)]
pub struct FakeSource {
    failing: Mutex<HashSet<String>>,
    reads: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on(&self, locator: &str) {
        self.failing
            .lock()
            .expect("lock")
            .insert(locator.to_string());
    }

    pub fn reads(&self) -> Vec<String> {
        self.reads.lock().expect("lock").clone()
    }
}

fn last_segment(locator: &str) -> &str {
    locator.rsplit('/').next().unwrap_or(locator)
}

impl SourceReader for FakeSource {
    fn read_channels<'a>(
        &'a self,
        locator: &'a str,
        _instructions: Option<&'a [ChannelInstruction]>,
    ) -> BoxFuture<'a, TomeResult<Channels>> {
        Box::pin(async move {
            self.reads.lock().expect("lock").push(locator.to_string());
            if self.failing.lock().expect("lock").contains(locator) {
                return Err(TomeError::NotFound {
                    key: locator.to_string(),
                });
            }
            let mut channels = Channels::new();
            channels.insert(CHANNEL.to_string(), rounds(last_segment(locator), 2));
            Ok(channels)
        })
    }

    fn record_id<'a>(&'a self, locator: &'a str) -> BoxFuture<'a, TomeResult<String>> {
        Box::pin(async move { Ok(last_segment(locator).to_string()) })
    }

    fn discover<'a>(
        &'a self,
        _root: &'a str,
        _depth: usize,
    ) -> BoxFuture<'a, TomeResult<Vec<String>>> {
        Box::pin(async move { Ok(Vec::new()) })
    }
}
