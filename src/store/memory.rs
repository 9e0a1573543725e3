use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard,
    },
};

use bytes::Bytes;
use futures_util::future::BoxFuture;

use super::{key_segments, BlobError, BlobResult, BlobStore};

/// [`BlobStore`] kept entirely in memory.
///
/// Handy for tests and for short-lived derived tomes; counts every `put` so
/// callers can assert that an operation wrote nothing.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
    puts: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `put` calls so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Snapshot of all stored keys.
    pub fn keys(&self) -> Vec<String> {
        self.objects().keys().cloned().collect()
    }

    /// Whether an object is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        normalize(key)
            .map(|key| self.objects().contains_key(&key))
            .unwrap_or(false)
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<String, Bytes>> {
        // a panic while holding the lock cannot leave the map half-updated
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn normalize(key: &str) -> BlobResult<String> {
    Ok(key_segments(key)?.join("/"))
}

impl BlobStore for MemoryBlobStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BlobResult<Bytes>> {
        Box::pin(async move {
            let normalized = normalize(key)?;
            self.objects()
                .get(&normalized)
                .cloned()
                .ok_or_else(|| BlobError::NotFound {
                    key: key.to_string(),
                })
        })
    }

    fn put<'a>(&'a self, key: &'a str, bytes: Bytes) -> BoxFuture<'a, BlobResult<()>> {
        Box::pin(async move {
            let normalized = normalize(key)?;
            self.objects().insert(normalized, bytes);
            self.puts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, BlobResult<Vec<String>>> {
        Box::pin(async move {
            let segments: Vec<&str> = prefix.split('/').filter(|p| !p.is_empty()).collect();
            let dir = if segments.is_empty() {
                String::new()
            } else {
                format!("{}/", segments.join("/"))
            };
            Ok(self
                .objects()
                .keys()
                .filter(|key| key.starts_with(&dir))
                .cloned()
                .collect())
        })
    }
}
