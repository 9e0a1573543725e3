use std::{
    io,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::fs;

use super::{key_segments, BlobError, BlobResult, BlobStore};

/// [`BlobStore`] backed by a directory tree on the local filesystem.
///
/// Objects are written to a sibling temporary file and renamed into place, so a
/// crash mid-write never leaves a truncated manifest behind.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory all keys are resolved against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> BlobResult<PathBuf> {
        let mut path = self.root.clone();
        for part in key_segments(key)? {
            path.push(part);
        }
        Ok(path)
    }
}

fn io_err(key: &str, source: io::Error) -> BlobError {
    if source.kind() == io::ErrorKind::NotFound {
        BlobError::NotFound {
            key: key.to_string(),
        }
    } else {
        BlobError::Io {
            key: key.to_string(),
            source,
        }
    }
}

impl BlobStore for LocalBlobStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BlobResult<Bytes>> {
        Box::pin(async move {
            let path = self.path_for(key)?;
            let data = fs::read(&path).await.map_err(|err| io_err(key, err))?;
            Ok(Bytes::from(data))
        })
    }

    fn put<'a>(&'a self, key: &'a str, bytes: Bytes) -> BoxFuture<'a, BlobResult<()>> {
        Box::pin(async move {
            let path = self.path_for(key)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|err| io_err(key, err))?;
            }
            let mut staging = path.clone().into_os_string();
            staging.push(".tmp");
            let staging = PathBuf::from(staging);
            fs::write(&staging, &bytes)
                .await
                .map_err(|err| io_err(key, err))?;
            fs::rename(&staging, &path)
                .await
                .map_err(|err| io_err(key, err))
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, BlobResult<Vec<String>>> {
        Box::pin(async move {
            let start = match key_segments(prefix) {
                Ok(_) => self.path_for(prefix)?,
                Err(_) if prefix.split('/').all(str::is_empty) => self.root.clone(),
                Err(err) => return Err(err),
            };

            let mut keys = Vec::new();
            let mut pending = vec![start];
            while let Some(dir) = pending.pop() {
                let mut entries = match fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                    Err(err) => return Err(io_err(prefix, err)),
                };
                while let Some(entry) = entries
                    .next_entry()
                    .await
                    .map_err(|err| io_err(prefix, err))?
                {
                    let path = entry.path();
                    let file_type = entry
                        .file_type()
                        .await
                        .map_err(|err| io_err(prefix, err))?;
                    if file_type.is_dir() {
                        pending.push(path);
                    } else if let Some(key) = relative_key(&self.root, &path) {
                        if !key.ends_with(".tmp") {
                            keys.push(key);
                        }
                    }
                }
            }
            keys.sort();
            Ok(keys)
        })
    }
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = relative
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect();
    parts.map(|parts| parts.join("/"))
}
