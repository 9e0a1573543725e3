use std::{io, sync::Arc};

use bytes::Bytes;
use fusio::{dynamic::DynFs, fs::OpenOptions, path::Path, Error as FusioError, Read, Write};
use futures_util::{future::BoxFuture, StreamExt};

use super::{key_segments, BlobError, BlobResult, BlobStore};

/// [`BlobStore`] over any fusio filesystem (local disk, S3, ...).
#[derive(Clone)]
pub struct FusioBlobStore {
    fs: Arc<dyn DynFs>,
    root: Path,
}

impl FusioBlobStore {
    /// Wrap `fs`, resolving every key below `root`.
    pub fn new(fs: Arc<dyn DynFs>, root: Path) -> Self {
        Self { fs, root }
    }

    /// Access the underlying filesystem.
    pub fn fs(&self) -> &Arc<dyn DynFs> {
        &self.fs
    }

    /// Root prefix for all keys.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_for(&self, segments: &[&str]) -> Path {
        segments
            .iter()
            .fold(self.root.clone(), |path, part| path.child(*part))
    }

    fn write_options() -> OpenOptions {
        OpenOptions::default()
            .read(false)
            .write(true)
            .create(true)
            .truncate(true)
    }

    fn read_options() -> OpenOptions {
        OpenOptions::default().read(true).write(false)
    }
}

fn map_fusio_err(key: &str, err: FusioError) -> BlobError {
    match err {
        FusioError::Io(source) if source.kind() == io::ErrorKind::NotFound => {
            BlobError::NotFound {
                key: key.to_string(),
            }
        }
        source => BlobError::Fusio {
            key: key.to_string(),
            source,
        },
    }
}

impl BlobStore for FusioBlobStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BlobResult<Bytes>> {
        Box::pin(async move {
            let path = self.dir_for(&key_segments(key)?);
            let mut file = self
                .fs
                .open_options(&path, Self::read_options())
                .await
                .map_err(|err| map_fusio_err(key, err))?;
            let (read_res, data) = file.read_to_end_at(Vec::new(), 0).await;
            read_res.map_err(|err| map_fusio_err(key, err))?;
            Ok(Bytes::from(data))
        })
    }

    fn put<'a>(&'a self, key: &'a str, bytes: Bytes) -> BoxFuture<'a, BlobResult<()>> {
        Box::pin(async move {
            let segments = key_segments(key)?;
            let (_, parents) = segments
                .split_last()
                .ok_or_else(|| BlobError::InvalidKey(key.to_string()))?;
            self.fs
                .create_dir_all(&self.dir_for(parents))
                .await
                .map_err(|err| map_fusio_err(key, err))?;

            let path = self.dir_for(&segments);
            let mut file = self
                .fs
                .open_options(&path, Self::write_options())
                .await
                .map_err(|err| map_fusio_err(key, err))?;
            let (write_res, _buf) = file.write_all(bytes.to_vec()).await;
            write_res.map_err(|err| map_fusio_err(key, err))?;
            file.close().await.map_err(|err| map_fusio_err(key, err))
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, BlobResult<Vec<String>>> {
        Box::pin(async move {
            let segments: Vec<&str> = prefix.split('/').filter(|p| !p.is_empty()).collect();
            let dir = self.dir_for(&segments);
            let mut stream = match self.fs.list(&dir).await {
                Ok(stream) => stream,
                Err(FusioError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                    return Ok(Vec::new());
                }
                Err(err) => return Err(map_fusio_err(prefix, err)),
            };

            let root = self.root.as_ref().trim_end_matches('/').to_string();
            let mut keys = Vec::new();
            while let Some(meta) = stream.next().await {
                let meta = meta.map_err(|err| map_fusio_err(prefix, err))?;
                let full = meta.path.as_ref();
                let relative = if root.is_empty() {
                    full
                } else {
                    match full.strip_prefix(root.as_str()) {
                        Some(rest) => rest.trim_start_matches('/'),
                        None => continue,
                    }
                };
                if !relative.is_empty() {
                    keys.push(relative.to_string());
                }
            }
            keys.sort();
            Ok(keys)
        })
    }
}
