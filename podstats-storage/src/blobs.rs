// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Blob storage
//!
//! Keyed byte objects with streamed reads and exact-length streamed writes.
//! A write either commits the whole declared body or leaves the key as it
//! was; a body shorter or longer than declared fails the write.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use podstats_core::{PodstatsError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

/// Streamed blob body.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Blob store contract.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Open a blob for reading; `None` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<BlobReader>>;

    /// Write a blob whose body is exactly `content_length` bytes.
    async fn put(&self, key: &str, body: BlobReader, content_length: u64) -> Result<()>;

    /// Keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Body reader over in-memory chunks.
pub fn reader_from_chunks(chunks: Vec<Bytes>) -> BlobReader {
    let stream = futures::stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
    Box::new(StreamReader::new(stream))
}

/// Read a whole blob into memory.
pub async fn read_blob(store: &dyn BlobStore, key: &str) -> Result<Option<Vec<u8>>> {
    let Some(mut reader) = store.get(key).await? else {
        return Ok(None);
    };
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(Some(buf))
}

fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if valid {
        Ok(())
    } else {
        Err(PodstatsError::Validation(format!("bad blob key: {:?}", key)))
    }
}

fn length_mismatch(key: &str, actual: u64, declared: u64) -> PodstatsError {
    if actual > declared {
        PodstatsError::Storage(format!(
            "blob {}: body is longer than the declared {} bytes",
            key, declared
        ))
    } else {
        PodstatsError::Storage(format!(
            "blob {}: body is {} bytes, declared {}",
            key, actual, declared
        ))
    }
}

/// In-memory blob store for tests and development.
#[derive(Default)]
pub struct MemoryBlobs {
    blobs: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryBlobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobs {
    async fn get(&self, key: &str) -> Result<Option<BlobReader>> {
        validate_key(key)?;
        Ok(self
            .blobs
            .read()
            .get(key)
            .cloned()
            .map(|bytes| Box::new(std::io::Cursor::new(bytes)) as BlobReader))
    }

    async fn put(&self, key: &str, body: BlobReader, content_length: u64) -> Result<()> {
        validate_key(key)?;
        let mut buf = Vec::new();
        body.take(content_length + 1).read_to_end(&mut buf).await?;
        if buf.len() as u64 != content_length {
            return Err(length_mismatch(key, buf.len() as u64, content_length));
        }
        self.blobs.write().insert(key.to_string(), Bytes::from(buf));
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .blobs
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

/// Blob store rooted at a local directory.
///
/// Writes land in a hidden temp file next to the target and are renamed into
/// place once the full body has been written.
pub struct FsBlobs {
    root: PathBuf,
}

impl FsBlobs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, segment| path.join(segment)))
    }
}

#[async_trait]
impl BlobStore for FsBlobs {
    async fn get(&self, key: &str) -> Result<Option<BlobReader>> {
        let path = self.path_of(key)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, body: BlobReader, content_length: u64) -> Result<()> {
        let path = self.path_of(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| PodstatsError::Validation(format!("bad blob key: {:?}", key)))?;
        tokio::fs::create_dir_all(parent).await?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

        let written = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            let mut body = body.take(content_length + 1);
            let copied = tokio::io::copy(&mut body, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<u64, std::io::Error>(copied)
        }
        .await;

        let outcome = match written {
            Ok(copied) if copied == content_length => {
                tokio::fs::rename(&tmp, &path).await.map_err(PodstatsError::from)
            }
            Ok(copied) => Err(length_mismatch(key, copied, content_length)),
            Err(e) => Err(PodstatsError::Storage(format!("blob {}: {}", key, e))),
        };
        if outcome.is_err() {
            if let Err(e) = tokio::fs::remove_file(&tmp).await {
                tracing::debug!(path = %tmp.display(), error = %e, "temp blob already gone");
            }
        }
        outcome
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];
        while let Some((dir, key_prefix)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    continue;
                }
                let key = format!("{}{}", key_prefix, name);
                if entry.file_type().await?.is_dir() {
                    pending.push((entry.path(), format!("{}/", key)));
                } else if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
