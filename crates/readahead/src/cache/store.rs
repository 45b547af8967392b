use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::{
    fs::File,
    io::{AsyncWrite, AsyncWriteExt},
};

use crate::{ReadaheadError, ReadaheadResult};

const INDEX_FILE: &str = "cache_index.json";
const PARTIAL_EXTENSION: &str = "partial";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    file: String,
    length: u64,
    last_touch_ms: u64,
}

/// One cache region: a directory holding a file per cache key and a JSON index.
///
/// The index lives in memory and is written on [`SegmentCache::release`]. A region
/// reopened after a crash keeps nothing, since unindexed files are not trusted.
///
/// File names are the hex SHA-256 of the cache key, so arbitrary keys (URLs with
/// queries and byte-range suffixes) map to valid, fixed-length names.
#[derive(Debug)]
pub struct SegmentCache {
    dir: PathBuf,
    entries: Mutex<HashMap<String, CacheEntry>>,
    released: AtomicBool,
    next_writer: AtomicU64,
}

impl SegmentCache {
    /// Opens the region in `dir`, creating it if needed and reusing whatever a previous
    /// handle committed there.
    pub fn open(dir: impl Into<PathBuf>) -> ReadaheadResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut entries: HashMap<String, CacheEntry> = match std::fs::read(dir.join(INDEX_FILE)) {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
                log::warn!("Ignoring corrupt cache index in {}: {e}", dir.display());
                HashMap::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        entries.retain(|_, entry| dir.join(&entry.file).is_file());

        // leftovers of writers that never committed and files the index lost track of
        for item in std::fs::read_dir(&dir)? {
            let path = item?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let indexed = name == INDEX_FILE || entries.values().any(|entry| entry.file == name);
            if !indexed {
                crate::util::fs::try_delete(&path);
            }
        }

        Ok(Self {
            dir,
            entries: Mutex::new(entries),
            released: AtomicBool::new(false),
            next_writer: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn resource_len(&self, key: &str) -> Option<u64> {
        self.entries.lock().get(key).map(|entry| entry.length)
    }

    /// Total bytes of committed resources.
    pub fn cache_space(&self) -> u64 {
        self.entries.lock().values().map(|entry| entry.length).sum()
    }

    /// Unix time in milliseconds of the last commit or touch of `key`.
    pub fn last_touch_ms(&self, key: &str) -> Option<u64> {
        self.entries.lock().get(key).map(|entry| entry.last_touch_ms)
    }

    pub fn touch(&self, key: &str) -> bool {
        match self.entries.lock().get_mut(key) {
            Some(entry) => {
                entry.last_touch_ms = now_ms();
                true
            }
            None => false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn file_name(key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    /// Opens a writer for `key`. Returns `None` if the resource is already cached.
    pub async fn open_writer(self: &Arc<Self>, key: &str) -> ReadaheadResult<Option<CacheWriter>> {
        if self.is_released() {
            return Err(ReadaheadError::CacheReleased(self.dir.clone()));
        }
        if self.contains(key) {
            return Ok(None);
        }

        let file_name = Self::file_name(key);
        let writer_id = self.next_writer.fetch_add(1, Ordering::Relaxed);
        let partial = self
            .dir
            .join(format!("{file_name}.{writer_id}.{PARTIAL_EXTENSION}"));
        let file = File::create(&partial).await?;

        Ok(Some(CacheWriter {
            cache: self.clone(),
            key: key.to_string(),
            file_name,
            file,
            partial,
            written: 0,
            committed: false,
        }))
    }

    /// Reads a whole committed resource.
    pub async fn read(&self, key: &str) -> ReadaheadResult<Option<Bytes>> {
        let Some(file) = self.entries.lock().get(key).map(|entry| entry.file.clone()) else {
            return Ok(None);
        };
        match tokio::fs::read(self.dir.join(file)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes a resource and its file. Returns whether the key was cached.
    pub fn remove_resource(&self, key: &str) -> ReadaheadResult<bool> {
        let Some(entry) = self.entries.lock().remove(key) else {
            return Ok(false);
        };

        match std::fs::remove_file(self.dir.join(&entry.file)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(true),
        }
    }

    /// Writes the index one last time and refuses new writers.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.persist();
        }
    }

    fn insert(&self, key: String, file: String, length: u64) {
        self.entries.lock().insert(
            key,
            CacheEntry {
                file,
                length,
                last_touch_ms: now_ms(),
            },
        );
    }

    fn persist(&self) {
        let snapshot = self.entries.lock().clone();
        let data = match serde_json::to_vec(&snapshot) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("Failed to serialize cache index: {e}");
                return;
            }
        };

        let tmp = self.dir.join(format!("{INDEX_FILE}.tmp"));
        let result =
            std::fs::write(&tmp, data).and_then(|_| std::fs::rename(&tmp, self.dir.join(INDEX_FILE)));
        if let Err(e) = result {
            // the region may already have been deleted by a media switch
            log::warn!("Failed to persist cache index in {}: {e}", self.dir.display());
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Writes one resource into a [`SegmentCache`].
///
/// Data lands in a partial file that only becomes visible on [`CacheWriter::commit`].
/// Dropping an uncommitted writer deletes the partial file.
pub struct CacheWriter {
    cache: Arc<SegmentCache>,
    key: String,
    file_name: String,
    file: File,
    partial: PathBuf,
    written: u64,
    committed: bool,
}

impl CacheWriter {
    /// Publishes the resource. Returns its length in bytes.
    pub async fn commit(mut self) -> ReadaheadResult<u64> {
        self.file.flush().await?;
        if self.cache.is_released() {
            return Err(ReadaheadError::CacheReleased(self.cache.dir.clone()));
        }

        tokio::fs::rename(&self.partial, self.cache.dir.join(&self.file_name)).await?;
        self.committed = true;
        self.cache
            .insert(self.key.clone(), self.file_name.clone(), self.written);
        Ok(self.written)
    }
}

impl AsyncWrite for CacheWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.file).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            self.written += n as u64;
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_shutdown(cx)
    }
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.partial);
        }
    }
}
