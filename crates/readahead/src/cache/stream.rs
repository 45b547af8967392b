use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use super::{
    evict::{self, EvictionCandidate, RetentionWindow},
    SegmentCache,
};
use crate::{
    metadata::{CacheKeyMetadata, CacheKeyMetadataStore},
    player::TrackType,
    util::fs::try_delete,
};

const ROOT_DIR_NAME: &str = "stream_cache";

/// Filesystem root under which cache regions are created.
pub trait StorageRootProvider: Send + Sync + 'static {
    fn root_dir(&self) -> PathBuf;
}

impl StorageRootProvider for PathBuf {
    fn root_dir(&self) -> PathBuf {
        self.clone()
    }
}

#[derive(Default)]
struct ActiveRegion {
    media_id: Option<String>,
    dir: Option<PathBuf>,
    cache: Option<Arc<SegmentCache>>,
}

/// Owns the cache region of the media item currently playing.
///
/// Only one region exists on disk at a time: activating a media id deletes the
/// regions of every other id. The region directory is named after the SHA-256 of
/// the media id, so activating the same id again finds the same directory.
pub struct PerVideoStreamCache {
    root: Box<dyn StorageRootProvider>,
    active: Mutex<ActiveRegion>,
    metadata: CacheKeyMetadataStore,
    current_video_quality_key: Mutex<Option<String>>,
    cache_limit_bytes: AtomicU64,
}

impl PerVideoStreamCache {
    pub fn new(root: impl StorageRootProvider, cache_limit_bytes: u64) -> Self {
        Self {
            root: Box::new(root),
            active: Mutex::new(ActiveRegion::default()),
            metadata: CacheKeyMetadataStore::new(),
            current_video_quality_key: Mutex::new(None),
            cache_limit_bytes: AtomicU64::new(cache_limit_bytes),
        }
    }

    /// Directory holding every region.
    pub fn regions_root(&self) -> PathBuf {
        self.root.root_dir().join(ROOT_DIR_NAME)
    }

    pub fn set_active_media_id(&self, media_id: Option<&str>) {
        let (old_cache, old_dir) = {
            let mut active = self.active.lock();
            if active.media_id.as_deref() == media_id {
                return;
            }
            active.media_id = media_id.map(String::from);
            self.metadata.clear();
            *self.current_video_quality_key.lock() = None;
            (active.cache.take(), active.dir.take())
        };

        if let Some(cache) = old_cache {
            cache.release();
        }
        if let Some(dir) = old_dir {
            try_delete(&dir);
        }

        let Some(media_id) = media_id.filter(|id| !id.trim().is_empty()) else {
            return;
        };

        let root = self.regions_root();
        let dir = root.join(stable_dir_name(media_id));
        if let Ok(items) = std::fs::read_dir(&root) {
            for item in items.flatten() {
                let path = item.path();
                if path != dir {
                    try_delete(&path);
                }
            }
        }

        let cache = match SegmentCache::open(&dir) {
            Ok(cache) => Arc::new(cache),
            Err(e) => {
                log::warn!("Failed to open stream cache in {}: {e}", dir.display());
                return;
            }
        };

        let mut active = self.active.lock();
        if active.media_id.as_deref() != Some(media_id) {
            // switched again while the region was being opened
            cache.release();
            return;
        }
        log::info!(
            "Stream cache for {media_id} at {} ({} cached resources)",
            dir.display(),
            cache.len()
        );
        active.dir = Some(dir);
        active.cache = Some(cache);
    }

    pub fn clear_active_media(&self) {
        self.set_active_media_id(None);
    }

    pub fn cache(&self) -> Option<Arc<SegmentCache>> {
        self.active.lock().cache.clone()
    }

    pub fn active_media_id(&self) -> Option<String> {
        self.active.lock().media_id.clone()
    }

    pub fn active_dir(&self) -> Option<PathBuf> {
        self.active.lock().dir.clone()
    }

    pub fn metadata(&self) -> &CacheKeyMetadataStore {
        &self.metadata
    }

    pub fn record_key_metadata(
        &self,
        cache_key: impl Into<String>,
        track_type: TrackType,
        quality_key: Option<String>,
        media_start_time_ms: Option<u64>,
        media_end_time_ms: Option<u64>,
    ) {
        self.metadata.record(
            cache_key,
            CacheKeyMetadata::new(
                track_type,
                quality_key,
                media_start_time_ms,
                media_end_time_ms,
            ),
        );
    }

    pub fn touch_key(&self, cache_key: &str) {
        self.metadata.touch(cache_key);
        if let Some(cache) = self.cache() {
            cache.touch(cache_key);
        }
    }

    /// Records the quality being rendered, as opposed to one being prefetched.
    pub fn set_current_video_quality_key(&self, quality_key: Option<String>) {
        *self.current_video_quality_key.lock() = quality_key;
    }

    pub fn current_video_quality_key(&self) -> Option<String> {
        self.current_video_quality_key.lock().clone()
    }

    pub fn cache_limit_bytes(&self) -> u64 {
        self.cache_limit_bytes.load(Ordering::Relaxed)
    }

    pub fn set_cache_limit_bytes(&self, cache_limit_bytes: u64) {
        self.cache_limit_bytes
            .store(cache_limit_bytes, Ordering::Relaxed);
    }

    /// Removes every video resource of a quality other than the one being rendered.
    ///
    /// Returns the number of resources dropped.
    pub fn delete_other_video_qualities(&self) -> usize {
        let Some(cache) = self.cache() else {
            return 0;
        };
        let Some(keep) = self.current_video_quality_key() else {
            return 0;
        };

        let stale = self.metadata.keys_where(|metadata| {
            metadata.track_type == TrackType::Video
                && metadata
                    .quality_key
                    .as_ref()
                    .is_some_and(|quality_key| *quality_key != keep)
        });
        for key in stale.iter() {
            if let Err(e) = cache.remove_resource(key) {
                log::debug!("Failed to remove {key}: {e}");
            }
            self.metadata.remove(key);
        }

        if !stale.is_empty() {
            log::debug!("Dropped {} resources of other video qualities", stale.len());
        }
        stale.len()
    }

    /// Evicts resources until the region fits into the byte budget.
    ///
    /// Superseded video qualities go first, then resources ranked by how far they
    /// are from the window `[position, position + forward window]`. Returns the
    /// number of resources evicted by ranking.
    pub fn enforce_cache_limit(&self, current_position_ms: u64, forward_window_ms: u64) -> usize {
        let Some(cache) = self.cache() else {
            return 0;
        };
        let limit = self.cache_limit_bytes();
        if limit == 0 {
            return 0;
        }

        self.delete_other_video_qualities();

        let mut total = cache.cache_space();
        if total <= limit {
            return 0;
        }

        let window = RetentionWindow::new(current_position_ms, forward_window_ms);
        let mut candidates: Vec<_> = cache
            .keys()
            .into_iter()
            .filter_map(|key| {
                let length = cache.resource_len(&key).filter(|&length| length > 0)?;
                let last_touch_ms = cache.last_touch_ms(&key).unwrap_or_default();
                let metadata = self.metadata.get(&key);
                Some(EvictionCandidate::new(
                    key,
                    length,
                    last_touch_ms,
                    metadata.as_ref(),
                    window,
                ))
            })
            .collect();
        evict::rank(&mut candidates);

        let mut evicted = 0;
        for candidate in candidates {
            if total <= limit {
                break;
            }
            if let Err(e) = cache.remove_resource(&candidate.key) {
                log::debug!("Failed to evict {}: {e}", candidate.key);
            }
            total = total.saturating_sub(candidate.length);
            if !cache.contains(&candidate.key) {
                self.metadata.remove(&candidate.key);
            }
            evicted += 1;
        }

        log::debug!("Evicted {evicted} resources, {total} of {limit} bytes in use");
        evicted
    }
}

impl Drop for PerVideoStreamCache {
    fn drop(&mut self) {
        self.clear_active_media();
    }
}

fn stable_dir_name(media_id: &str) -> String {
    hex::encode(Sha256::digest(media_id.as_bytes()))
}
