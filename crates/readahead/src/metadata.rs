use std::time::Instant;

use dashmap::DashMap;

use crate::player::TrackType;

/// What a cached resource holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyMetadata {
    pub track_type: TrackType,
    pub quality_key: Option<String>,
    /// `None` for initialization segments.
    pub media_start_time_ms: Option<u64>,
    pub media_end_time_ms: Option<u64>,
    pub last_access: Instant,
}

impl CacheKeyMetadata {
    pub fn new(
        track_type: TrackType,
        quality_key: Option<String>,
        media_start_time_ms: Option<u64>,
        media_end_time_ms: Option<u64>,
    ) -> Self {
        Self {
            track_type,
            quality_key,
            media_start_time_ms,
            media_end_time_ms,
            last_access: Instant::now(),
        }
    }

    /// Both bounds of the media time range, if known.
    pub fn time_range_ms(&self) -> Option<(u64, u64)> {
        Some((self.media_start_time_ms?, self.media_end_time_ms?))
    }
}

/// Concurrent map from cache key to [`CacheKeyMetadata`].
///
/// Writers of independent keys never block each other. Re-recording a key
/// overwrites it (last write wins).
#[derive(Debug, Default)]
pub struct CacheKeyMetadataStore {
    entries: DashMap<String, CacheKeyMetadata>,
}

impl CacheKeyMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, cache_key: impl Into<String>, metadata: CacheKeyMetadata) {
        self.entries.insert(cache_key.into(), metadata);
    }

    /// Refreshes `last_access` of a known key. Returns whether the key was known.
    pub fn touch(&self, cache_key: &str) -> bool {
        match self.entries.get_mut(cache_key) {
            Some(mut entry) => {
                entry.last_access = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, cache_key: &str) -> Option<CacheKeyMetadata> {
        self.entries.get(cache_key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, cache_key: &str) -> bool {
        self.entries.contains_key(cache_key)
    }

    pub fn remove(&self, cache_key: &str) -> Option<CacheKeyMetadata> {
        self.entries.remove(cache_key).map(|(_, metadata)| metadata)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys whose metadata matches `predicate`, collected before returning so the
    /// caller may mutate the store afterwards.
    pub fn keys_where<F>(&self, mut predicate: F) -> Vec<String>
    where
        F: FnMut(&CacheKeyMetadata) -> bool,
    {
        self.entries
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.key().clone())
            .collect()
    }
}
