use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};

use tokio::{runtime::Handle, task::JoinHandle};

use crate::{
    cache::PerVideoStreamCache,
    player::{Format, Player, TrackType},
};

/// The resource a load event is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadEventInfo {
    pub uri: String,
    /// Custom cache key of the request, if the data source set one.
    pub key: Option<String>,
}

impl LoadEventInfo {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn cache_key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.uri)
    }
}

/// What a load event carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaLoadData {
    pub track_type: TrackType,
    pub track_format: Option<Format>,
    pub media_start_time_ms: Option<u64>,
    pub media_end_time_ms: Option<u64>,
}

/// Keeps the per-video cache in step with ordinary playback.
///
/// Loads issued by the engine itself are recorded like prefetched ones, and a
/// change of the rendered video quality evicts the other qualities.
pub struct StreamCacheAnalyticsListener<P> {
    stream_cache: Arc<PerVideoStreamCache>,
    player: Weak<P>,
    forward_window_ms: AtomicU64,
    handle: Handle,
}

impl<P> StreamCacheAnalyticsListener<P>
where
    P: Player,
{
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn new(stream_cache: Arc<PerVideoStreamCache>, player: &Arc<P>, forward_window_ms: u64) -> Self {
        Self::with_handle(stream_cache, player, forward_window_ms, Handle::current())
    }

    pub fn with_handle(
        stream_cache: Arc<PerVideoStreamCache>,
        player: &Arc<P>,
        forward_window_ms: u64,
        handle: Handle,
    ) -> Self {
        Self {
            stream_cache,
            player: Arc::downgrade(player),
            forward_window_ms: AtomicU64::new(forward_window_ms),
            handle,
        }
    }

    pub fn set_forward_window_ms(&self, forward_window_ms: u64) {
        self.forward_window_ms
            .store(forward_window_ms, Ordering::Relaxed);
    }

    /// Records the resource being loaded. Retries are ignored.
    pub fn on_load_started(&self, info: &LoadEventInfo, data: &MediaLoadData, retry_count: u32) {
        if retry_count > 0 {
            return;
        }

        let quality_key = data
            .track_format
            .as_ref()
            .and_then(|format| format.quality_key(data.track_type));
        self.stream_cache.record_key_metadata(
            info.cache_key(),
            data.track_type,
            quality_key,
            data.media_start_time_ms,
            data.media_end_time_ms,
        );
    }

    /// Marks the resource as recently used and enforces the cache limit.
    pub fn on_load_completed(&self, info: &LoadEventInfo, _data: &MediaLoadData) -> Option<JoinHandle<()>> {
        self.stream_cache.touch_key(info.cache_key());

        let (position_ms, forward_window_ms) = self.limit_args()?;
        let stream_cache = self.stream_cache.clone();
        Some(self.handle.spawn_blocking(move || {
            stream_cache.enforce_cache_limit(position_ms, forward_window_ms);
        }))
    }

    /// Tracks the rendered video quality and drops every other one.
    pub fn on_downstream_format_changed(&self, data: &MediaLoadData) -> Option<JoinHandle<()>> {
        if data.track_type != TrackType::Video {
            return None;
        }
        let format = data.track_format.as_ref()?;
        self.stream_cache
            .set_current_video_quality_key(format.quality_key(TrackType::Video));

        let (position_ms, forward_window_ms) = self.limit_args()?;
        let stream_cache = self.stream_cache.clone();
        Some(self.handle.spawn_blocking(move || {
            stream_cache.delete_other_video_qualities();
            stream_cache.enforce_cache_limit(position_ms, forward_window_ms);
        }))
    }

    fn limit_args(&self) -> Option<(u64, u64)> {
        let player = self.player.upgrade()?;
        Some((
            player.current_position_ms(),
            self.forward_window_ms.load(Ordering::Relaxed),
        ))
    }
}
