use serde::{Deserialize, Serialize};
use std::{num::NonZeroU32, time::Duration};

/// Tunables shared by the prefetcher, the per-video cache and the HTTP downloader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Length of the look-ahead window in milliseconds. `0` disables prefetching.
    pub max_buffer_ms: u64,
    /// Upper bound of workers used by a single prefetch attempt.
    pub max_threads: u32,
    pub poll_interval_ms: u64,
    pub seek_debounce_ms: u64,
    /// Byte budget of the active cache region. `0` disables limit enforcement.
    pub cache_limit_bytes: u64,
    pub retries: u32,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            max_buffer_ms: 50_000,
            max_threads: 4,
            poll_interval_ms: 1_250,
            seek_debounce_ms: 300,
            cache_limit_bytes: 512 * 1024 * 1024,
            retries: 3,
        }
    }
}

impl PrefetchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_buffer_ms(mut self, max_buffer_ms: u64) -> Self {
        self.max_buffer_ms = max_buffer_ms;
        self
    }

    pub fn with_max_threads(mut self, max_threads: u32) -> Self {
        self.max_threads = max_threads;
        self
    }

    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn with_seek_debounce_ms(mut self, seek_debounce_ms: u64) -> Self {
        self.seek_debounce_ms = seek_debounce_ms;
        self
    }

    pub fn with_cache_limit_bytes(mut self, cache_limit_bytes: u64) -> Self {
        self.cache_limit_bytes = cache_limit_bytes;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn window_us(&self) -> u64 {
        self.max_buffer_ms.saturating_mul(1000)
    }

    pub fn max_threads(&self) -> NonZeroU32 {
        NonZeroU32::new(self.max_threads).unwrap_or(NonZeroU32::MIN)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn seek_debounce(&self) -> Duration {
        Duration::from_millis(self.seek_debounce_ms)
    }
}
