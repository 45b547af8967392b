use std::{cmp::Ordering, time::Instant};

use crate::{metadata::CacheKeyMetadata, player::TrackType};

const PRIORITY_UNKNOWN: u8 = 6;

/// The span of media time worth keeping: `[position, position + forward window]`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetentionWindow {
    start_ms: u64,
    end_ms: u64,
}

impl RetentionWindow {
    pub fn new(position_ms: u64, forward_window_ms: u64) -> Self {
        Self {
            start_ms: position_ms,
            end_ms: position_ms.saturating_add(forward_window_ms),
        }
    }
}

#[derive(Debug)]
pub(crate) struct EvictionCandidate {
    pub key: String,
    pub length: u64,
    priority: u8,
    order_key: i128,
    last_touch_ms: u64,
    last_access: Option<Instant>,
}

impl EvictionCandidate {
    pub fn new(
        key: String,
        length: u64,
        last_touch_ms: u64,
        metadata: Option<&CacheKeyMetadata>,
        window: RetentionWindow,
    ) -> Self {
        let (priority, order_key) = match metadata.and_then(|m| Some((m, m.time_range_ms()?))) {
            Some((metadata, (start, end))) => {
                let base = match metadata.track_type {
                    TrackType::Video => 0,
                    TrackType::Audio => 3,
                    TrackType::Other => 6,
                };
                let order = i128::from(start);
                if end < window.start_ms {
                    // behind playback: oldest first
                    (base, order)
                } else if start > window.end_ms {
                    // past the window: farthest first
                    (base + 1, -order)
                } else {
                    (base + 2, -order)
                }
            }
            None => (PRIORITY_UNKNOWN, 0),
        };

        Self {
            key,
            length,
            priority,
            order_key,
            last_touch_ms,
            last_access: metadata.map(|m| m.last_access),
        }
    }

    fn cmp_eviction_order(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.order_key.cmp(&other.order_key))
            .then(self.last_touch_ms.cmp(&other.last_touch_ms))
            .then(self.last_access.cmp(&other.last_access))
    }
}

/// Sorts `candidates` so that the first one is the first to evict.
pub(crate) fn rank(candidates: &mut [EvictionCandidate]) {
    candidates.sort_by(EvictionCandidate::cmp_eviction_order);
}
