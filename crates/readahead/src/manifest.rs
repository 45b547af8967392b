//! Segment-index model of a chunked stream.
//!
//! The prefetcher never parses manifests itself. It works on this model, which a
//! [`ManifestLoader`] produces (see [`crate::dash::MpdManifestLoader`] for the MPD one).

mod index;

pub use index::{ListIndex, ListSegment, TemplateIndex};

use std::{fmt, future::Future, sync::Arc};
use url::Url;

use crate::{
    player::{Format, TrackType},
    util::range::ByteRange,
    ReadaheadResult,
};

/// Pinpoints exactly one representation: (period, adaptation set, representation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    pub period_index: usize,
    pub group_index: usize,
    pub stream_index: usize,
}

impl StreamKey {
    pub fn new(period_index: usize, group_index: usize, stream_index: usize) -> Self {
        Self {
            period_index,
            group_index,
            stream_index,
        }
    }
}

/// A resolved resource location, optionally restricted to a byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangedUri {
    pub url: Url,
    pub range: Option<ByteRange>,
}

impl RangedUri {
    pub fn new(url: Url, range: Option<ByteRange>) -> Self {
        Self { url, range }
    }
}

/// Maps media time to segment numbers for one representation.
///
/// Times are in microseconds relative to the start of the period.
pub trait SegmentIndex: fmt::Debug + Send + Sync {
    /// Number of segments, if it can be determined.
    fn segment_count(&self, period_duration_us: Option<u64>) -> Option<u64>;

    /// The segment containing `time_us`, clamped to the valid segment range.
    fn segment_num(&self, time_us: u64, period_duration_us: Option<u64>) -> u64;

    fn time_us(&self, segment_num: u64) -> u64;

    fn duration_us(&self, segment_num: u64, period_duration_us: Option<u64>) -> u64;

    fn segment_url(&self, segment_num: u64) -> ReadaheadResult<RangedUri>;
}

#[derive(Debug, Clone)]
pub struct Representation {
    pub format: Format,
    /// Representation-level cache key prefix declared by the manifest, if any.
    pub cache_key: Option<String>,
    pub initialization: Option<RangedUri>,
    pub index: Arc<dyn SegmentIndex>,
}

impl Representation {
    pub fn index(&self) -> &dyn SegmentIndex {
        self.index.as_ref()
    }

    /// Storage-layer key of one resource of this representation.
    ///
    /// Stable per representation and distinct for every segment, including
    /// segments addressed as byte ranges of a single file.
    pub fn resolve_cache_key(&self, uri: &RangedUri) -> String {
        let mut key = String::new();
        if let Some(prefix) = &self.cache_key {
            key.push_str(prefix);
            key.push(':');
        }
        key.push_str(uri.url.as_str());
        if let Some(range) = uri.range {
            key.push_str("#bytes=");
            key.push_str(&range.offset.to_string());
            key.push('-');
            if let Some(last) = range.last_byte() {
                key.push_str(&last.to_string());
            }
        }
        key
    }
}

#[derive(Debug, Clone)]
pub struct AdaptationSet {
    pub track_type: TrackType,
    pub representations: Vec<Representation>,
}

#[derive(Debug, Clone, Default)]
pub struct Period {
    pub id: Option<String>,
    pub start_us: u64,
    pub duration_us: Option<u64>,
    pub adaptation_sets: Vec<AdaptationSet>,
}

#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub periods: Vec<Period>,
}

impl Manifest {
    pub fn period_count(&self) -> usize {
        self.periods.len()
    }

    pub fn period(&self, index: usize) -> Option<&Period> {
        self.periods.get(index)
    }

    pub fn period_duration_us(&self, index: usize) -> Option<u64> {
        self.periods.get(index).and_then(|p| p.duration_us)
    }
}

/// Loads the manifest of a chunked stream.
pub trait ManifestLoader: Send + Sync + 'static {
    fn load_manifest(&self, uri: &str) -> impl Future<Output = ReadaheadResult<Manifest>> + Send;
}

impl<L> ManifestLoader for Arc<L>
where
    L: ManifestLoader,
{
    fn load_manifest(&self, uri: &str) -> impl Future<Output = ReadaheadResult<Manifest>> + Send {
        self.as_ref().load_manifest(uri)
    }
}
