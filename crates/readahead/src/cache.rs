//! On-disk storage of prefetched resources.
//!
//! A [`SegmentCache`] is one cache region: a directory of resources addressed by
//! cache key. [`PerVideoStreamCache`] owns at most one region at a time, the one of
//! the media item currently playing, and evicts from it by quality and by byte budget.

mod evict;
mod store;
mod stream;

pub use store::{CacheWriter, SegmentCache};
pub use stream::{PerVideoStreamCache, StorageRootProvider};
