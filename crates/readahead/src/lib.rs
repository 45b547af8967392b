pub mod cache;
pub mod config;
pub mod coverage;
pub mod dash;
pub mod download;
pub mod error;
pub mod listener;
pub mod manifest;
pub mod metadata;
pub mod planner;
pub mod player;
pub mod prefetcher;
pub mod util;

pub use cache::{PerVideoStreamCache, SegmentCache, StorageRootProvider};
pub use config::PrefetchConfig;
pub use coverage::PrefetchSpec;
pub use error::*;
pub use listener::StreamCacheAnalyticsListener;
pub use prefetcher::DashPrefetcher;

/// ┌──────────────┐  position / tracks / seek   ┌────────────────┐   window    ┌──────────────────────┐
/// │    Player    ├─────────────────────────────►  DashPrefetcher ├─────────────► SegmentRangePlanner  │
/// └──────┬───────┘                             │                ◄─────────────┤  (manifest, index)   │
///        │ load events                         │  [one attempt] │    plan     └──────────────────────┘
///        │                                     └───────┬────────┘
/// ┌──────▼───────────────────────┐   metadata          │ Downloader + WorkerPool
/// │ StreamCacheAnalyticsListener ├──────────┐          │
/// └──────────────────────────────┘          │  ┌───────▼──────────────┐
///                                           └──► PerVideoStreamCache  │
///                                              │  SegmentCache (disk) │
///                                              │  CacheKeyMetadata    │
///                                              └──────────────────────┘
pub type Prefetcher<P> =
    DashPrefetcher<P, dash::MpdManifestLoader, download::HttpDownloaderFactory>;
