//! Executing a [`PrefetchPlan`](crate::planner::PrefetchPlan).
//!
//! A [`Downloader`] is created per attempt by a [`DownloaderFactory`], bound to the
//! active cache region and to a fresh [`WorkerPool`]. It runs until every resource is
//! cached or failed, and stops early when cancelled or when its pool is shut down.

mod http;
mod pool;

pub use http::{HttpDownloaderFactory, HttpSegmentDownloader};
pub use pool::WorkerPool;

use std::{future::Future, sync::Arc};

use crate::{
    cache::SegmentCache,
    manifest::StreamKey,
    planner::{PlannedResource, PrefetchPlan},
    ReadaheadResult,
};

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Manifest URI of the stream.
    pub uri: String,
    pub stream_keys: Vec<StreamKey>,
    pub start_us: u64,
    pub duration_us: u64,
    pub resources: Vec<PlannedResource>,
}

impl DownloadRequest {
    pub fn from_plan(uri: impl Into<String>, plan: &PrefetchPlan) -> Self {
        Self {
            uri: uri.into(),
            stream_keys: plan.stream_keys.clone(),
            start_us: plan.spec.start_us,
            duration_us: plan.spec.duration_us(),
            resources: plan.resources.clone(),
        }
    }
}

pub trait Downloader: Send + Sync + 'static {
    /// Downloads every requested resource not cached yet.
    ///
    /// Fails with [`crate::ReadaheadError::Cancelled`] or
    /// [`crate::ReadaheadError::PoolShutdown`] when stopped early.
    fn download(&self) -> impl Future<Output = ReadaheadResult<()>> + Send;

    /// Asks a running [`Downloader::download`] to stop. Idempotent.
    fn cancel(&self);
}

pub trait DownloaderFactory: Send + Sync + 'static {
    type Downloader: Downloader;

    fn create(
        &self,
        request: DownloadRequest,
        cache: Arc<SegmentCache>,
        pool: Arc<WorkerPool>,
    ) -> Self::Downloader;
}

impl<F> DownloaderFactory for Arc<F>
where
    F: DownloaderFactory,
{
    type Downloader = F::Downloader;

    fn create(
        &self,
        request: DownloadRequest,
        cache: Arc<SegmentCache>,
        pool: Arc<WorkerPool>,
    ) -> Self::Downloader {
        self.as_ref().create(request, cache, pool)
    }
}
