use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use parking_lot::RwLock;
use reqwest::header::RANGE;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::{DownloadRequest, Downloader, DownloaderFactory, WorkerPool};
use crate::{
    cache::SegmentCache, config::PrefetchConfig, planner::PlannedResource, util::http::HttpClient,
    ReadaheadError, ReadaheadResult,
};

#[derive(Clone)]
pub struct HttpDownloaderFactory {
    client: HttpClient,
    retries: u32,
}

impl HttpDownloaderFactory {
    pub fn new(client: HttpClient) -> Self {
        Self { client, retries: 3 }
    }

    pub fn from_config(client: HttpClient, config: &PrefetchConfig) -> Self {
        Self::new(client).with_retries(config.retries)
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

impl DownloaderFactory for HttpDownloaderFactory {
    type Downloader = HttpSegmentDownloader;

    fn create(
        &self,
        request: DownloadRequest,
        cache: Arc<SegmentCache>,
        pool: Arc<WorkerPool>,
    ) -> Self::Downloader {
        HttpSegmentDownloader {
            client: self.client.clone(),
            request,
            cache,
            pool,
            retries: self.retries,
            token: CancellationToken::new(),
            downloaded: Arc::new(AtomicUsize::new(0)),
            failed: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

/// Fetches the planned resources of one attempt into the cache region.
pub struct HttpSegmentDownloader {
    client: HttpClient,
    request: DownloadRequest,
    cache: Arc<SegmentCache>,
    pool: Arc<WorkerPool>,
    retries: u32,
    token: CancellationToken,

    downloaded: Arc<AtomicUsize>,
    failed: Arc<RwLock<Vec<String>>>,
}

impl HttpSegmentDownloader {
    /// Resources fetched and committed so far.
    pub fn downloaded(&self) -> usize {
        self.downloaded.load(Ordering::Relaxed)
    }

    /// Cache keys given up on after exhausting retries.
    pub fn failed(&self) -> Vec<String> {
        self.failed.read().clone()
    }
}

impl Downloader for HttpSegmentDownloader {
    async fn download(&self) -> ReadaheadResult<()> {
        let pending: Vec<PlannedResource> = self
            .request
            .resources
            .iter()
            .filter(|resource| !self.cache.contains(&resource.cache_key))
            .cloned()
            .collect();
        let total = pending.len();
        log::info!(
            "Prefetching {total} of {} resources with {} worker(s).",
            self.request.resources.len(),
            self.pool.size()
        );

        for resource in pending {
            let task = fetch_with_retries(
                self.client.clone(),
                self.cache.clone(),
                resource,
                self.retries,
                self.token.clone(),
                self.downloaded.clone(),
                self.failed.clone(),
            );
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return Err(ReadaheadError::Cancelled),
                result = self.pool.spawn(task) => result?,
            }
        }

        tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(ReadaheadError::Cancelled),
            result = self.pool.join() => result?,
        }

        let failed = self.failed.read();
        if !failed.is_empty() {
            log::error!("Failed to prefetch {} of {total} resources:", failed.len());
            for key in failed.iter() {
                log::error!("  - {key}");
            }
        }
        Ok(())
    }

    fn cancel(&self) {
        self.token.cancel();
    }
}

async fn fetch_with_retries(
    client: HttpClient,
    cache: Arc<SegmentCache>,
    resource: PlannedResource,
    mut retries: u32,
    token: CancellationToken,
    downloaded: Arc<AtomicUsize>,
    failed: Arc<RwLock<Vec<String>>>,
) {
    let key = &resource.cache_key;
    loop {
        let result = tokio::select! {
            _ = token.cancelled() => return,
            result = fetch_resource(&client, &cache, &resource) => result,
        };
        match result {
            Ok(_) => break,
            // the region is gone, nothing to retry into
            Err(e @ ReadaheadError::CacheReleased(_)) => {
                log::debug!("Dropping {key}: {e}");
                return;
            }
            Err(e) => {
                if retries == 0 {
                    log::error!("Prefetching {key} failed, max retries exceed, drop. {e}");
                    failed.write().push(key.clone());
                    return;
                }

                retries -= 1;
                log::warn!("Prefetching {key} failed, retry later. {e}");
            }
        }
    }

    downloaded.fetch_add(1, Ordering::Relaxed);
    log::debug!("Prefetched {key}");
}

/// Streams one resource into the cache. Returns the number of bytes committed.
async fn fetch_resource(
    client: &HttpClient,
    cache: &Arc<SegmentCache>,
    resource: &PlannedResource,
) -> ReadaheadResult<u64> {
    // cached meanwhile, e.g. by ordinary playback
    let Some(mut writer) = cache.open_writer(&resource.cache_key).await? else {
        return Ok(0);
    };

    let mut request = client.get(resource.uri.url.clone());
    if let Some(range) = resource.uri.range {
        request = request.header(RANGE, range.to_http_range());
    }
    let mut response = request.send().await?;
    if !response.status().is_success() {
        let status = response.status();
        if let Ok(body) = response.text().await {
            log::debug!("Error body: {body}");
        }
        return Err(ReadaheadError::HttpError(status));
    }

    while let Some(chunk) = response.chunk().await? {
        writer.write_all(&chunk).await?;
    }
    writer.commit().await
}
