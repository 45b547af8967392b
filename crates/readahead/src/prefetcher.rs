//! The prefetch orchestrator.
//!
//! [`DashPrefetcher`] reacts to player signals (play/pause, seek, media change),
//! runs one planning pass per poll tick or seek, and keeps at most one download
//! attempt in flight. Every public operation is synchronous and returns
//! immediately; the work runs on the tokio runtime captured at construction.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::{runtime::Handle, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    cache::{PerVideoStreamCache, SegmentCache},
    config::PrefetchConfig,
    coverage::PrefetchSpec,
    download::{DownloadRequest, Downloader, DownloaderFactory, WorkerPool},
    manifest::ManifestLoader,
    planner::{PlaybackSnapshot, SegmentRangePlanner},
    player::Player,
    ReadaheadError, ReadaheadResult,
};

/// The single in-flight attempt. Job, pool and downloader are torn down together.
struct ActiveAttempt<D> {
    id: u64,
    job: JoinHandle<ReadaheadResult<()>>,
    token: CancellationToken,
    pool: Option<Arc<WorkerPool>>,
    downloader: Option<Arc<D>>,
}

struct RunState<D> {
    periodic: Option<JoinHandle<()>>,
    active: Option<ActiveAttempt<D>>,
    /// Cancelled attempts still running their teardown.
    retiring: Vec<JoinHandle<ReadaheadResult<()>>>,
    last_requested: Option<PrefetchSpec>,
    shut_down: bool,
    next_attempt: u64,
}

impl<D> Default for RunState<D> {
    fn default() -> Self {
        Self {
            periodic: None,
            active: None,
            retiring: Vec::new(),
            last_requested: None,
            shut_down: false,
            next_attempt: 0,
        }
    }
}

impl<D: Downloader> RunState<D> {
    fn stop_periodic(&mut self) {
        if let Some(periodic) = self.periodic.take() {
            periodic.abort();
        }
    }

    fn cancel_active(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        active.token.cancel();
        if let Some(downloader) = active.downloader {
            downloader.cancel();
        }
        if let Some(pool) = active.pool {
            pool.shutdown_now();
        }
        self.retiring.retain(|job| !job.is_finished());
        self.retiring.push(active.job);
        log::debug!("Cancelled prefetch attempt {}", active.id);
    }
}

struct Inner<P, L, F>
where
    F: DownloaderFactory,
{
    player: P,
    loader: L,
    factory: F,
    stream_cache: Arc<PerVideoStreamCache>,
    config: RwLock<PrefetchConfig>,
    handle: Handle,
    state: Mutex<RunState<F::Downloader>>,
}

/// Prefetches upcoming DASH segments of the item a [`Player`] is playing.
///
/// Dropping the prefetcher shuts it down.
pub struct DashPrefetcher<P, L, F>
where
    P: Player,
    L: ManifestLoader,
    F: DownloaderFactory,
{
    inner: Arc<Inner<P, L, F>>,
}

impl<P, L, F> DashPrefetcher<P, L, F>
where
    P: Player,
    L: ManifestLoader,
    F: DownloaderFactory,
{
    /// Creates a prefetcher scheduling its work on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn new(
        player: P,
        loader: L,
        factory: F,
        stream_cache: Arc<PerVideoStreamCache>,
        config: PrefetchConfig,
    ) -> Self {
        Self::with_handle(player, loader, factory, stream_cache, config, Handle::current())
    }

    pub fn with_handle(
        player: P,
        loader: L,
        factory: F,
        stream_cache: Arc<PerVideoStreamCache>,
        config: PrefetchConfig,
        handle: Handle,
    ) -> Self {
        stream_cache.set_cache_limit_bytes(config.cache_limit_bytes);
        Self {
            inner: Arc::new(Inner {
                player,
                loader,
                factory,
                stream_cache,
                config: RwLock::new(config),
                handle,
                state: Mutex::new(RunState::default()),
            }),
        }
    }

    pub fn config(&self) -> PrefetchConfig {
        self.inner.config.read().clone()
    }

    /// Applies new tunables. Running attempts keep the ones they started with.
    pub fn update_config(&self, config: PrefetchConfig) {
        self.inner
            .stream_cache
            .set_cache_limit_bytes(config.cache_limit_bytes);
        *self.inner.config.write() = config;
    }

    /// Forgets the previous item: cancels its attempt and its coverage.
    pub fn on_media_changed(&self) {
        let mut state = self.inner.state.lock();
        state.cancel_active();
        state.last_requested = None;
    }

    /// Starts or stops periodic polling.
    ///
    /// Polling only starts for chunked items, and never twice.
    pub fn set_playing(&self, playing: bool) {
        if !playing {
            self.inner.state.lock().stop_periodic();
            return;
        }

        if !self.inner.current_item_is_chunked() {
            return;
        }

        let mut state = self.inner.state.lock();
        if state.shut_down || state.periodic.as_ref().is_some_and(|job| !job.is_finished()) {
            return;
        }

        let inner = Arc::downgrade(&self.inner);
        state.periodic = Some(self.inner.handle.spawn(async move {
            loop {
                let Some(interval) = Inner::upgrade_and(&inner, |inner| {
                    inner.maybe_prefetch();
                    inner.config.read().poll_interval()
                }) else {
                    break;
                };
                tokio::time::sleep(interval).await;
            }
        }));
    }

    /// Stops polling, cancels the running attempt and plans once after the seek
    /// debounce delay.
    ///
    /// Every call schedules its own delayed pass. A pass finding an attempt already
    /// in flight, or a covering one already launched, does nothing.
    pub fn on_seek(&self) {
        {
            let mut state = self.inner.state.lock();
            state.stop_periodic();
            state.cancel_active();
            if state.shut_down {
                return;
            }
        }

        if !self.inner.current_item_is_chunked() {
            return;
        }

        let delay = self.inner.config.read().seek_debounce();
        let inner = Arc::downgrade(&self.inner);
        self.inner.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            Inner::upgrade_and(&inner, |inner| inner.maybe_prefetch());
        });
    }

    /// Cancels the in-flight attempt, if any. Idempotent.
    pub fn cancel_active(&self) {
        self.inner.state.lock().cancel_active();
    }

    /// Stops everything for good.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.shut_down = true;
        state.stop_periodic();
        state.cancel_active();
    }

    /// Runs one planning pass now.
    pub fn prefetch_now(&self) {
        self.inner.maybe_prefetch();
    }

    pub fn is_polling(&self) -> bool {
        self.inner
            .state
            .lock()
            .periodic
            .as_ref()
            .is_some_and(|job| !job.is_finished())
    }

    pub fn is_prefetching(&self) -> bool {
        self.inner
            .state
            .lock()
            .active
            .as_ref()
            .is_some_and(|active| !active.job.is_finished())
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.state.lock().shut_down
    }

    /// The last spec whose download was launched.
    pub fn last_requested_spec(&self) -> Option<PrefetchSpec> {
        self.inner.state.lock().last_requested.clone()
    }
}

impl<P, L, F> Drop for DashPrefetcher<P, L, F>
where
    P: Player,
    L: ManifestLoader,
    F: DownloaderFactory,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<P, L, F> Inner<P, L, F>
where
    P: Player,
    L: ManifestLoader,
    F: DownloaderFactory,
{
    fn upgrade_and<T>(inner: &Weak<Self>, f: impl FnOnce(&Arc<Self>) -> T) -> Option<T> {
        inner.upgrade().map(|inner| f(&inner))
    }

    fn current_item_is_chunked(&self) -> bool {
        self.player
            .current_media_item()
            .is_some_and(|item| !item.id.trim().is_empty() && item.is_chunked())
    }

    /// One planning pass. Launches an attempt unless there is nothing to do.
    fn maybe_prefetch(self: &Arc<Self>) {
        let Some(snapshot) = PlaybackSnapshot::capture(&self.player) else {
            return;
        };
        if !snapshot.media.is_chunked() {
            return;
        }
        let Some(cache) = self.stream_cache.cache() else {
            log::debug!("No active cache region, skip prefetching");
            return;
        };

        let window_ms = self.config.read().max_buffer_ms;
        let planner = SegmentRangePlanner::from_config(&self.config.read());
        let Some(spec) = planner.window(&snapshot) else {
            return;
        };

        let mut state = self.state.lock();
        if state.shut_down {
            return;
        }
        match state
            .active
            .as_ref()
            .map(|active| (active.id, active.job.is_finished()))
        {
            Some((active_id, false)) => {
                log::debug!("Prefetch attempt {active_id} still running, skip");
                return;
            }
            // ended without tearing down
            Some((_, true)) => state.cancel_active(),
            None => {}
        }
        if state
            .last_requested
            .as_ref()
            .is_some_and(|last| last.covers(&spec))
        {
            log::debug!(
                "[{}, {}] already requested, skip",
                spec.start_us,
                spec.end_us
            );
            return;
        }

        let id = state.next_attempt;
        state.next_attempt += 1;
        let token = CancellationToken::new();
        let retiring = std::mem::take(&mut state.retiring);
        let job = self.handle.spawn(self.clone().run_attempt(
            id,
            token.clone(),
            retiring,
            snapshot,
            spec,
            planner,
            cache,
            window_ms,
        ));
        state.active = Some(ActiveAttempt {
            id,
            job,
            token,
            pool: None,
            downloader: None,
        });
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_attempt(
        self: Arc<Self>,
        id: u64,
        token: CancellationToken,
        retiring: Vec<JoinHandle<ReadaheadResult<()>>>,
        snapshot: PlaybackSnapshot,
        spec: PrefetchSpec,
        planner: SegmentRangePlanner,
        cache: Arc<SegmentCache>,
        window_ms: u64,
    ) -> ReadaheadResult<()> {
        for job in retiring {
            let _ = job.await;
        }

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(ReadaheadError::Cancelled),
            result = self.attempt(id, &snapshot, &spec, &planner, cache) => result,
        };

        let finished = {
            let mut state = self.state.lock();
            if state.active.as_ref().is_some_and(|active| active.id == id) {
                state.active.take()
            } else {
                None
            }
        };
        if let Some(pool) = finished.and_then(|active| active.pool) {
            pool.shutdown_now();
        }

        let stream_cache = self.stream_cache.clone();
        let position_ms = snapshot.position_ms;
        let _ = tokio::task::spawn_blocking(move || {
            stream_cache.enforce_cache_limit(position_ms, window_ms)
        })
        .await;

        match result {
            Err(e) if e.is_cancelled() => {
                log::debug!("Prefetch attempt {id} cancelled");
                Err(e)
            }
            Err(e) => {
                log::warn!("DASH prefetch failed: {e}");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    async fn attempt(
        &self,
        id: u64,
        snapshot: &PlaybackSnapshot,
        spec: &PrefetchSpec,
        planner: &SegmentRangePlanner,
        cache: Arc<SegmentCache>,
    ) -> ReadaheadResult<()> {
        let manifest = self.loader.load_manifest(&snapshot.media.uri).await?;
        let Some(plan) = planner.resolve(&manifest, spec, &snapshot.tracks) else {
            return Ok(());
        };

        let pool = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(active) = state.active.as_mut().filter(|active| active.id == id) else {
                return Err(ReadaheadError::Cancelled);
            };
            let pool = Arc::new(WorkerPool::new(plan.threads));
            active.pool = Some(pool.clone());
            state.last_requested = Some(spec.clone());
            pool
        };

        // recorded up front so a cancelled download still leaves a description
        // of what the region holds
        for resource in plan.resources.iter() {
            self.stream_cache.record_key_metadata(
                resource.cache_key.clone(),
                resource.track_type,
                resource.quality_key.clone(),
                resource.media_start_time_ms,
                resource.media_end_time_ms,
            );
        }

        log::info!(
            "Prefetching [{}ms, {}ms] of {}: {} resources, {} thread(s)",
            spec.start_us / 1000,
            spec.end_us / 1000,
            snapshot.media.id,
            plan.resources.len(),
            plan.threads
        );
        let request = DownloadRequest::from_plan(snapshot.media.uri.clone(), &plan);
        let downloader = Arc::new(self.factory.create(request, cache, pool));
        {
            let mut state = self.state.lock();
            let Some(active) = state.active.as_mut().filter(|active| active.id == id) else {
                return Err(ReadaheadError::Cancelled);
            };
            active.downloader = Some(downloader.clone());
        }

        downloader.download().await
    }
}
