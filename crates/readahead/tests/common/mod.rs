use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use readahead::{
    cache::SegmentCache,
    download::{DownloadRequest, Downloader, DownloaderFactory, WorkerPool},
    manifest::{
        AdaptationSet, Manifest, ManifestLoader, Period, RangedUri, Representation, TemplateIndex,
    },
    player::{Format, MediaItem, Player, SelectedFormats, TrackType},
    ReadaheadError, ReadaheadResult,
};
use tokio::{io::AsyncWriteExt, sync::watch};
use tokio_util::sync::CancellationToken;
use url::Url;

pub const MANIFEST_URI: &str = "https://cdn.example.com/stream/manifest.mpd";

/// Lets spawned tasks run. Under paused time this also advances the clock a bit.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[derive(Debug, Clone)]
struct PlayerState {
    item: Option<MediaItem>,
    tracks: SelectedFormats,
    position_ms: u64,
    buffered_position_ms: u64,
    period_index: usize,
}

pub struct FakePlayer {
    state: Mutex<PlayerState>,
}

impl FakePlayer {
    pub fn new(uri: &str) -> Self {
        Self {
            state: Mutex::new(PlayerState {
                item: Some(MediaItem::new(uri, uri)),
                tracks: SelectedFormats {
                    video: Some(video_format("v720", 2_000_000, 720)),
                    audio: Some(audio_format("a128", 128_000)),
                },
                position_ms: 0,
                buffered_position_ms: 0,
                period_index: 0,
            }),
        }
    }

    pub fn set_item(&self, item: Option<MediaItem>) {
        self.state.lock().item = item;
    }

    pub fn set_position(&self, position_ms: u64, buffered_position_ms: u64) {
        let mut state = self.state.lock();
        state.position_ms = position_ms;
        state.buffered_position_ms = buffered_position_ms;
    }

    pub fn set_video(&self, video: Option<Format>) {
        self.state.lock().tracks.video = video;
    }
}

impl Player for FakePlayer {
    fn current_media_item(&self) -> Option<MediaItem> {
        self.state.lock().item.clone()
    }

    fn current_tracks(&self) -> SelectedFormats {
        self.state.lock().tracks.clone()
    }

    fn current_position_ms(&self) -> u64 {
        self.state.lock().position_ms
    }

    fn buffered_position_ms(&self) -> u64 {
        self.state.lock().buffered_position_ms
    }

    fn current_period_index(&self) -> usize {
        self.state.lock().period_index
    }
}

pub fn video_format(id: &str, bitrate: u64, height: u64) -> Format {
    Format {
        id: Some(id.to_string()),
        bitrate: Some(bitrate),
        width: Some(height * 16 / 9),
        height: Some(height),
        mime_type: Some("video/mp4".to_string()),
        language: None,
    }
}

pub fn audio_format(id: &str, bitrate: u64) -> Format {
    Format {
        id: Some(id.to_string()),
        bitrate: Some(bitrate),
        mime_type: Some("audio/mp4".to_string()),
        language: Some("en".to_string()),
        ..Default::default()
    }
}

fn representation(format: Format) -> Representation {
    let id = format.id.clone().unwrap_or_default();
    Representation {
        format,
        cache_key: None,
        initialization: Some(RangedUri::new(
            Url::parse(&format!("https://cdn.example.com/stream/{id}/init.mp4")).unwrap(),
            None,
        )),
        // 2s segments
        index: Arc::new(TemplateIndex::new(
            format!("https://cdn.example.com/stream/{id}/$Number$.m4s"),
            1,
            1000,
            2000,
        )),
    }
}

/// One 120s period: video in 480p/720p/1080p, audio in one quality.
pub fn manifest() -> Manifest {
    Manifest {
        periods: vec![Period {
            id: Some("p0".to_string()),
            start_us: 0,
            duration_us: Some(120_000_000),
            adaptation_sets: vec![
                AdaptationSet {
                    track_type: TrackType::Video,
                    representations: vec![
                        representation(video_format("v480", 1_000_000, 480)),
                        representation(video_format("v720", 2_000_000, 720)),
                        representation(video_format("v1080", 4_000_000, 1080)),
                    ],
                },
                AdaptationSet {
                    track_type: TrackType::Audio,
                    representations: vec![representation(audio_format("a128", 128_000))],
                },
            ],
        }],
    }
}

pub struct StaticLoader {
    manifest: Manifest,
    fail: bool,
    pub loads: AtomicUsize,
}

impl StaticLoader {
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest,
            fail: false,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Manifest::default())
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ManifestLoader for StaticLoader {
    async fn load_manifest(&self, _uri: &str) -> ReadaheadResult<Manifest> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ReadaheadError::HttpError(reqwest::StatusCode::BAD_GATEWAY));
        }
        Ok(self.manifest.clone())
    }
}

/// What the fake downloaders of one factory did.
pub struct DownloadProbe {
    pub started: AtomicUsize,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
    pub cancelled: AtomicUsize,
    pub completed: AtomicUsize,
    pub requests: Mutex<Vec<DownloadRequest>>,
    pub pools: Mutex<Vec<Arc<WorkerPool>>>,
    gate: watch::Sender<bool>,
    bytes_per_resource: usize,
}

impl DownloadProbe {
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Lets current and future downloads finish.
    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    pub fn last_pool(&self) -> Option<Arc<WorkerPool>> {
        self.pools.lock().last().cloned()
    }

    pub fn last_request(&self) -> Option<DownloadRequest> {
        self.requests.lock().last().cloned()
    }
}

/// Downloads wait for the gate, then write `bytes_per_resource` zeros per resource.
#[derive(Clone)]
pub struct GatedFactory {
    pub probe: Arc<DownloadProbe>,
}

impl GatedFactory {
    pub fn new(gate_open: bool, bytes_per_resource: usize) -> Self {
        let (gate, _) = watch::channel(gate_open);
        Self {
            probe: Arc::new(DownloadProbe {
                started: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                cancelled: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
                pools: Mutex::new(Vec::new()),
                gate,
                bytes_per_resource,
            }),
        }
    }
}

impl DownloaderFactory for GatedFactory {
    type Downloader = GatedDownloader;

    fn create(
        &self,
        request: DownloadRequest,
        cache: Arc<SegmentCache>,
        pool: Arc<WorkerPool>,
    ) -> GatedDownloader {
        self.probe.requests.lock().push(request.clone());
        self.probe.pools.lock().push(pool.clone());
        GatedDownloader {
            probe: self.probe.clone(),
            request,
            cache,
            pool,
            token: CancellationToken::new(),
        }
    }
}

pub struct GatedDownloader {
    probe: Arc<DownloadProbe>,
    request: DownloadRequest,
    cache: Arc<SegmentCache>,
    pool: Arc<WorkerPool>,
    token: CancellationToken,
}

impl GatedDownloader {
    async fn run(&self) -> ReadaheadResult<()> {
        // occupies a worker until the pool is shut down
        self.pool
            .spawn(tokio::time::sleep(Duration::from_secs(3600)))
            .await?;

        tokio::select! {
            _ = self.token.cancelled() => return Err(ReadaheadError::Cancelled),
            _ = wait_open(self.probe.gate.subscribe()) => {}
        }

        for resource in self.request.resources.iter() {
            if let Some(mut writer) = self.cache.open_writer(&resource.cache_key).await? {
                writer
                    .write_all(&vec![0; self.probe.bytes_per_resource])
                    .await?;
                writer.commit().await?;
            }
        }
        Ok(())
    }
}

async fn wait_open(mut gate: watch::Receiver<bool>) {
    loop {
        if *gate.borrow_and_update() {
            return;
        }
        if gate.changed().await.is_err() {
            return;
        }
    }
}

/// Counts a download as active until dropped, so attempts torn down mid-flight
/// are accounted for too.
struct Running<'a> {
    probe: &'a DownloadProbe,
    completed: bool,
}

impl<'a> Running<'a> {
    fn start(probe: &'a DownloadProbe) -> Self {
        probe.started.fetch_add(1, Ordering::SeqCst);
        let active = probe.active.fetch_add(1, Ordering::SeqCst) + 1;
        probe.peak.fetch_max(active, Ordering::SeqCst);
        Self {
            probe,
            completed: false,
        }
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.probe.active.fetch_sub(1, Ordering::SeqCst);
        if self.completed {
            self.probe.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.probe.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Downloader for GatedDownloader {
    async fn download(&self) -> ReadaheadResult<()> {
        let mut running = Running::start(&self.probe);
        let result = self.run().await;
        running.completed = result.is_ok();
        result
    }

    fn cancel(&self) {
        self.token.cancel();
    }
}

pub fn temp_root() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();
    (dir, path)
}
