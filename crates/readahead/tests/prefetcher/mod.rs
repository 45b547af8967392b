
use std::{sync::Arc, time::Duration};

use readahead::{
    player::{MediaItem, TrackType},
    DashPrefetcher, PerVideoStreamCache, PrefetchConfig,
};

use crate::common::{
    manifest, settle, temp_root, DownloadProbe, FakePlayer, GatedFactory, StaticLoader,
    MANIFEST_URI,
};

struct Harness {
    prefetcher: DashPrefetcher<Arc<FakePlayer>, Arc<StaticLoader>, GatedFactory>,
    player: Arc<FakePlayer>,
    loader: Arc<StaticLoader>,
    probe: Arc<DownloadProbe>,
    cache: Arc<PerVideoStreamCache>,
    _root: tempfile::TempDir,
}

fn config() -> PrefetchConfig {
    PrefetchConfig::new()
        .with_max_buffer_ms(10_000)
        .with_max_threads(4)
}

fn harness(loader: StaticLoader, gate_open: bool, config: PrefetchConfig) -> Harness {
    crate::init_logger();

    let (root, path) = temp_root();
    let cache = Arc::new(PerVideoStreamCache::new(path, config.cache_limit_bytes));
    cache.set_active_media_id(Some(MANIFEST_URI));

    let player = Arc::new(FakePlayer::new(MANIFEST_URI));
    let loader = Arc::new(loader);
    let factory = GatedFactory::new(gate_open, 1000);
    let probe = factory.probe.clone();
    let prefetcher = DashPrefetcher::new(
        player.clone(),
        loader.clone(),
        factory,
        cache.clone(),
        config,
    );

    Harness {
        prefetcher,
        player,
        loader,
        probe,
        cache,
        _root: root,
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_flight_across_polls_and_seeks() {
    let h = harness(StaticLoader::new(manifest()), false, config());

    h.prefetcher.set_playing(true);
    settle().await;
    assert!(h.prefetcher.is_polling());
    assert!(h.prefetcher.is_prefetching());
    assert_eq!(h.probe.started(), 1);

    // polling again while playing is a no-op
    h.prefetcher.set_playing(true);
    assert!(h.prefetcher.is_polling());

    // poll ticks during the attempt start nothing
    h.player.set_position(4_000, 4_000);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.probe.started(), 1);

    // rapid seeks: every one cancels, only one delayed pass launches
    for position in [30_000, 31_000, 32_000] {
        h.player.set_position(position, position);
        h.prefetcher.on_seek();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!h.prefetcher.is_polling());
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(h.probe.started(), 2);
    assert_eq!(h.probe.cancelled(), 1);
    assert_eq!(h.probe.active(), 1);
    assert_eq!(h.probe.peak(), 1);

    let spec = h.prefetcher.last_requested_spec().unwrap();
    assert_eq!((spec.start_us, spec.end_us), (32_000_000, 42_000_000));
}

#[tokio::test(start_paused = true)]
async fn test_covered_window_is_not_requested_again() {
    let h = harness(StaticLoader::new(manifest()), true, config());

    h.prefetcher.prefetch_now();
    settle().await;
    assert_eq!(h.probe.started(), 1);
    assert_eq!(h.probe.completed(), 1);
    assert!(!h.prefetcher.is_prefetching());
    let spec = h.prefetcher.last_requested_spec().unwrap();
    assert_eq!((spec.start_us, spec.end_us), (0, 10_000_000));
    assert_eq!(spec.video_key.as_deref(), Some("v_720_2000000"));
    assert_eq!(spec.audio_key.as_deref(), Some("a_en_128000"));

    // [5s, 10s] lies inside
    h.player.set_position(0, 5_000);
    h.prefetcher.prefetch_now();
    settle().await;
    assert_eq!(h.probe.started(), 1);
    assert_eq!(h.loader.loads(), 1);

    // [1s, 11s] does not, although it overlaps
    h.player.set_position(1_000, 1_000);
    h.prefetcher.prefetch_now();
    settle().await;
    assert_eq!(h.probe.started(), 2);

    // a media change forgets what was requested
    h.prefetcher.on_media_changed();
    assert!(h.prefetcher.last_requested_spec().is_none());
    h.player.set_position(1_000, 5_000);
    h.prefetcher.prefetch_now();
    settle().await;
    assert_eq!(h.probe.started(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_seek_waits_for_debounce() {
    let h = harness(StaticLoader::new(manifest()), true, config());

    h.prefetcher.on_seek();
    tokio::time::sleep(Duration::from_millis(290)).await;
    assert_eq!(h.loader.loads(), 0);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.loader.loads(), 1);
    assert_eq!(h.probe.started(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_keeps_metadata_and_shuts_down_pool() {
    let h = harness(StaticLoader::new(manifest()), false, config());

    h.prefetcher.prefetch_now();
    settle().await;
    let pool = h.probe.last_pool().unwrap();
    assert_eq!(pool.size().get(), 4);
    assert_eq!(pool.in_flight(), 1);

    let request = h.probe.last_request().unwrap();
    assert_eq!(request.uri, MANIFEST_URI);
    assert_eq!(request.start_us, 0);
    assert_eq!(request.duration_us, 10_000_000);
    // init + 6 segments, for video and audio
    assert_eq!(request.resources.len(), 14);

    h.prefetcher.cancel_active();
    h.prefetcher.cancel_active();
    settle().await;

    assert!(pool.is_shut_down());
    assert_eq!(pool.in_flight(), 0);
    assert!(!h.prefetcher.is_prefetching());
    assert_eq!(h.probe.cancelled(), 1);
    assert_eq!(h.probe.active(), 0);

    let metadata = h.cache.metadata();
    for resource in request.resources.iter() {
        assert!(metadata.contains(&resource.cache_key), "{}", resource.cache_key);
    }
    let segment = metadata
        .get("https://cdn.example.com/stream/v720/2.m4s")
        .unwrap();
    assert_eq!(segment.track_type, TrackType::Video);
    assert_eq!(segment.quality_key.as_deref(), Some("v_720_2000000"));
    assert_eq!(segment.time_range_ms(), Some((2_000, 4_000)));
    let init = metadata
        .get("https://cdn.example.com/stream/a128/init.mp4")
        .unwrap();
    assert_eq!(init.track_type, TrackType::Audio);
    assert_eq!(init.time_range_ms(), None);
}

#[tokio::test(start_paused = true)]
async fn test_failed_attempt_is_swallowed() {
    let h = harness(StaticLoader::failing(), true, config());

    h.prefetcher.prefetch_now();
    settle().await;
    assert_eq!(h.loader.loads(), 1);
    assert!(!h.prefetcher.is_prefetching());
    assert!(h.prefetcher.last_requested_spec().is_none());
    assert_eq!(h.probe.started(), 0);

    // tried again on the next pass
    h.prefetcher.prefetch_now();
    settle().await;
    assert_eq!(h.loader.loads(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_is_terminal() {
    let h = harness(StaticLoader::new(manifest()), false, config());

    h.prefetcher.set_playing(true);
    settle().await;
    assert!(h.prefetcher.is_prefetching());

    h.prefetcher.shutdown();
    assert!(h.prefetcher.is_shut_down());
    assert!(!h.prefetcher.is_polling());
    assert!(!h.prefetcher.is_prefetching());

    h.player.set_position(60_000, 60_000);
    h.prefetcher.set_playing(true);
    assert!(!h.prefetcher.is_polling());
    h.prefetcher.on_seek();
    h.prefetcher.prefetch_now();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(h.loader.loads(), 1);
    assert_eq!(h.probe.started(), 1);
    assert_eq!(h.probe.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_nothing_to_do() {
    let h = harness(StaticLoader::new(manifest()), true, config());

    // progressive item
    h.player
        .set_item(Some(MediaItem::new("video", "https://cdn.example.com/video.mp4")));
    h.prefetcher.set_playing(true);
    assert!(!h.prefetcher.is_polling());
    h.prefetcher.prefetch_now();

    // no item
    h.player.set_item(None);
    h.prefetcher.prefetch_now();

    // no cache region
    h.player
        .set_item(Some(MediaItem::new(MANIFEST_URI, MANIFEST_URI)));
    h.cache.clear_active_media();
    h.prefetcher.prefetch_now();

    // window too short
    h.cache.set_active_media_id(Some(MANIFEST_URI));
    h.player.set_position(0, 9_500);
    h.prefetcher.prefetch_now();

    settle().await;
    assert_eq!(h.loader.loads(), 0);
    assert!(!h.prefetcher.is_prefetching());

    h.prefetcher.set_playing(true);
    assert!(h.prefetcher.is_polling());
    h.prefetcher.set_playing(false);
    assert!(!h.prefetcher.is_polling());
}

#[tokio::test(start_paused = true)]
async fn test_attempt_enforces_cache_limit() {
    let h = harness(
        StaticLoader::new(manifest()),
        true,
        config().with_cache_limit_bytes(5_000),
    );

    h.prefetcher.prefetch_now();
    settle().await;
    assert_eq!(h.probe.completed(), 1);

    let region = h.cache.cache().unwrap();
    assert!(region.cache_space() <= 5_000);
    assert_eq!(region.len(), 5);
    // evicted resources lose their metadata, kept ones keep it
    assert_eq!(h.cache.metadata().len(), region.len());
    for key in region.keys() {
        assert!(h.cache.metadata().contains(&key));
    }
}

#[tokio::test(start_paused = true)]
async fn test_update_config() {
    let h = harness(StaticLoader::new(manifest()), true, config());

    h.prefetcher
        .update_config(config().with_max_buffer_ms(20_000).with_cache_limit_bytes(123));
    assert_eq!(h.prefetcher.config().max_buffer_ms, 20_000);
    assert_eq!(h.cache.cache_limit_bytes(), 123);

    h.prefetcher.prefetch_now();
    settle().await;
    let spec = h.prefetcher.last_requested_spec().unwrap();
    assert_eq!(spec.end_us, 20_000_000);
}
