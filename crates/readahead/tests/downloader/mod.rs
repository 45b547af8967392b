use std::{num::NonZeroU32, sync::Arc, time::Duration};

use readahead::{
    cache::SegmentCache,
    download::{DownloadRequest, Downloader, DownloaderFactory, HttpDownloaderFactory, WorkerPool},
    manifest::RangedUri,
    planner::PlannedResource,
    player::TrackType,
    util::{http::HttpClient, range::ByteRange},
    ReadaheadError,
};
use tokio::io::AsyncWriteExt;
use url::Url;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

struct Setup {
    server: MockServer,
    cache: Arc<SegmentCache>,
    _dir: tempfile::TempDir,
}

async fn setup() -> Setup {
    crate::init_logger();
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(SegmentCache::open(dir.path().join("region")).unwrap());
    Setup {
        server: MockServer::start().await,
        cache,
        _dir: dir,
    }
}

fn resource(server: &MockServer, file: &str, range: Option<ByteRange>) -> PlannedResource {
    let url = Url::parse(&format!("{}/media/{file}", server.uri())).unwrap();
    let mut cache_key = url.to_string();
    if let Some(range) = range {
        cache_key.push_str(&format!("#bytes={}", range.to_http_range().trim_start_matches("bytes=")));
    }
    PlannedResource {
        cache_key,
        uri: RangedUri::new(url, range),
        track_type: TrackType::Video,
        quality_key: None,
        media_start_time_ms: None,
        media_end_time_ms: None,
    }
}

fn request(resources: Vec<PlannedResource>) -> DownloadRequest {
    DownloadRequest {
        uri: "https://cdn.example.com/manifest.mpd".to_string(),
        stream_keys: vec![],
        start_us: 0,
        duration_us: 10_000_000,
        resources,
    }
}

fn pool(size: u32) -> Arc<WorkerPool> {
    Arc::new(WorkerPool::new(NonZeroU32::new(size).unwrap()))
}

#[tokio::test]
async fn test_download_commits_resources() -> anyhow::Result<()> {
    let s = setup().await;
    for (file, body) in [("init.mp4", "init"), ("1.m4s", "one"), ("2.m4s", "two")] {
        Mock::given(method("GET"))
            .and(path(format!("/media/{file}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&s.server)
            .await;
    }

    let resources = vec![
        resource(&s.server, "init.mp4", None),
        resource(&s.server, "1.m4s", None),
        resource(&s.server, "2.m4s", None),
    ];
    let downloader = HttpDownloaderFactory::new(HttpClient::default()).create(
        request(resources.clone()),
        s.cache.clone(),
        pool(2),
    );
    downloader.download().await?;

    assert_eq!(downloader.downloaded(), 3);
    assert!(downloader.failed().is_empty());
    assert_eq!(s.cache.len(), 3);
    assert_eq!(s.cache.cache_space(), 4 + 3 + 3);
    assert_eq!(
        s.cache.read(&resources[1].cache_key).await?.as_deref(),
        Some(&b"one"[..])
    );
    Ok(())
}

#[tokio::test]
async fn test_ranged_resource_sends_range_header() -> anyhow::Result<()> {
    let s = setup().await;
    Mock::given(method("GET"))
        .and(path("/media/video.mp4"))
        .and(header("range", "bytes=100-199"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![7; 100]))
        .expect(1)
        .mount(&s.server)
        .await;

    let ranged = resource(&s.server, "video.mp4", Some(ByteRange::new(100, Some(100))));
    assert!(ranged.cache_key.ends_with("#bytes=100-199"));
    let downloader = HttpDownloaderFactory::new(HttpClient::default()).create(
        request(vec![ranged.clone()]),
        s.cache.clone(),
        pool(1),
    );
    downloader.download().await?;

    assert_eq!(s.cache.resource_len(&ranged.cache_key), Some(100));
    Ok(())
}

#[tokio::test]
async fn test_transient_failure_is_retried() -> anyhow::Result<()> {
    let s = setup().await;
    Mock::given(method("GET"))
        .and(path("/media/1.m4s"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&s.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/1.m4s"))
        .respond_with(ResponseTemplate::new(200).set_body_string("one"))
        .expect(1)
        .mount(&s.server)
        .await;

    let segment = resource(&s.server, "1.m4s", None);
    let downloader = HttpDownloaderFactory::new(HttpClient::default()).create(
        request(vec![segment.clone()]),
        s.cache.clone(),
        pool(1),
    );
    downloader.download().await?;

    assert_eq!(downloader.downloaded(), 1);
    assert!(s.cache.contains(&segment.cache_key));
    Ok(())
}

#[tokio::test]
async fn test_failure_after_retries_is_reported() -> anyhow::Result<()> {
    let s = setup().await;
    Mock::given(method("GET"))
        .and(path("/media/missing.m4s"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&s.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/1.m4s"))
        .respond_with(ResponseTemplate::new(200).set_body_string("one"))
        .expect(1)
        .mount(&s.server)
        .await;

    let missing = resource(&s.server, "missing.m4s", None);
    let present = resource(&s.server, "1.m4s", None);
    let downloader = HttpDownloaderFactory::new(HttpClient::default())
        .with_retries(1)
        .create(
            request(vec![missing.clone(), present.clone()]),
            s.cache.clone(),
            pool(2),
        );
    // one failed resource does not fail the attempt
    downloader.download().await?;

    assert_eq!(downloader.failed(), vec![missing.cache_key.clone()]);
    assert_eq!(downloader.downloaded(), 1);
    assert!(!s.cache.contains(&missing.cache_key));
    assert!(s.cache.contains(&present.cache_key));
    // no partial file left behind
    let partials = std::fs::read_dir(s.cache.dir())?
        .flatten()
        .filter(|item| item.path().extension().is_some_and(|ext| ext == "partial"))
        .count();
    assert_eq!(partials, 0);
    Ok(())
}

#[tokio::test]
async fn test_cached_resources_are_skipped() -> anyhow::Result<()> {
    let s = setup().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fresh"))
        .expect(0)
        .mount(&s.server)
        .await;

    let segment = resource(&s.server, "1.m4s", None);
    let mut writer = s.cache.open_writer(&segment.cache_key).await?.unwrap();
    writer.write_all(b"cached").await?;
    writer.commit().await?;

    let downloader = HttpDownloaderFactory::new(HttpClient::default()).create(
        request(vec![segment.clone()]),
        s.cache.clone(),
        pool(1),
    );
    downloader.download().await?;

    assert_eq!(
        s.cache.read(&segment.cache_key).await?.as_deref(),
        Some(&b"cached"[..])
    );
    Ok(())
}

#[tokio::test]
async fn test_cancel_stops_download() -> anyhow::Result<()> {
    let s = setup().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("slow")
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&s.server)
        .await;

    let resources = (1..=3)
        .map(|n| resource(&s.server, &format!("{n}.m4s"), None))
        .collect();
    let downloader = Arc::new(HttpDownloaderFactory::new(HttpClient::default()).create(
        request(resources),
        s.cache.clone(),
        pool(2),
    ));

    let job = tokio::spawn({
        let downloader = downloader.clone();
        async move { downloader.download().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    downloader.cancel();
    downloader.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), job).await??;
    assert!(matches!(result, Err(ReadaheadError::Cancelled)));
    assert_eq!(downloader.downloaded(), 0);
    assert!(s.cache.is_empty());
    Ok(())
}
