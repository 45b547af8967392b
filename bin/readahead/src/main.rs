mod player;

use std::{num::NonZeroU32, path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use readahead::{
    dash::MpdManifestLoader, download::HttpDownloaderFactory, manifest::ManifestLoader,
    player::SelectedFormats, util::http::HttpClient, PerVideoStreamCache, PrefetchConfig,
    Prefetcher,
};
use reqwest::ClientBuilder;

use crate::player::{select_tracks, SimulatedPlayer};

#[derive(Parser, Debug, Clone)]
pub struct ReadaheadArgs {
    /// Debug output
    #[clap(long, alias = "debug")]
    verbose: bool,

    /// Directory the per-video cache is created in
    #[clap(long, env = "READAHEAD_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// TOML file with prefetch settings. Command line options override it.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Playback position to start from
    #[clap(long, default_value = "0")]
    position_ms: u64,

    /// How far playback is already buffered. Defaults to the position.
    #[clap(long)]
    buffered_ms: Option<u64>,

    /// Look-ahead window
    #[clap(long)]
    window_ms: Option<u64>,

    /// Threads limit
    #[clap(long)]
    threads: Option<NonZeroU32>,

    /// Keep playing for this many seconds after the seek pass
    #[clap(long, default_value = "0")]
    play_secs: u64,

    /// MPD url
    mpd: String,
}

impl ReadaheadArgs {
    fn prefetch_config(&self) -> anyhow::Result<PrefetchConfig> {
        let mut config = match &self.config {
            Some(path) => toml::from_str(&std::fs::read_to_string(path)?)?,
            None => PrefetchConfig::default(),
        };
        if let Some(window_ms) = self.window_ms {
            config.max_buffer_ms = window_ms;
        }
        if let Some(threads) = self.threads {
            config.max_threads = threads.get();
        }
        Ok(config)
    }

    fn cache_dir(&self) -> anyhow::Result<PathBuf> {
        let dir = match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir().join("readahead"),
        };
        std::fs::create_dir_all(&dir)?;
        Ok(dir.canonicalize()?)
    }
}

async fn wait_idle(prefetcher: &Prefetcher<Arc<SimulatedPlayer>>) {
    while prefetcher.is_prefetching() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ReadaheadArgs::parse();
    pretty_env_logger::formatted_builder()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let config = args.prefetch_config()?;
    let cache_dir = args.cache_dir()?;
    let client = HttpClient::new(ClientBuilder::new().timeout(Duration::from_secs(60)))?;

    let loader = MpdManifestLoader::new(client.clone());
    let tracks = match loader.load_manifest(&args.mpd).await {
        Ok(manifest) => select_tracks(&manifest),
        Err(e) => {
            log::error!("Failed to load {}: {e}", args.mpd);
            SelectedFormats::default()
        }
    };
    if let Some(video) = &tracks.video {
        log::info!(
            "Video: {} {}x{} @ {}",
            video.id.as_deref().unwrap_or("-"),
            video.width.unwrap_or_default(),
            video.height.unwrap_or_default(),
            video.bitrate.unwrap_or_default()
        );
    }
    if let Some(audio) = &tracks.audio {
        log::info!(
            "Audio: {} @ {}",
            audio.id.as_deref().unwrap_or("-"),
            audio.bitrate.unwrap_or_default()
        );
    }

    let player = Arc::new(SimulatedPlayer::new(
        &args.mpd,
        tracks,
        args.position_ms,
        args.buffered_ms.unwrap_or(args.position_ms),
    ));
    let stream_cache = Arc::new(PerVideoStreamCache::new(
        cache_dir,
        config.cache_limit_bytes,
    ));
    stream_cache.set_active_media_id(Some(&args.mpd));

    let debounce = config.seek_debounce();
    let prefetcher: Prefetcher<Arc<SimulatedPlayer>> = Prefetcher::new(
        player.clone(),
        loader,
        HttpDownloaderFactory::from_config(client, &config),
        stream_cache.clone(),
        config,
    );

    prefetcher.on_seek();
    tokio::time::sleep(debounce + Duration::from_millis(50)).await;
    wait_idle(&prefetcher).await;

    if args.play_secs > 0 {
        player.play();
        prefetcher.set_playing(true);
        tokio::time::sleep(Duration::from_secs(args.play_secs)).await;
        prefetcher.set_playing(false);
        wait_idle(&prefetcher).await;
    }
    prefetcher.shutdown();

    match stream_cache.cache() {
        Some(cache) => println!(
            "{} resources, {} bytes cached in {}",
            cache.len(),
            cache.cache_space(),
            cache.dir().display()
        ),
        None => println!("0 resources, 0 bytes cached"),
    }

    Ok(())
}
