use std::{sync::OnceLock, time::Instant};

use readahead::{
    manifest::Manifest,
    player::{MediaItem, Player, SelectedFormats, TrackType},
};

/// A player that never renders anything: its position only advances with wall
/// time once [`SimulatedPlayer::play`] is called.
pub struct SimulatedPlayer {
    item: MediaItem,
    tracks: SelectedFormats,
    start_position_ms: u64,
    buffered_position_ms: u64,
    playing_since: OnceLock<Instant>,
}

impl SimulatedPlayer {
    pub fn new(
        uri: &str,
        tracks: SelectedFormats,
        start_position_ms: u64,
        buffered_position_ms: u64,
    ) -> Self {
        Self {
            item: MediaItem::new(uri, uri),
            tracks,
            start_position_ms,
            buffered_position_ms,
            playing_since: OnceLock::new(),
        }
    }

    pub fn play(&self) {
        let _ = self.playing_since.set(Instant::now());
    }
}

impl Player for SimulatedPlayer {
    fn current_media_item(&self) -> Option<MediaItem> {
        Some(self.item.clone())
    }

    fn current_tracks(&self) -> SelectedFormats {
        self.tracks.clone()
    }

    fn current_position_ms(&self) -> u64 {
        let played = self
            .playing_since
            .get()
            .map(|since| since.elapsed().as_millis() as u64)
            .unwrap_or_default();
        self.start_position_ms + played
    }

    fn buffered_position_ms(&self) -> u64 {
        self.buffered_position_ms.max(self.current_position_ms())
    }

    fn current_period_index(&self) -> usize {
        0
    }
}

/// Picks what an adaptive engine would settle on with unlimited bandwidth: the
/// largest video representation and the richest audio one of the first period.
pub fn select_tracks(manifest: &Manifest) -> SelectedFormats {
    let Some(period) = manifest.period(0) else {
        return SelectedFormats::default();
    };

    let formats = |track_type: TrackType| {
        period
            .adaptation_sets
            .iter()
            .filter(move |set| set.track_type == track_type)
            .flat_map(|set| set.representations.iter().map(|rep| &rep.format))
    };

    SelectedFormats {
        video: formats(TrackType::Video)
            .max_by_key(|format| (format.width, format.height, format.bitrate))
            .cloned(),
        audio: formats(TrackType::Audio)
            .max_by_key(|format| format.bitrate)
            .cloned(),
    }
}
