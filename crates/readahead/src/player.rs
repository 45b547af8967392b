use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TrackType {
    Video,
    Audio,
    #[default]
    Other,
}

impl TrackType {
    pub fn from_mime_type(mime_type: Option<&str>) -> Self {
        let Some(mime_type) = mime_type else {
            return Self::Other;
        };

        if mime_type.starts_with("video") {
            Self::Video
        } else if mime_type.starts_with("audio") {
            Self::Audio
        } else {
            Self::Other
        }
    }
}

/// Properties of one encoded variant, as reported by the playback engine or
/// declared by a manifest representation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Format {
    pub id: Option<String>,
    pub bitrate: Option<u64>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub mime_type: Option<String>,
    pub language: Option<String>,
}

impl Format {
    /// Application-level fingerprint grouping cache entries by encoding quality.
    ///
    /// Video is keyed by height and bitrate, audio by language and bitrate.
    pub fn quality_key(&self, track_type: TrackType) -> Option<String> {
        let bitrate = display_or_empty(self.bitrate);
        match track_type {
            TrackType::Video => Some(format!("v_{}_{bitrate}", display_or_empty(self.height))),
            TrackType::Audio => {
                let language = self.language.as_deref().unwrap_or_default().to_lowercase();
                Some(format!("a_{language}_{bitrate}"))
            }
            TrackType::Other => None,
        }
    }
}

fn display_or_empty(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub id: String,
    pub uri: String,
}

impl MediaItem {
    pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
        }
    }

    /// Whether the item is a manifest-based (DASH) stream.
    pub fn is_chunked(&self) -> bool {
        let last_segment = match url::Url::parse(&self.uri) {
            Ok(url) => url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .unwrap_or_default()
                .to_string(),
            Err(_) => self.uri.rsplit('/').next().unwrap_or_default().to_string(),
        };
        last_segment.to_lowercase().ends_with(".mpd")
    }
}

/// The formats currently selected by the engine's track selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectedFormats {
    pub video: Option<Format>,
    pub audio: Option<Format>,
}

impl SelectedFormats {
    pub fn get(&self, track_type: TrackType) -> Option<&Format> {
        match track_type {
            TrackType::Video => self.video.as_ref(),
            TrackType::Audio => self.audio.as_ref(),
            TrackType::Other => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }
}

/// The narrow view of the playback engine the prefetcher reads from.
pub trait Player: Send + Sync + 'static {
    fn current_media_item(&self) -> Option<MediaItem>;

    fn current_tracks(&self) -> SelectedFormats;

    fn current_position_ms(&self) -> u64;

    fn buffered_position_ms(&self) -> u64;

    fn current_period_index(&self) -> usize;
}

impl<P> Player for std::sync::Arc<P>
where
    P: Player,
{
    fn current_media_item(&self) -> Option<MediaItem> {
        self.as_ref().current_media_item()
    }

    fn current_tracks(&self) -> SelectedFormats {
        self.as_ref().current_tracks()
    }

    fn current_position_ms(&self) -> u64 {
        self.as_ref().current_position_ms()
    }

    fn buffered_position_ms(&self) -> u64 {
        self.as_ref().buffered_position_ms()
    }

    fn current_period_index(&self) -> usize {
        self.as_ref().current_period_index()
    }
}
