//! Turns a playback snapshot into a concrete set of segments to prefetch.
//!
//! Planning happens in two steps. [`SegmentRangePlanner::window`] only needs the
//! player state and yields the [`PrefetchSpec`] used for the coverage check, so a
//! redundant attempt is rejected before any manifest is loaded.
//! [`SegmentRangePlanner::resolve`] then maps that window onto a manifest.

use std::num::NonZeroU32;

use crate::{
    config::PrefetchConfig,
    coverage::PrefetchSpec,
    manifest::{AdaptationSet, Manifest, Period, RangedUri, Representation, SegmentIndex, StreamKey},
    player::{Format, MediaItem, Player, SelectedFormats, TrackType},
};

/// Windows shorter than this are not worth a manifest load.
pub const MIN_PREFETCH_SPAN_US: u64 = 1_000_000;
/// Segment duration assumed when no video representation was matched.
pub const DEFAULT_SEGMENT_DURATION_US: u64 = 10_000_000;

/// Player state read once per planning pass.
#[derive(Debug, Clone)]
pub struct PlaybackSnapshot {
    pub media: MediaItem,
    pub tracks: SelectedFormats,
    pub position_ms: u64,
    pub buffered_position_ms: u64,
    pub period_index: usize,
}

impl PlaybackSnapshot {
    /// `None` if the player has no current item.
    pub fn capture(player: &impl Player) -> Option<Self> {
        Some(Self {
            media: player.current_media_item()?,
            tracks: player.current_tracks(),
            position_ms: player.current_position_ms(),
            buffered_position_ms: player.buffered_position_ms(),
            period_index: player.current_period_index(),
        })
    }
}

/// One resource scheduled for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedResource {
    pub cache_key: String,
    pub uri: RangedUri,
    pub track_type: TrackType,
    pub quality_key: Option<String>,
    /// `None` for initialization segments.
    pub media_start_time_ms: Option<u64>,
    pub media_end_time_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct PrefetchPlan {
    pub spec: PrefetchSpec,
    /// Video first, then audio.
    pub stream_keys: Vec<StreamKey>,
    pub resources: Vec<PlannedResource>,
    pub threads: NonZeroU32,
    pub segment_duration_us: u64,
}

/// Ways a selected format can be recognised among the representations of a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// Same representation id.
    ExactId,
    /// Same bitrate, width, height and mime type.
    Metrics,
    /// Same bitrate.
    Bitrate,
}

impl MatchStrategy {
    /// Most specific first.
    pub const RANKED: [MatchStrategy; 3] = [Self::ExactId, Self::Metrics, Self::Bitrate];

    pub fn matches(&self, selected: &Format, candidate: &Format) -> bool {
        match self {
            Self::ExactId => selected.id.is_some() && selected.id == candidate.id,
            Self::Metrics => {
                selected.bitrate == candidate.bitrate
                    && selected.width == candidate.width
                    && selected.height == candidate.height
                    && selected.mime_type == candidate.mime_type
            }
            Self::Bitrate => selected.bitrate == candidate.bitrate,
        }
    }
}

/// Index of the representation of `adaptation_set` matching `selected`.
///
/// Strategies are tried in [`MatchStrategy::RANKED`] order and the first
/// representation accepted by the first successful strategy wins.
pub fn match_representation(adaptation_set: &AdaptationSet, selected: &Format) -> Option<usize> {
    MatchStrategy::RANKED.iter().find_map(|strategy| {
        adaptation_set
            .representations
            .iter()
            .position(|representation| strategy.matches(selected, &representation.format))
    })
}

/// Stream key of the first adaptation set of `track_type` holding a match for `selected`.
pub fn find_stream_key(
    period_index: usize,
    period: &Period,
    track_type: TrackType,
    selected: Option<&Format>,
) -> Option<StreamKey> {
    let selected = selected?;
    period
        .adaptation_sets
        .iter()
        .enumerate()
        .filter(|(_, adaptation_set)| adaptation_set.track_type == track_type)
        .find_map(|(group_index, adaptation_set)| {
            let stream_index = match_representation(adaptation_set, selected)?;
            Some(StreamKey::new(period_index, group_index, stream_index))
        })
}

/// `min(max_threads, ceil(window / segment duration))`, at least 1.
pub fn compute_threads(window_us: u64, segment_duration_us: u64, max_threads: NonZeroU32) -> NonZeroU32 {
    let wanted = match segment_duration_us {
        0 => 1,
        duration => window_us.div_ceil(duration).max(1),
    };
    let threads = wanted.min(max_threads.get() as u64) as u32;
    NonZeroU32::new(threads).unwrap_or(NonZeroU32::MIN)
}

fn quality_key(tracks: &SelectedFormats, track_type: TrackType) -> Option<String> {
    tracks
        .get(track_type)
        .and_then(|format| format.quality_key(track_type))
}

fn representation<'a>(period: &'a Period, key: &StreamKey) -> Option<&'a Representation> {
    period
        .adaptation_sets
        .get(key.group_index)?
        .representations
        .get(key.stream_index)
}

fn estimate_segment_duration_us(index: &dyn SegmentIndex, period_duration_us: Option<u64>) -> u64 {
    let first = index.segment_num(0, period_duration_us);
    index.duration_us(first, period_duration_us).max(1)
}

#[derive(Debug, Clone)]
pub struct SegmentRangePlanner {
    window_ms: u64,
    max_threads: NonZeroU32,
}

impl SegmentRangePlanner {
    pub fn new(window_ms: u64, max_threads: NonZeroU32) -> Self {
        Self {
            window_ms,
            max_threads,
        }
    }

    pub fn from_config(config: &PrefetchConfig) -> Self {
        Self::new(config.max_buffer_ms, config.max_threads())
    }

    pub fn window_us(&self) -> u64 {
        self.window_ms.saturating_mul(1000)
    }

    /// The time range worth prefetching, or `None` if it is empty or too short.
    pub fn window(&self, snapshot: &PlaybackSnapshot) -> Option<PrefetchSpec> {
        let window_us = self.window_us();
        if window_us == 0 {
            return None;
        }

        let position_us = snapshot.position_ms.saturating_mul(1000);
        let buffered_us = snapshot.buffered_position_ms.saturating_mul(1000);
        let start_us = position_us.max(buffered_us);
        let end_us = position_us.saturating_add(window_us);
        if end_us.saturating_sub(start_us) < MIN_PREFETCH_SPAN_US {
            return None;
        }

        Some(PrefetchSpec::new(
            snapshot.media.id.clone(),
            quality_key(&snapshot.tracks, TrackType::Video),
            quality_key(&snapshot.tracks, TrackType::Audio),
            snapshot.period_index,
            start_us,
            end_us,
        ))
    }

    /// Maps `spec` onto `manifest`. `None` if no selected format has a representation.
    pub fn resolve(
        &self,
        manifest: &Manifest,
        spec: &PrefetchSpec,
        tracks: &SelectedFormats,
    ) -> Option<PrefetchPlan> {
        if tracks.is_empty() {
            log::debug!("No track is selected");
            return None;
        }
        let period_index = spec.period_index.min(manifest.period_count().checked_sub(1)?);
        let period = manifest.period(period_index)?;
        let period_duration_us = manifest.period_duration_us(period_index);

        let selected = [TrackType::Video, TrackType::Audio].map(|track_type| {
            (
                track_type,
                find_stream_key(period_index, period, track_type, tracks.get(track_type)),
            )
        });
        let stream_keys: Vec<StreamKey> = selected.iter().filter_map(|(_, key)| *key).collect();
        if stream_keys.is_empty() {
            log::debug!("No representation matches the selected tracks");
            return None;
        }

        let segment_duration_us = selected[0]
            .1
            .and_then(|key| representation(period, &key))
            .map(|rep| estimate_segment_duration_us(rep.index(), period_duration_us))
            .unwrap_or(DEFAULT_SEGMENT_DURATION_US);
        let threads = compute_threads(self.window_us(), segment_duration_us, self.max_threads);

        let mut resources = Vec::new();
        for (track_type, key) in selected.iter() {
            let Some(rep) = key.and_then(|key| representation(period, &key)) else {
                continue;
            };
            plan_representation(
                rep,
                *track_type,
                spec,
                period_duration_us,
                &mut resources,
            );
        }

        Some(PrefetchPlan {
            spec: spec.clone(),
            stream_keys,
            resources,
            threads,
            segment_duration_us,
        })
    }

    pub fn plan(&self, manifest: &Manifest, snapshot: &PlaybackSnapshot) -> Option<PrefetchPlan> {
        let spec = self.window(snapshot)?;
        self.resolve(manifest, &spec, &snapshot.tracks)
    }
}

fn plan_representation(
    rep: &Representation,
    track_type: TrackType,
    spec: &PrefetchSpec,
    period_duration_us: Option<u64>,
    resources: &mut Vec<PlannedResource>,
) {
    let quality_key = rep.format.quality_key(track_type);

    if let Some(initialization) = &rep.initialization {
        resources.push(PlannedResource {
            cache_key: rep.resolve_cache_key(initialization),
            uri: initialization.clone(),
            track_type,
            quality_key: quality_key.clone(),
            media_start_time_ms: None,
            media_end_time_ms: None,
        });
    }

    let index = rep.index();
    let first = index.segment_num(spec.start_us, period_duration_us);
    let last = index.segment_num(spec.end_us, period_duration_us);
    for segment_num in first..=last {
        let uri = match index.segment_url(segment_num) {
            Ok(uri) => uri,
            Err(e) => {
                log::debug!("Skipping segment {segment_num}: {e}");
                continue;
            }
        };
        let start_us = index.time_us(segment_num);
        let duration_us = index.duration_us(segment_num, period_duration_us);
        resources.push(PlannedResource {
            cache_key: rep.resolve_cache_key(&uri),
            uri,
            track_type,
            quality_key: quality_key.clone(),
            media_start_time_ms: Some(start_us / 1000),
            media_end_time_ms: Some((start_us + duration_us) / 1000),
        });
    }
}
