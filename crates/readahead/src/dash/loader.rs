use std::{sync::Arc, time::Duration};

use reqwest::header::ACCEPT;
use url::Url;

use super::{
    template::Template,
    url::{merge_baseurls, nested_base_url},
};
use crate::{
    manifest::{
        AdaptationSet, ListIndex, ListSegment, Manifest, ManifestLoader, Period, RangedUri,
        Representation, SegmentIndex, TemplateIndex,
    },
    player::{Format, TrackType},
    util::{http::HttpClient, range::ByteRange},
    ReadaheadError, ReadaheadResult,
};

const MICROS_PER_SECOND: u128 = 1_000_000;
/// Upper bound of segments expanded from one `SegmentTimeline`.
const MAX_TIMELINE_SEGMENTS: usize = 65_536;
const MPD_ACCEPT: &str = "application/dash+xml,video/vnd.mpeg.dash.mpd";

#[derive(Clone, Default)]
pub struct MpdManifestLoader {
    client: HttpClient,
}

impl MpdManifestLoader {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    /// Maps an MPD document onto the manifest model. Relative URLs resolve against `url`.
    pub fn parse(text: &str, url: &Url) -> ReadaheadResult<Manifest> {
        let mpd = dash_mpd::parse(text)?;
        let base_url = nested_base_url(url, &mpd.base_url)?;
        let presentation_duration_us = mpd.mediaPresentationDuration.map(to_us);

        let mut starts = Vec::with_capacity(mpd.periods.len());
        let mut previous_end = Some(0);
        for period in mpd.periods.iter() {
            let start = period.start.map(to_us).or(previous_end).unwrap_or_default();
            previous_end = period.duration.map(|duration| start + to_us(duration));
            starts.push(start);
        }

        let mut periods = Vec::with_capacity(mpd.periods.len());
        for (index, period) in mpd.periods.iter().enumerate() {
            let start_us = starts[index];
            let duration_us = period
                .duration
                .map(to_us)
                .or_else(|| {
                    mpd.periods
                        .get(index + 1)
                        .and_then(|next| next.start)
                        .map(|next| to_us(next).saturating_sub(start_us))
                })
                .or_else(|| presentation_duration_us.map(|total| total.saturating_sub(start_us)));

            let period_base_url = nested_base_url(&base_url, &period.BaseURL)?;
            let mut adaptation_sets = Vec::with_capacity(period.adaptations.len());
            for adaptation in period.adaptations.iter() {
                adaptation_sets.push(map_adaptation_set(
                    &period_base_url,
                    adaptation,
                    duration_us,
                )?);
            }

            periods.push(Period {
                id: period.id.clone(),
                start_us,
                duration_us,
                adaptation_sets,
            });
        }

        if periods.is_empty() {
            return Err(ReadaheadError::EmptyManifest);
        }
        Ok(Manifest { periods })
    }
}

impl ManifestLoader for MpdManifestLoader {
    async fn load_manifest(&self, uri: &str) -> ReadaheadResult<Manifest> {
        let url = Url::parse(uri)?;
        let response = self
            .client
            .get(url)
            .header(ACCEPT, MPD_ACCEPT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ReadaheadError::HttpError(response.status()));
        }

        // relative urls resolve against the final location after redirects
        let url = response.url().clone();
        let text = response.text().await?;
        Self::parse(&text, &url)
    }
}

fn to_us(duration: Duration) -> u64 {
    duration.as_micros() as u64
}

fn map_adaptation_set(
    base_url: &Url,
    adaptation: &dash_mpd::AdaptationSet,
    period_duration_us: Option<u64>,
) -> ReadaheadResult<AdaptationSet> {
    let base_url = nested_base_url(base_url, &adaptation.BaseURL)?;
    let track_type = TrackType::from_mime_type(
        adaptation
            .contentType
            .as_deref()
            .or(adaptation.mimeType.as_deref())
            .or_else(|| {
                adaptation
                    .representations
                    .iter()
                    .find_map(|r| r.mimeType.as_deref())
            }),
    );

    let mut representations = Vec::with_capacity(adaptation.representations.len());
    for representation in adaptation.representations.iter() {
        match map_representation(&base_url, adaptation, representation, period_duration_us)? {
            Some(representation) => representations.push(representation),
            None => log::debug!(
                "Skipping representation {:?}: unsupported segment addressing",
                representation.id
            ),
        }
    }

    Ok(AdaptationSet {
        track_type,
        representations,
    })
}

fn map_representation(
    base_url: &Url,
    adaptation: &dash_mpd::AdaptationSet,
    representation: &dash_mpd::Representation,
    period_duration_us: Option<u64>,
) -> ReadaheadResult<Option<Representation>> {
    let Some(template) = representation
        .SegmentTemplate
        .as_ref()
        .or(adaptation.SegmentTemplate.as_ref())
    else {
        return Ok(None);
    };

    let base_url = nested_base_url(base_url, &representation.BaseURL)?;
    let media = template.media.as_deref().ok_or_else(|| {
        ReadaheadError::MpdParsing("Missing media url template in representation".to_string())
    })?;
    let media = merge_baseurls(&base_url, media)?.to_string();

    let mut params = Template::new();
    if let Some(id) = &representation.id {
        params.insert(Template::REPRESENTATION_ID, id.clone());
    }
    if let Some(bandwidth) = representation.bandwidth {
        params.insert(Template::BANDWIDTH, bandwidth.to_string());
    }

    let initialization = match (&template.initialization, &template.Initialization) {
        (Some(initialization), _) => Some(RangedUri::new(
            merge_baseurls(&base_url, &params.resolve(initialization))?,
            None,
        )),
        (None, Some(element)) => {
            let url = match &element.sourceURL {
                Some(source) => merge_baseurls(&base_url, &params.resolve(source))?,
                None => base_url.clone(),
            };
            let range = element.range.as_deref().map(ByteRange::parse).transpose()?;
            Some(RangedUri::new(url, range))
        }
        (None, None) => None,
    };

    let start_number = template.startNumber.unwrap_or(1);
    let timescale = template.timescale.unwrap_or(1).max(1);
    let presentation_time_offset = template.presentationTimeOffset.unwrap_or(0);

    let index: Arc<dyn SegmentIndex> = if let Some(timeline) = &template.SegmentTimeline {
        let segments = expand_timeline(
            timeline,
            &params,
            &media,
            start_number,
            timescale,
            presentation_time_offset,
            period_duration_us,
        )?;
        Arc::new(ListIndex::new(start_number, segments))
    } else {
        let duration = template.duration.ok_or_else(|| {
            ReadaheadError::MpdParsing("Missing duration in SegmentTemplate".to_string())
        })?;
        Arc::new(
            TemplateIndex::new(media, start_number, timescale, duration.round() as u64)
                .with_representation(representation.id.clone(), representation.bandwidth)
                .with_presentation_time_offset(presentation_time_offset),
        )
    };

    Ok(Some(Representation {
        format: Format {
            id: representation.id.clone(),
            bitrate: representation.bandwidth,
            width: representation.width,
            height: representation.height,
            mime_type: representation
                .mimeType
                .clone()
                .or_else(|| adaptation.mimeType.clone()),
            language: representation.lang.clone().or_else(|| adaptation.lang.clone()),
        },
        cache_key: None,
        initialization,
        index,
    }))
}

fn expand_timeline(
    timeline: &dash_mpd::SegmentTimeline,
    params: &Template,
    media: &str,
    start_number: u64,
    timescale: u64,
    presentation_time_offset: u64,
    period_duration_us: Option<u64>,
) -> ReadaheadResult<Vec<ListSegment>> {
    let timescale = timescale as u128;
    let period_end = period_duration_us.map(|duration| {
        let ticks = (duration as u128 * timescale / MICROS_PER_SECOND).min(u64::MAX as u128) as u64;
        presentation_time_offset.saturating_add(ticks)
    });
    let to_us = |ticks: u64| (ticks as u128 * MICROS_PER_SECOND / timescale) as u64;

    let mut segments = Vec::new();
    let mut time: u64 = 0;
    let mut number = start_number;
    for (i, entry) in timeline.segments.iter().enumerate() {
        if let Some(t) = entry.t {
            time = t;
        }
        let duration = entry.d.max(1);
        let repeat = match entry.r {
            // repeat until the next explicit start or the end of the period
            Some(r) if r < 0 => {
                let until = timeline
                    .segments
                    .get(i + 1)
                    .and_then(|next| next.t)
                    .or(period_end)
                    .unwrap_or_else(|| time.saturating_add(duration));
                until.saturating_sub(time).div_ceil(duration).saturating_sub(1)
            }
            Some(r) => r as u64,
            None => 0,
        };

        for _ in 0..=repeat {
            if segments.len() >= MAX_TIMELINE_SEGMENTS {
                log::warn!("SegmentTimeline truncated to {MAX_TIMELINE_SEGMENTS} segments");
                return Ok(segments);
            }

            let mut params = params.clone();
            params.insert(Template::TIME, time.to_string());
            params.insert(Template::NUMBER, number.to_string());
            segments.push(ListSegment {
                start_us: to_us(time.saturating_sub(presentation_time_offset)),
                duration_us: to_us(duration),
                uri: RangedUri::new(Url::parse(&params.resolve(media))?, None),
            });

            match (time.checked_add(duration), number.checked_add(1)) {
                (Some(next_time), Some(next_number)) => {
                    time = next_time;
                    number = next_number;
                }
                _ => {
                    log::warn!("SegmentTimeline overflows at segment {number}");
                    return Ok(segments);
                }
            }
        }
    }
    Ok(segments)
}
