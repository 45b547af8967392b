use url::Url;

use super::{RangedUri, SegmentIndex};
use crate::{dash::template::Template, ReadaheadError, ReadaheadResult};

const MICROS_PER_SECOND: u128 = 1_000_000;

/// Index of a `SegmentTemplate` addressed by `@duration` and `$Number$`.
#[derive(Debug, Clone)]
pub struct TemplateIndex {
    /// Absolute media URL template.
    media: String,
    representation_id: Option<String>,
    bandwidth: Option<u64>,
    start_number: u64,
    timescale: u64,
    /// Segment duration in timescale units.
    duration: u64,
    presentation_time_offset: u64,
}

impl TemplateIndex {
    pub fn new(media: impl Into<String>, start_number: u64, timescale: u64, duration: u64) -> Self {
        Self {
            media: media.into(),
            representation_id: None,
            bandwidth: None,
            start_number,
            timescale: timescale.max(1),
            duration: duration.max(1),
            presentation_time_offset: 0,
        }
    }

    pub fn with_representation(mut self, id: Option<String>, bandwidth: Option<u64>) -> Self {
        self.representation_id = id;
        self.bandwidth = bandwidth;
        self
    }

    pub fn with_presentation_time_offset(mut self, presentation_time_offset: u64) -> Self {
        self.presentation_time_offset = presentation_time_offset;
        self
    }

    fn ticks_to_us(&self, ticks: u64) -> u64 {
        (ticks as u128 * MICROS_PER_SECOND / self.timescale as u128) as u64
    }

    fn segment_duration_us(&self) -> u64 {
        self.ticks_to_us(self.duration).max(1)
    }

    fn offset_of(&self, segment_num: u64) -> u64 {
        segment_num.saturating_sub(self.start_number)
    }
}

impl SegmentIndex for TemplateIndex {
    fn segment_count(&self, period_duration_us: Option<u64>) -> Option<u64> {
        let period_duration_us = period_duration_us?;
        Some(period_duration_us.div_ceil(self.segment_duration_us()))
    }

    fn segment_num(&self, time_us: u64, period_duration_us: Option<u64>) -> u64 {
        let mut offset = time_us / self.segment_duration_us();
        if let Some(count) = self.segment_count(period_duration_us) {
            offset = offset.min(count.saturating_sub(1));
        }
        self.start_number + offset
    }

    fn time_us(&self, segment_num: u64) -> u64 {
        self.ticks_to_us(self.offset_of(segment_num) * self.duration)
    }

    fn duration_us(&self, segment_num: u64, period_duration_us: Option<u64>) -> u64 {
        let duration = self.segment_duration_us();
        match (self.segment_count(period_duration_us), period_duration_us) {
            (Some(count), Some(period_duration_us))
                if count > 0 && self.offset_of(segment_num) == count - 1 =>
            {
                period_duration_us.saturating_sub(self.time_us(segment_num))
            }
            _ => duration,
        }
    }

    fn segment_url(&self, segment_num: u64) -> ReadaheadResult<RangedUri> {
        let mut template = Template::new();
        if let Some(id) = &self.representation_id {
            template.insert(Template::REPRESENTATION_ID, id.clone());
        }
        if let Some(bandwidth) = self.bandwidth {
            template.insert(Template::BANDWIDTH, bandwidth.to_string());
        }
        template.insert(Template::NUMBER, segment_num.to_string());
        let time = self.presentation_time_offset + self.offset_of(segment_num) * self.duration;
        template.insert(Template::TIME, time.to_string());

        let url = Url::parse(&template.resolve(&self.media))?;
        Ok(RangedUri::new(url, None))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSegment {
    pub start_us: u64,
    pub duration_us: u64,
    pub uri: RangedUri,
}

/// Index over an explicit list of segments, e.g. an expanded `SegmentTimeline`.
#[derive(Debug, Clone)]
pub struct ListIndex {
    start_number: u64,
    segments: Vec<ListSegment>,
}

impl ListIndex {
    /// `segments` must be sorted by start time.
    pub fn new(start_number: u64, segments: Vec<ListSegment>) -> Self {
        Self {
            start_number,
            segments,
        }
    }

    fn get(&self, segment_num: u64) -> Option<&ListSegment> {
        let position = segment_num.saturating_sub(self.start_number) as usize;
        self.segments
            .get(position)
            .or_else(|| self.segments.last())
    }
}

impl SegmentIndex for ListIndex {
    fn segment_count(&self, _period_duration_us: Option<u64>) -> Option<u64> {
        Some(self.segments.len() as u64)
    }

    fn segment_num(&self, time_us: u64, _period_duration_us: Option<u64>) -> u64 {
        // the last segment starting at or before `time_us`
        let position = self
            .segments
            .partition_point(|segment| segment.start_us <= time_us)
            .saturating_sub(1);
        self.start_number + position as u64
    }

    fn time_us(&self, segment_num: u64) -> u64 {
        self.get(segment_num).map(|s| s.start_us).unwrap_or_default()
    }

    fn duration_us(&self, segment_num: u64, _period_duration_us: Option<u64>) -> u64 {
        self.get(segment_num)
            .map(|s| s.duration_us)
            .unwrap_or_default()
    }

    fn segment_url(&self, segment_num: u64) -> ReadaheadResult<RangedUri> {
        self.get(segment_num)
            .map(|s| s.uri.clone())
            .ok_or_else(|| ReadaheadError::MpdParsing("Segment list is empty".to_string()))
    }
}
