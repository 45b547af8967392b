/// An issued prefetch request: which range, of which selected qualities, in which period.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrefetchSpec {
    pub media_id: String,
    pub video_key: Option<String>,
    pub audio_key: Option<String>,
    pub period_index: usize,
    pub start_us: u64,
    pub end_us: u64,
}

impl PrefetchSpec {
    /// `end_us` is raised to `start_us` if it lies before it.
    pub fn new(
        media_id: impl Into<String>,
        video_key: Option<String>,
        audio_key: Option<String>,
        period_index: usize,
        start_us: u64,
        end_us: u64,
    ) -> Self {
        Self {
            media_id: media_id.into(),
            video_key,
            audio_key,
            period_index,
            start_us,
            end_us: end_us.max(start_us),
        }
    }

    pub fn duration_us(&self) -> u64 {
        self.end_us - self.start_us
    }

    /// Whether `other` asks for nothing this request did not already ask for.
    ///
    /// Pure containment: a wider `other` is never covered, however much it overlaps.
    pub fn covers(&self, other: &PrefetchSpec) -> bool {
        self.media_id == other.media_id
            && self.video_key == other.video_key
            && self.audio_key == other.audio_key
            && self.period_index == other.period_index
            && other.start_us >= self.start_us
            && other.end_us <= self.end_us
    }
}
