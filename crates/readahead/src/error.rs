use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReadaheadError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    // MPEG-DASH errors
    #[error(transparent)]
    MpdParseError(#[from] dash_mpd::DashMpdError),

    #[error("Invalid MPD: {0}")]
    MpdParsing(String),

    #[error("Manifest does not contain any period")]
    EmptyManifest,

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    #[error("Prefetch cancelled")]
    Cancelled,

    #[error("Worker pool has been shut down")]
    PoolShutdown,

    #[error("Cache region has been released: {0}")]
    CacheReleased(std::path::PathBuf),
}

impl ReadaheadError {
    /// Cancellation is the only error the orchestrator propagates instead of logging.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::PoolShutdown)
    }
}

pub type ReadaheadResult<T> = Result<T, ReadaheadError>;
