use crate::Outcome;

/// Everything that can go wrong while attempting one request. The publishing
/// loop never matches on message strings; it switches on [`Error::outcome`].
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// Policy skip, not a failure: the item was served too recently.
    #[error("catalog item was served recently")]
    RestingMovie,

    #[error("user is blocked")]
    BlockedUser,

    #[error("request exceeds the content-length caps")]
    TooLongRequest,

    /// A banned term in the request. The user is blocked going forward.
    #[error("offensive term detected in request")]
    OffensiveRequest,

    #[error("disallowed content detected by the safety gate")]
    NsfwContent,

    #[error("no match found: {0}")]
    NotFound(String),

    #[error("metadata commands take exactly one keyword")]
    BadKeywords,

    /// Missing or corrupt media. The request is left unused and retried on a
    /// later run against the next backlog entry.
    #[error("media access failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("decoder timed out after {0}ms")]
    Timeout(u64),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("transport error: {0}")]
    Http(String),

    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("stored request is malformed: {0}")]
    Json(#[from] serde_json::Error),

    /// Credential-level transport fault. Nothing else in the backlog can
    /// succeed, so the whole run terminates.
    #[error("publish credentials rejected: {0}")]
    FatalTransport(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl Error {
    /// Terminal classification driving bookkeeping and notification.
    pub(crate) fn outcome(&self) -> Outcome {
        match self {
            Self::RestingMovie => Outcome::RestingMovie,
            Self::BlockedUser => Outcome::BlockedUser,
            Self::TooLongRequest => Outcome::TooLong,
            Self::NsfwContent => Outcome::NsfwRejected,
            Self::Io(_) | Self::Timeout(_) => Outcome::TransientIo,
            Self::OffensiveRequest
            | Self::NotFound(_)
            | Self::BadKeywords
            | Self::Sqlite(_)
            | Self::Http(_)
            | Self::Image(_)
            | Self::Json(_)
            | Self::FatalTransport(_) => Outcome::GenericFailure,
        }
    }

    /// Whether this failure counts toward the circuit breaker. Policy
    /// rejections cost no external calls and are free; media faults and
    /// unclassified errors are the signal of a systemic outage.
    pub(crate) fn counts_toward_breaker(&self) -> bool {
        matches!(self.outcome(), Outcome::TransientIo | Outcome::GenericFailure)
            && !matches!(self, Self::FatalTransport(_))
    }
}

pub(crate) type Result<T> = std::result::Result<T, Error>;
