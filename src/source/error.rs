//! Error types for item sources.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while fetching the item list.
///
/// Transient errors are retried with backoff by the source itself; once the
/// retry budget is spent they escalate to [`FetchError::RetriesExhausted`],
/// which is permanent.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The API answered 429 Too Many Requests - retryable.
    #[error("rate limited by the list API")]
    RateLimited { retry_after: Option<Duration> },

    /// HTTP/network error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Any non-success status other than 429 - permanent.
    #[error("list API responded with status {status}")]
    Status { status: u16 },

    /// Response body could not be parsed.
    #[error("could not parse list data: {0}")]
    Parse(String),

    /// Response parsed but held no items.
    #[error("no items found: {0}")]
    MissingData(String),

    /// The source identifier (username) is unusable.
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// Local file source could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Transient failures kept happening until the retry budget ran out.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl FetchError {
    /// Whether this error is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { .. } => false,
            Self::Parse(_) => false,
            Self::MissingData(_) => false,
            Self::InvalidSource(_) => false,
            Self::Io(_) => false,
            Self::RetriesExhausted { .. } => false,
        }
    }

    /// Permanent errors surface to the user as "could not load".
    pub fn is_permanent(&self) -> bool {
        !self.is_retryable()
    }

    /// Get a short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Http(_) => "http_error",
            Self::Status { .. } => "bad_status",
            Self::Parse(_) => "parse_error",
            Self::MissingData(_) => "missing_data",
            Self::InvalidSource(_) => "invalid_source",
            Self::Io(_) => "io_error",
            Self::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}
