//! Error types for mergebot-rs.
//!
//! Lookups that can legitimately come back empty return `Result<Option<T>>`:
//! `Ok(None)` is an expected miss, `Err` is infrastructure trouble.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("nothing to do: {0}")]
    EmptyBatch(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api error {status}: {body}")]
    Api {
        status: u16,
        body: String,
        /// Server-requested delay before the next attempt.
        retry_after: Option<std::time::Duration>,
    },

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn api(status: u16, body: impl Into<String>) -> Self {
        Error::Api {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    /// Whether the adapter's retry policy should try the call again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Api { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// A 429: the server refused the request without applying it.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::Api { status: 429, .. })
    }

    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Error::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Run-level aborts that happen before any write is attempted.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Error::Config(_) | Error::EmptyBatch(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
