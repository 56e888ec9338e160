#![forbid(unsafe_code)]

use reqwest::Error as ReqwestError;
use thiserror::Error;
use url::Url;

pub type NetResult<T> = Result<T, NetError>;

/// Loader error surface.
#[derive(Debug, Error, Clone)]
pub enum NetError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("timeout")]
    Timeout,

    #[error("HTTP {status} for {url}")]
    Http {
        status: u16,
        url: Url,
    },

    #[error("request failed after {max_retries} retries: {source}")]
    RetryExhausted { max_retries: u32, source: Box<Self> },

    #[error("segment has no reachable URL")]
    NoUrl,

    #[error("aborted")]
    Aborted,
}

impl NetError {
    /// Whether this failure is an HTTP response with the given status.
    #[must_use]
    pub fn is_http_error(&self, status: u16) -> bool {
        matches!(self, Self::Http { status: s, .. } if *s == status)
    }

    /// HTTP status carried by this failure, if any.
    #[must_use]
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::RetryExhausted { source, .. } => source.http_status(),
            _ => None,
        }
    }

    /// Whether retrying the request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            Self::RetryExhausted { .. } | Self::NoUrl | Self::Aborted => false,
        }
    }
}

impl From<ReqwestError> for NetError {
    fn from(e: ReqwestError) -> Self {
        if e.is_timeout() {
            return Self::Timeout;
        }
        // Alternate formatting includes the full source chain.
        Self::Transport(format!("{e:#}"))
    }
}
