use thiserror::Error;

pub type NetResult<T> = Result<T, NetError>;

/// Centralized error type for `rill-net`.
#[derive(Debug, Error, Clone)]
pub enum NetError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Timeout")]
    Timeout,

    #[error("HTTP {status} for URL: {url}")]
    HttpStatus { status: u16, url: String },
}

impl NetError {
    /// Status code of the response, if the server answered at all.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::Http(_) | Self::Timeout => None,
        }
    }
}

impl From<reqwest::Error> for NetError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout;
        }
        // Alternate formatting includes the full error chain
        // (e.g. "error sending request … : connection refused").
        Self::Http(format!("{e:#}"))
    }
}
