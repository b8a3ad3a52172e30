//! Fetch error types.
//!
//! Transport faults (timeouts, refused connections) are errors here. Ordinary
//! HTTP outcomes, including retryable statuses like 429 or 503, are returned
//! as `HttpResponse` values and only become `FetchError::Status` once the
//! orchestrator gives up on them.

use thiserror::Error;

/// Errors produced while fetching a resource.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error("Fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether this failure is worth retrying (timeouts and connection failures).
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Timeout(_) | FetchError::Connect(_))
    }

    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else if e.is_connect() {
            FetchError::Connect(e.to_string())
        } else if e.is_builder() {
            FetchError::InvalidUrl(e.to_string())
        } else {
            FetchError::Request(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::Timeout("read".into()).is_transient());
        assert!(FetchError::Connect("refused".into()).is_transient());
        assert!(!FetchError::Request("bad body".into()).is_transient());
        assert!(!FetchError::Cancelled.is_transient());
        assert!(!FetchError::Status {
            status: 503,
            url: "https://example.com".into()
        }
        .is_transient());
    }

    #[test]
    fn test_status_accessor() {
        let err = FetchError::Status {
            status: 404,
            url: "https://example.com/missing".into(),
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "HTTP 404 from https://example.com/missing");
        assert_eq!(FetchError::Cancelled.status(), None);
    }
}
