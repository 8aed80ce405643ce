//! Fetch and extraction failures.

use thiserror::Error;

/// How the scheduler should treat a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transient; retried inside the fetch and backed off afterwards.
    Retry,
    /// Transient but not worth an immediate retry.
    Fail,
    /// Permanent; the target is disabled.
    Reject,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("connection to {url} failed: {message}")]
    Connection { url: String, message: String },
    #[error("{url} returned HTTP {status}")]
    Http { url: String, status: u16 },
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("robots.txt disallows {url}")]
    Disallowed { url: String },
    #[error("{url} body exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },
    #[error("failed to read body of {url}: {message}")]
    Body { url: String, message: String },
}

impl FetchError {
    pub fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout { url: url.to_string() }
        } else if let Some(status) = e.status() {
            FetchError::Http { url: url.to_string(), status: status.as_u16() }
        } else if e.is_body() || e.is_decode() {
            FetchError::Body { url: url.to_string(), message: e.to_string() }
        } else {
            FetchError::Connection { url: url.to_string(), message: e.to_string() }
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            FetchError::Timeout { .. } | FetchError::Connection { .. } => Disposition::Retry,
            FetchError::Http { status, .. } => match *status {
                429 | 500..=599 => Disposition::Retry,
                400..=499 => Disposition::Reject,
                _ => Disposition::Fail,
            },
            FetchError::InvalidUrl { .. }
            | FetchError::Disallowed { .. }
            | FetchError::TooLarge { .. } => Disposition::Reject,
            FetchError::Body { .. } => Disposition::Fail,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.disposition() == Disposition::Retry
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty payload")]
    Empty,
    #[error("no readable content in {url}")]
    NoContent { url: String },
    #[error("malformed {kind} payload: {reason}")]
    Malformed { kind: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> FetchError {
        FetchError::Http { url: "u".into(), status }
    }

    #[test]
    fn status_classes() {
        assert_eq!(http(503).disposition(), Disposition::Retry);
        assert_eq!(http(429).disposition(), Disposition::Retry);
        assert_eq!(http(404).disposition(), Disposition::Reject);
        assert_eq!(http(410).disposition(), Disposition::Reject);
        assert_eq!(http(304).disposition(), Disposition::Fail);
        assert!(FetchError::Timeout { url: "u".into() }.is_retryable());
        let invalid = FetchError::InvalidUrl { url: "u".into(), reason: "r".into() };
        assert_eq!(invalid.disposition(), Disposition::Reject);
    }
}
