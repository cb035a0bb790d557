//! Error types for the requester

use reqwest::header::HeaderMap;
use thiserror::Error;

/// Errors that can occur while performing an HTTP request against a device
#[derive(Debug, Error)]
pub enum RequesterError {
    /// The request did not complete within the configured timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The device could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// The device answered with a non-success status
    #[error("Unexpected HTTP status {status}")]
    Response {
        status: u16,
        headers: HeaderMap,
        body: Option<String>,
    },

    /// The request could not be built (bad method, bad URL)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl RequesterError {
    /// True for timeouts and connection failures, i.e. the device looks offline.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connection(_))
    }

    /// Status code carried by a `Response` error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Response { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(RequesterError::Timeout("slow".into()).is_connectivity());
        assert!(RequesterError::Connection("refused".into()).is_connectivity());
        assert!(!RequesterError::InvalidRequest("bad".into()).is_connectivity());

        let error = RequesterError::Response {
            status: 412,
            headers: HeaderMap::new(),
            body: None,
        };
        assert!(!error.is_connectivity());
        assert_eq!(error.status(), Some(412));
        assert_eq!(error.to_string(), "Unexpected HTTP status 412");
    }
}
