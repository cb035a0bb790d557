//! Error types for description parsing and the state-variable model.

use upnp_requester::RequesterError;

/// Errors raised while building or updating a device model.
#[derive(Debug, thiserror::Error)]
pub enum DescriptionError {
    /// The HTTP request for a description document failed
    #[error("Request failed: {0}")]
    Request(#[from] RequesterError),

    /// A description document was answered with a status other than 200
    #[error("Unexpected HTTP status {status} for {url}")]
    Response {
        /// HTTP status code
        status: u16,
        /// URL that was requested
        url: String,
    },

    /// The document is not well-formed XML
    #[error("Unable to parse XML from {url}: {reason}")]
    XmlParse {
        /// URL the document came from
        url: String,
        /// Parser message
        reason: String,
    },

    /// The document parsed but lacks a required element
    #[error("Invalid XML content: {0}")]
    XmlContent(String),

    /// A state variable declares a data type with no coercion rule
    #[error("Unsupported data type {data_type:?} for state variable {name:?}")]
    UnsupportedDataType {
        /// State variable name
        name: String,
        /// Declared data type, empty when missing
        data_type: String,
    },

    /// A value failed coercion or validation
    #[error("Invalid value {value:?} for {name}: {reason}")]
    InvalidValue {
        /// State variable name
        name: String,
        /// Offending value in UPnP string form
        value: String,
        /// Which check failed
        reason: String,
    },

    /// A URL could not be parsed or joined
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl DescriptionError {
    /// True for timeouts and connection failures.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, DescriptionError::Request(e) if e.is_connectivity())
    }

    /// True when the device answered with a non-success status.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            DescriptionError::Response { .. } | DescriptionError::Request(RequesterError::Response { .. })
        )
    }
}

/// Convenience Result type alias for description operations.
pub type Result<T> = std::result::Result<T, DescriptionError>;
