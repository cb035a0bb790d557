//! Error types for the upnp-events crate.

use upnp_requester::{HeaderMap, RequesterError};

/// Errors raised by subscription management.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The HTTP request to the device failed
    #[error("Request failed: {0}")]
    Request(#[from] RequesterError),

    /// The device answered a (RE/UN)SUBSCRIBE with a status other than 200
    #[error("Device responded with HTTP status {status}")]
    Response {
        /// HTTP status code
        status: u16,
        /// Response headers, kept for inspection by the caller
        headers: HeaderMap,
    },

    /// The device accepted a SUBSCRIBE without issuing a SID
    #[error("No SID received for subscription to {0}")]
    Sid(String),

    /// Neither the service nor the SID is known to the event handler
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(String),

    /// A NOTIFY body is not a property set
    #[error("Unable to parse NOTIFY body: {0}")]
    XmlParse(String),

    /// An SSDP search failed
    #[error("Discovery failed: {0}")]
    Discovery(#[from] upnp_discovery::DiscoveryError),

    /// The callback server could not be created or started
    #[error("Callback server error: {0}")]
    CallbackServer(String),

    /// A background task did not shut down cleanly
    #[error("Shutdown error: {0}")]
    Shutdown(String),

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl EventError {
    /// True for timeouts and connection failures, i.e. the device is likely offline.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, EventError::Request(e) if e.is_connectivity())
    }

    /// True when the device answered with a non-success status.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            EventError::Response { .. } | EventError::Request(RequesterError::Response { .. })
        )
    }
}

impl From<callback_server::CallbackServerError> for EventError {
    fn from(error: callback_server::CallbackServerError) -> Self {
        EventError::CallbackServer(error.to_string())
    }
}

/// Convenience type alias for Results using EventError.
pub type Result<T> = std::result::Result<T, EventError>;
