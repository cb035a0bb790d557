//! Error types for the discovery system.

use std::fmt;

/// Error type for discovery operations.
///
/// Invalid datagrams are never reported through this type; they are dropped
/// at the codec boundary. Only socket setup and address problems surface.
#[derive(Debug)]
pub enum DiscoveryError {
    /// Socket creation, option, bind or send failures
    Network(std::io::Error),
    /// Unusable source/target combination (family mismatch, missing IPv6 scope id)
    InvalidAddress(String),
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryError::Network(err) => write!(f, "Network error: {}", err),
            DiscoveryError::InvalidAddress(msg) => write!(f, "Invalid address: {}", msg),
        }
    }
}

impl std::error::Error for DiscoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiscoveryError::Network(err) => Some(err),
            DiscoveryError::InvalidAddress(_) => None,
        }
    }
}

impl From<std::io::Error> for DiscoveryError {
    fn from(err: std::io::Error) -> Self {
        DiscoveryError::Network(err)
    }
}

/// Convenience Result type alias for discovery operations.
///
/// Equivalent to `std::result::Result<T, DiscoveryError>`.
pub type Result<T> = std::result::Result<T, DiscoveryError>;
