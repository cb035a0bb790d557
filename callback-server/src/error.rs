//! Error types for the callback server.

/// Errors raised while binding, starting or stopping the server.
#[derive(Debug, thiserror::Error)]
pub enum CallbackServerError {
    /// Every port in the configured range is taken
    #[error("No available port found in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },

    /// The local address used to reach the target could not be determined
    #[error("Failed to detect local IP address: {0}")]
    LocalIp(String),

    /// The HTTP listener could not be started
    #[error("Failed to start server: {0}")]
    Startup(String),

    /// `start` was called on a running server
    #[error("Server is already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, CallbackServerError>;
