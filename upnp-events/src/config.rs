//! Configuration types for the upnp-events crate
//!
//! [`EventConfig`] controls the callback server port, subscription timeouts,
//! the NOTIFY backlog and how the resubscription loop reports failures.

use std::time::Duration;

use crate::error::{EventError, Result};

/// Configuration for event handlers and profile devices
#[derive(Debug, Clone)]
pub struct EventConfig {
    /// Port range for the callback server
    /// Default: (0, 0), an OS-assigned port
    pub callback_port_range: (u16, u16),

    /// Timeout requested by profile devices when (re)subscribing
    /// Default: 9 minutes
    pub subscribe_timeout: Duration,

    /// How long before a subscription expires it gets renewed
    /// Default: 60 seconds
    pub resubscribe_tolerance: Duration,

    /// Maximum number of NOTIFY requests kept for not yet known SIDs
    /// Default: 64
    pub backlog_capacity: usize,

    /// Report resubscription failures through `on_event` instead of stopping the loop
    /// Default: true
    pub notify_errors: bool,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            callback_port_range: (0, 0),
            subscribe_timeout: Duration::from_secs(9 * 60),
            resubscribe_tolerance: Duration::from_secs(60),
            backlog_capacity: 64,
            notify_errors: true,
        }
    }
}

impl EventConfig {
    /// Timeout used by `EventHandler::subscribe` when none is given
    pub const DEFAULT_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(1800);

    /// Create a new EventConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Short-lived subscriptions, renewed often
    pub fn short_lived() -> Self {
        Self {
            subscribe_timeout: Duration::from_secs(120),
            resubscribe_tolerance: Duration::from_secs(30),
            ..Default::default()
        }
    }

    /// Stop the resubscription loop on the first failure
    pub fn fail_fast() -> Self {
        Self {
            notify_errors: false,
            ..Default::default()
        }
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        let (start, end) = self.callback_port_range;
        if (start, end) != (0, 0) && (start == 0 || start > end) {
            return Err(EventError::Configuration(
                "Invalid callback port range: start must be non-zero and not greater than end"
                    .to_string(),
            ));
        }

        if self.subscribe_timeout.is_zero() {
            return Err(EventError::Configuration(
                "Subscribe timeout must be greater than 0".to_string(),
            ));
        }

        if self.resubscribe_tolerance >= self.subscribe_timeout {
            return Err(EventError::Configuration(
                "Resubscribe tolerance must be less than the subscribe timeout".to_string(),
            ));
        }

        if self.backlog_capacity == 0 {
            return Err(EventError::Configuration(
                "Backlog capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_callback_ports(mut self, start: u16, end: u16) -> Self {
        self.callback_port_range = (start, end);
        self
    }

    pub fn with_subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    pub fn with_resubscribe_tolerance(mut self, tolerance: Duration) -> Self {
        self.resubscribe_tolerance = tolerance;
        self
    }

    pub fn with_backlog_capacity(mut self, capacity: usize) -> Self {
        self.backlog_capacity = capacity;
        self
    }

    pub fn with_notify_errors(mut self, enabled: bool) -> Self {
        self.notify_errors = enabled;
        self
    }
}
