//! Application error types with rich context

use thiserror::Error;

use crate::delivery::Channel;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Broad error families used for routing and reporting.
///
/// Every [`Error`] variant belongs to exactly one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Radio link problems, recovered by the reconnection loop
    Link,
    /// Wire protocol problems, never fatal
    Protocol,
    /// Per-channel delivery failures, retried then recorded
    Delivery,
    /// Event store / policy repository failures
    Storage,
    /// Configuration file problems
    Config,
    /// Plumbing between tasks, I/O and serialization
    Internal,
}

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    // ─────────────────────────────────────────────────────────────
    // Link Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Radio permissions have not been granted")]
    PermissionDenied,

    #[error("Radio is disabled. Enable Bluetooth to connect to the wearable.")]
    RadioDisabled,

    #[error("No paired device with address: {address}")]
    DeviceNotFound { address: String },

    #[error("Timed out connecting to {address} after {timeout_secs}s")]
    ConnectTimeout { address: String, timeout_secs: u64 },

    #[error("Not connected to a device")]
    NotConnected,

    #[error("Cannot {operation} while link is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: String,
    },

    #[error("Link to device lost")]
    LinkLost,

    #[error("Link error: {message}")]
    Link { message: String },

    // ─────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Wire protocol error: {message}")]
    Protocol { message: String },

    // ─────────────────────────────────────────────────────────────
    // Delivery Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Delivery via {channel} failed: {reason}")]
    Delivery { channel: Channel, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Storage Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Event store error: {message}")]
    Storage { message: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel send error: {message}")]
    ChannelSend { message: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("A check-in is already awaiting acknowledgement")]
    CheckInInProgress,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn link(message: impl Into<String>) -> Self {
        Self::Link {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn delivery(channel: Channel, reason: impl Into<String>) -> Self {
        Self::Delivery {
            channel,
            reason: reason.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn channel_send(message: impl Into<String>) -> Self {
        Self::ChannelSend {
            message: message.into(),
        }
    }

    pub fn device_not_found(address: impl Into<String>) -> Self {
        Self::DeviceNotFound {
            address: address.into(),
        }
    }

    pub fn invalid_transition(operation: &'static str, state: impl ToString) -> Self {
        Self::InvalidTransition {
            operation,
            state: state.to_string(),
        }
    }

    /// The error family this error belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::PermissionDenied
            | Error::RadioDisabled
            | Error::DeviceNotFound { .. }
            | Error::ConnectTimeout { .. }
            | Error::NotConnected
            | Error::InvalidTransition { .. }
            | Error::LinkLost
            | Error::Link { .. } => ErrorCategory::Link,
            Error::Protocol { .. } => ErrorCategory::Protocol,
            Error::Delivery { .. } => ErrorCategory::Delivery,
            Error::Storage { .. } => ErrorCategory::Storage,
            Error::Config { .. } | Error::Toml(_) => ErrorCategory::Config,
            Error::Io(_)
            | Error::Json(_)
            | Error::ChannelSend { .. }
            | Error::ChannelClosed
            | Error::Cancelled
            | Error::CheckInInProgress => ErrorCategory::Internal,
        }
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ConnectTimeout { .. }
                | Error::LinkLost
                | Error::Link { .. }
                | Error::Protocol { .. }
                | Error::Delivery { .. }
                | Error::Storage { .. }
                | Error::ChannelSend { .. }
                | Error::Cancelled
                | Error::CheckInInProgress
        )
    }

    /// Check if this error should stop the application
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config { .. } | Error::Toml(_))
    }

    /// Whether the link should give up reconnecting after this error.
    ///
    /// Permission and radio-state problems will not fix themselves by waiting.
    pub fn is_permanent_link_failure(&self) -> bool {
        matches!(self, Error::PermissionDenied | Error::RadioDisabled)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = Error::link("socket reset");
        assert_eq!(err.to_string(), "Link error: socket reset");

        let err = Error::RadioDisabled;
        assert!(err.to_string().contains("Enable Bluetooth"));

        let err = Error::delivery(Channel::Sms, "gateway rejected");
        assert_eq!(err.to_string(), "Delivery via sms failed: gateway rejected");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(Error::PermissionDenied.category(), ErrorCategory::Link);
        assert_eq!(Error::NotConnected.category(), ErrorCategory::Link);
        assert_eq!(Error::protocol("bad").category(), ErrorCategory::Protocol);
        assert_eq!(
            Error::delivery(Channel::Call, "no signal").category(),
            ErrorCategory::Delivery
        );
        assert_eq!(Error::storage("offline").category(), ErrorCategory::Storage);
        assert_eq!(Error::config("bad").category(), ErrorCategory::Config);
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(Error::LinkLost.is_recoverable());
        assert!(Error::storage("offline").is_recoverable());
        assert!(Error::delivery(Channel::Sms, "x").is_recoverable());
        assert!(!Error::PermissionDenied.is_recoverable());
    }

    #[test]
    fn test_error_is_fatal() {
        assert!(Error::config("missing user").is_fatal());
        assert!(!Error::LinkLost.is_fatal());
        assert!(!Error::storage("offline").is_fatal());
    }

    #[test]
    fn test_permanent_link_failure() {
        assert!(Error::PermissionDenied.is_permanent_link_failure());
        assert!(Error::RadioDisabled.is_permanent_link_failure());
        assert!(!Error::LinkLost.is_permanent_link_failure());
        assert!(!Error::ConnectTimeout {
            address: "aa".into(),
            timeout_secs: 10
        }
        .is_permanent_link_failure());
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = Error::invalid_transition("connect", "connected");
        assert_eq!(err.to_string(), "Cannot connect while link is connected");
    }
}
