use std::time::Duration;

use thiserror::Error;

/// Errors raised by the queue seam: connections, queue clients and receivers.
///
/// Providers map their SDK failures onto these variants so the supervisor can
/// classify them without knowing which broker it is talking to.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The broker endpoint could not be reached.
    #[error("connection failed: {message}")]
    ConnectionFailed { message: String },

    /// Credentials were rejected by the broker.
    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    /// The message lock expired or the lock token is unknown to the broker.
    #[error("message lock lost: {lock_token}")]
    LockLost { lock_token: String },

    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// The receiver was used after `close`.
    #[error("receiver is closed")]
    ReceiverClosed,

    /// A provider-specific failure. `transient` carries the provider's own
    /// judgement of whether retrying can help.
    #[error("provider error ({provider}): {code} - {message}")]
    ProviderError {
        provider: &'static str,
        code: String,
        message: String,
        transient: bool,
    },

    #[error("configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),
}

impl QueueError {
    /// Returns `true` when the failure is expected to clear up on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::ConnectionFailed { .. } => true,
            QueueError::AuthenticationFailed { .. } => false,
            QueueError::QueueNotFound { .. } => false,
            QueueError::LockLost { .. } => false,
            QueueError::Timeout { .. } => true,
            QueueError::ReceiverClosed => true,
            QueueError::ProviderError { transient, .. } => *transient,
            QueueError::ConfigurationError(_) => false,
        }
    }
}

/// Configuration errors, raised before any connection is attempted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("missing required configuration: {key}")]
    Missing { key: String },

    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Reasons a [`Supervisor`](crate::supervisor::Supervisor) run ends with an error.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Connecting to the broker or opening the queue failed.
    #[error("failed to start receiving: {source}")]
    Startup {
        #[source]
        source: QueueError,
    },

    /// The receiver reported an error classified as fatal.
    #[error("fatal receiver error: {source}")]
    Fatal {
        #[source]
        source: QueueError,
    },

    #[error("receiver restarted {restarts} times in a row, giving up: {source}")]
    RestartLimitExceeded {
        restarts: u32,
        #[source]
        source: QueueError,
    },
}

/// Error returned by a message handler.
///
/// Carries a message only; the handler failure policy decides what happens to
/// the message that produced it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    /// Creates a new `HandlerError` with the provided message.
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError(message.into())
    }
}

impl From<String> for HandlerError {
    fn from(s: String) -> Self {
        HandlerError::new(s)
    }
}

impl From<&str> for HandlerError {
    fn from(s: &str) -> Self {
        HandlerError::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_and_timeout_errors_are_transient() {
        assert!(QueueError::ConnectionFailed { message: "reset".into() }.is_transient());
        assert!(QueueError::Timeout { duration: Duration::from_secs(1) }.is_transient());
        assert!(QueueError::ReceiverClosed.is_transient());
    }

    #[test]
    fn test_permanent_errors_are_not_transient() {
        assert!(!QueueError::QueueNotFound { queue_name: "q".into() }.is_transient());
        assert!(!QueueError::AuthenticationFailed { message: "denied".into() }.is_transient());
        assert!(!QueueError::LockLost { lock_token: "t".into() }.is_transient());
        let config: QueueError = ConfigurationError::Missing { key: "QUEUE_NAME".into() }.into();
        assert!(!config.is_transient());
    }

    #[test]
    fn test_provider_error_uses_its_own_flag() {
        let throttled = QueueError::ProviderError {
            provider: "aws-sqs",
            code: "RequestThrottled".into(),
            message: "slow down".into(),
            transient: true,
        };
        let invalid = QueueError::ProviderError {
            provider: "aws-sqs",
            code: "InvalidParameterValue".into(),
            message: "bad".into(),
            transient: false,
        };
        assert!(throttled.is_transient());
        assert!(!invalid.is_transient());
    }

    #[test]
    fn test_handler_error_display() {
        assert_eq!(HandlerError::from("boom").to_string(), "boom");
        assert_eq!(HandlerError::from(String::from("bad")).to_string(), "bad");
    }
}
