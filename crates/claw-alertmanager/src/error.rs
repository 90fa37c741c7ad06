//! Error types for the claw-alertmanager crate.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while silencing, routing or dispatching alerts.
#[derive(Debug, Error)]
pub enum AlertmanagerError {
    /// Silence with the given ID was not found.
    #[error("silence not found: {id}")]
    SilenceNotFound {
        /// The silence ID that was not found.
        id: String,
    },

    /// No configuration has ever been saved or applied.
    #[error("no alertmanager configuration available")]
    NoConfiguration,

    /// Receiver with the given name does not exist in the active configuration.
    #[error("receiver not found: {name}")]
    ReceiverNotFound {
        /// The receiver name that was not found.
        name: String,
    },

    /// Malformed request input (silence payloads, listing filters).
    #[error("invalid payload: {reason}")]
    InvalidPayload {
        /// The reason the payload was rejected.
        reason: String,
    },

    /// A notifier's settings failed validation.
    #[error("validation error: {reason}")]
    Validation {
        /// The reason validation failed.
        reason: String,
    },

    /// The alerting configuration violates the schema.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// A template failed to parse or execute.
    #[error("template execution failed: {reason}")]
    TemplateExecution {
        /// The reason rendering failed.
        reason: String,
    },

    /// Notification delivery failed.
    #[error("notification failed: {reason}")]
    NotificationFailed {
        /// The reason the notification failed.
        reason: String,
    },

    /// A notifier call did not complete within its timeout.
    #[error("notification timed out after {after:?}")]
    Timeout {
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The caller cancelled the dispatch.
    #[error("dispatch cancelled")]
    Cancelled,

    /// The configuration store failed.
    #[error("storage error: {reason}")]
    Storage {
        /// The reason the store operation failed.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// Coarse classification used by an HTTP layer to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The referenced entity does not exist.
    NotFound,
    /// The caller supplied malformed input.
    BadRequest,
    /// Anything else.
    Internal,
}

impl AlertmanagerError {
    /// Returns the response class for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::SilenceNotFound { .. } | Self::NoConfiguration | Self::ReceiverNotFound { .. } => {
                ErrorKind::NotFound
            }
            Self::InvalidPayload { .. } | Self::Validation { .. } | Self::InvalidConfig { .. } => {
                ErrorKind::BadRequest
            }
            _ => ErrorKind::Internal,
        }
    }

    pub(crate) fn invalid_payload(reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            reason: reason.into(),
        }
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub(crate) fn template(reason: impl Into<String>) -> Self {
        Self::TemplateExecution {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for AlertmanagerError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type for alertmanager operations.
pub type Result<T> = std::result::Result<T, AlertmanagerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_silence_not_found() {
        let err = AlertmanagerError::SilenceNotFound {
            id: "silence-123".to_string(),
        };
        assert_eq!(err.to_string(), "silence not found: silence-123");
    }

    #[test]
    fn error_display_validation() {
        let err = AlertmanagerError::validation("could not find url property in settings");
        assert_eq!(
            err.to_string(),
            "validation error: could not find url property in settings"
        );
    }

    #[test]
    fn error_display_timeout() {
        let err = AlertmanagerError::Timeout {
            after: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "notification timed out after 5s");
    }

    #[test]
    fn error_kinds() {
        assert_eq!(AlertmanagerError::NoConfiguration.kind(), ErrorKind::NotFound);
        assert_eq!(
            AlertmanagerError::SilenceNotFound { id: "x".into() }.kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            AlertmanagerError::invalid_payload("empty matchers").kind(),
            ErrorKind::BadRequest
        );
        assert_eq!(
            AlertmanagerError::invalid_config("duplicate receiver").kind(),
            ErrorKind::BadRequest
        );
        assert_eq!(AlertmanagerError::Cancelled.kind(), ErrorKind::Internal);
        assert_eq!(
            AlertmanagerError::NotificationFailed {
                reason: "connection refused".into()
            }
            .kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<String>("invalid json");
        assert!(json_err.is_err());
        let err: AlertmanagerError = json_err.unwrap_err().into();
        assert!(matches!(err, AlertmanagerError::SerializationError(_)));
    }
}
