//! Centralized error types for herald using thiserror.
//!
//! The taxonomy mirrors how failures surface to the caller:
//! configuration problems block a receiver at startup, template problems are
//! contained inside a notification attempt, and delivery problems are reported
//! with a retryable/permanent classification.

use thiserror::Error;

/// Errors related to configuration loading and receiver construction.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load config file: {0}")]
    LoadError(String),
    #[error("invalid configuration: {0}")]
    ValidationError(String),
    #[error("invalid template '{name}': {message}")]
    InvalidTemplate { name: String, message: String },
    /// A receiver could not be built. Carries everything an operator needs to
    /// find the broken entry.
    #[error("invalid receiver '{name}' (type {kind}): {message}")]
    InvalidReceiver {
        name: String,
        kind: String,
        message: String,
    },
}

/// Errors raised while decoding a single receiver's settings.
///
/// These are wrapped into [`ConfigError::InvalidReceiver`] by the registry,
/// which knows the receiver name and type.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("malformed settings: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("missing required field '{0}'")]
    Missing(&'static str),
    #[error("invalid value for '{field}': {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
    #[error("{0}")]
    Conflict(String),
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        SettingsError::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Errors returned by a notification attempt.
///
/// The variant carries the retry classification: the caller's outer retry
/// layer re-attempts [`NotifyError::Retryable`] only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Retryable(String),
    #[error("delivery rejected: {0}")]
    Permanent(String),
    #[error("notification cancelled")]
    Cancelled,
}

impl NotifyError {
    /// Whether the caller should re-attempt the same notification later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NotifyError::Retryable(_))
    }
}

impl From<TransportError> for NotifyError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => NotifyError::Cancelled,
            TransportError::Rejected(_)
            | TransportError::InvalidRequest(_)
            | TransportError::Tls(_) => NotifyError::Permanent(err.to_string()),
            TransportError::Request(_)
            | TransportError::Timeout
            | TransportError::Email(_)
            | TransportError::Mqtt(_) => NotifyError::Retryable(err.to_string()),
        }
    }
}

/// Errors related to template rendering.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template '{name}' not found")]
    NotFound { name: String },
    #[error("template render failed: {message}")]
    RenderFailed { message: String },
}

/// Errors reported by the outbound transports (HTTP, SMTP, MQTT).
///
/// Messages never include request URLs or credentials.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("request timed out")]
    Timeout,
    #[error("request cancelled")]
    Cancelled,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The remote end refused the message for good (e.g. SMTP 5xx).
    #[error("rejected by server: {0}")]
    Rejected(String),
    #[error("email delivery failed: {0}")]
    Email(String),
    #[error("mqtt error: {0}")]
    Mqtt(String),
    #[error("tls configuration error: {0}")]
    Tls(String),
}
