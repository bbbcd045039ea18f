//! Error types for Covenant

use serde::{Deserialize, Serialize};

/// Main error type for connector operations
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// A required field of an inbound message is missing or empty.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The inbound message carries an unsupported protocol version.
    #[error("Protocol version not supported: {0}")]
    VersionNotSupported(String),

    /// The connector is configured offline and rejects all inbound traffic.
    #[error("Connector is offline")]
    ConnectorOffline,

    /// An agreement, artifact or offer id is unknown.
    #[error("Not found: {0}")]
    NotFound(String),

    /// No contract offers exist for the requested target (hard reject).
    #[error("No contract offers for target: {0}")]
    NoOffersForTarget(String),

    /// Offers exist but none matches the requested rules (soft reject).
    #[error("Contract rejected: {0}")]
    RulesMismatch(String),

    /// A rule list was empty where rules are required.
    #[error("Missing rules: {0}")]
    MissingRules(String),

    /// A rule is missing its target artifact.
    #[error("Missing rule target: {0}")]
    MissingTarget(String),

    /// Access denied by pattern evaluation, unconfirmed agreement, or
    /// contract mismatch.
    #[error("Policy restriction: {0}")]
    PolicyRestriction(String),

    /// A rule's condition maps to no enforceable pattern.
    #[error("Unsupported policy pattern: {0}")]
    UnsupportedPattern(String),

    /// A logging/notification duty could not be discharged.
    #[error("Duty execution failed: {0}")]
    DutyExecution(String),

    /// Outbound HTTP delivery failed (subscriber push, clearing house).
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Typed rejection reasons carried on protocol rejection messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    MalformedMessage,
    VersionNotSupported,
    NotFound,
    PolicyRestriction,
    MissingRules,
    MissingTarget,
    TemporarilyUnavailable,
    InternalError,
}

impl ConnectorError {
    /// Map an error to the rejection reason sent back on the wire.
    pub fn rejection_reason(&self) -> RejectionReason {
        match self {
            Self::MalformedMessage(_) => RejectionReason::MalformedMessage,
            Self::VersionNotSupported(_) => RejectionReason::VersionNotSupported,
            Self::ConnectorOffline => RejectionReason::TemporarilyUnavailable,
            Self::NotFound(_) | Self::NoOffersForTarget(_) => RejectionReason::NotFound,
            Self::RulesMismatch(_)
            | Self::PolicyRestriction(_)
            | Self::UnsupportedPattern(_)
            | Self::DutyExecution(_) => RejectionReason::PolicyRestriction,
            Self::MissingRules(_) => RejectionReason::MissingRules,
            Self::MissingTarget(_) => RejectionReason::MissingTarget,
            Self::Transport(_) => RejectionReason::TemporarilyUnavailable,
            Self::Internal(_) => RejectionReason::InternalError,
        }
    }

    /// True for rejections the consumer may retry with a revised request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RulesMismatch(_) | Self::ConnectorOffline | Self::Transport(_)
        )
    }
}

// Implement From conversions for common error types

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedMessage(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Result type alias for connector operations
pub type Result<T> = std::result::Result<T, ConnectorError>;
