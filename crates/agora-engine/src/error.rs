//! Error types for the Agora session engine.
//!
//! This module defines the error hierarchy for engine operations: configuration
//! loading, turn execution against a model endpoint, and the protocol-level
//! terminations that callers may want to surface as errors.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A specialized `Result` type for Agora engine operations.
pub type Result<T> = std::result::Result<T, AgoraError>;

/// Errors that can occur while configuring or running an Agora session.
///
/// Protocol terminations (`ConsentNotConfirmed`, `DistressDetected`,
/// `ExecutionError`) never abort a run mid-flight: the engine records them on
/// the session and the caller may convert them with
/// [`SessionState::termination_error`](crate::SessionState::termination_error).
#[derive(Debug, thiserror::Error)]
pub enum AgoraError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your agora.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Protocol Terminations
    // ========================================================================
    /// The model did not acknowledge its right to decline during the
    /// pre-flight consent check.
    #[error("Consent not confirmed: the model did not acknowledge its right to decline\n\nSuggestion: Review the consent response in the session record; no experimental turns were run")]
    ConsentNotConfirmed,

    /// Distress drift was detected and the session was stopped.
    #[error("Distress detected on turn {turn}: session stopped for safety")]
    DistressDetected {
        /// The turn on which distress was classified.
        turn: u32,
    },

    /// The turn executor failed (transport, timeout, malformed response).
    #[error("Turn {turn} failed: {source}")]
    ExecutionError {
        /// The turn that failed (0 for the consent turn).
        turn: u32,
        /// The underlying executor failure.
        #[source]
        source: ExecutorError,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // State Machine Errors
    // ========================================================================
    /// Invalid state transition attempted.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current phase.
        from: String,
        /// The attempted target phase.
        to: String,
    },
}

impl AgoraError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns `true` if this error is safety-critical and must never be
    /// suppressed or retried.
    #[must_use]
    pub const fn is_safety_stop(&self) -> bool {
        matches!(self, Self::DistressDetected { .. })
    }

    /// Returns `true` if this error is fatal and requires immediate termination.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. }
                | Self::ConfigValidationError { .. }
                | Self::ConsentNotConfirmed
                | Self::DistressDetected { .. }
        )
    }
}

/// Failures reported by a [`TurnExecutor`](crate::TurnExecutor).
///
/// The engine never retries these; retry policy, if any, belongs to the
/// executor implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExecutorError {
    /// The request could not be delivered or the endpoint returned an error status.
    #[error("transport error: {0}")]
    Transport(String),

    /// The caller-supplied timeout elapsed before a response arrived.
    #[error("turn timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The endpoint answered but the payload could not be interpreted.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ExecutorError {
    /// Creates a new `Transport` error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates a new `Timeout` error from a duration.
    #[must_use]
    pub fn timeout(timeout: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Creates a new `MalformedResponse` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    /// Returns `true` if a collaborator could reasonably retry this failure.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }
}
