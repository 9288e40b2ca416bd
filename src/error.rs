//! Error types for the dialogue orchestrator.
//!
//! Uses thiserror for ergonomic error definition. Gateway failures are kept
//! separate from caller-input errors: the former are handled inside a running
//! conversation (retried or escalated to an aborted outcome), the latter are
//! returned synchronously before any gateway call.

use std::time::Duration;

/// Main error type for the duologue library.
///
/// `DialogueOrchestrator::run` only ever returns the caller-input variants;
/// mid-conversation failures resolve into the returned outcome instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad caller input, surfaced before any gateway call
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Inconsistent configuration of the persona pair or options
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Internal transcript invariant violation (indicates a scheduler bug)
    #[error("Ordering error: {0}")]
    Ordering(#[from] OrderingError),
}

/// Errors from validating a single persona or scenario.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Persona identifier is empty or whitespace
    #[error("persona identifier must not be empty")]
    EmptyIdentifier,

    /// Persona system prompt is empty or whitespace
    #[error("system prompt for persona '{identifier}' must not be empty")]
    EmptySystemPrompt {
        /// Identifier of the offending persona
        identifier: String,
    },

    /// Scenario description is empty or whitespace
    #[error("scenario must not be empty")]
    EmptyScenario,
}

/// Errors from an inconsistent persona pair or resume snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// Both personas share one identifier
    #[error("personas must have distinct identifiers, both are '{identifier}'")]
    DuplicateIdentifier {
        /// The shared identifier
        identifier: String,
    },

    /// A resume snapshot mentions a speaker outside the configured pair
    #[error("snapshot turn {sequence} is spoken by '{speaker}', which is neither configured persona")]
    UnknownSnapshotSpeaker {
        /// Sequence number of the offending turn
        sequence: usize,
        /// The unrecognized speaker
        speaker: String,
    },

    /// Required API credential is missing from the environment
    #[error("{variable} environment variable not set")]
    MissingApiKey {
        /// Name of the missing environment variable
        variable: &'static str,
    },
}

/// Transcript invariant violations.
///
/// These should never occur under correct scheduler operation; an
/// `OrderingError` escaping `run` means a bug, not bad input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderingError {
    /// Appended turn does not continue the sequence
    #[error("expected sequence number {expected}, got {got}")]
    NonContiguousSequence {
        /// The sequence number the store expected
        expected: usize,
        /// The sequence number the turn carried
        got: usize,
    },

    /// Appended turn repeats the previous turn's speaker
    #[error("speaker '{speaker}' cannot take two turns in a row")]
    RepeatedSpeaker {
        /// The repeated speaker
        speaker: String,
    },
}

/// Failures reported by a [`ModelGateway`](crate::gateway::ModelGateway).
///
/// Everything except `InvalidRequest` is transient and eligible for retry
/// under the scheduler's retry budget.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// The call did not complete within the per-call timeout
    #[error("request timed out after {duration:?}")]
    Timeout {
        /// How long the call was allowed to run
        duration: Duration,
    },

    /// The provider rejected the call for rate limiting
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Provider-suggested wait before retrying, when known
        retry_after: Option<Duration>,
    },

    /// The provider rejected the request as malformed; not retryable
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Provider error detail
        message: String,
    },

    /// Any other failure (network, 5xx, parse)
    #[error("gateway failure: {message}")]
    Unknown {
        /// Failure detail
        message: String,
    },
}

impl GatewayError {
    /// Whether the scheduler may retry after this failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GatewayError::InvalidRequest { .. })
    }
}

/// Result type alias for caller-facing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for gateway calls.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Validation(ValidationError::EmptyIdentifier);
        assert_eq!(
            err.to_string(),
            "Validation error: persona identifier must not be empty"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(GatewayError::Timeout {
            duration: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(GatewayError::RateLimited { retry_after: None }.is_retryable());
        assert!(GatewayError::Unknown {
            message: "503".into()
        }
        .is_retryable());
        assert!(!GatewayError::InvalidRequest {
            message: "bad prompt".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_error_conversion() {
        let ord = OrderingError::RepeatedSpeaker {
            speaker: "Alex".into(),
        };
        let err: Error = ord.into();
        assert!(matches!(err, Error::Ordering(_)));
    }
}
