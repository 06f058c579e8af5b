//! Error types shared by every triage crate.

use thiserror::Error;

/// Errors that can occur while grouping alerts or generating root cause analyses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriageError {
    /// The alert embedding does not match the dimensionality of the similarity index.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch {
        /// Dimension configured on the index.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },

    /// The embedding provider could not be reached or timed out.
    #[error("embedding provider unavailable: {reason}")]
    EmbeddingUnavailable {
        /// Why the provider is unavailable.
        reason: String,
    },

    /// The similarity index could not be reached or timed out.
    #[error("similarity index unavailable: {reason}")]
    IndexUnavailable {
        /// Why the index is unavailable.
        reason: String,
    },

    /// The RCA generator could not produce an analysis.
    #[error("rca generation unavailable: {reason}")]
    GenerationUnavailable {
        /// Why generation failed.
        reason: String,
    },

    /// The RCA generator did not answer within the configured timeout.
    #[error("rca generation timed out after {seconds}s")]
    GenerationTimeout {
        /// The timeout that elapsed.
        seconds: u64,
    },

    /// A versioned group write lost against a concurrent writer.
    #[error("version conflict on group {group_id}")]
    VersionConflict {
        /// The contended group.
        group_id: String,
    },

    /// Group with the given ID was not found.
    #[error("group not found: {id}")]
    GroupNotFound {
        /// The group ID that was not found.
        id: String,
    },

    /// Alert with the given ID was not found.
    #[error("alert not found: {id}")]
    AlertNotFound {
        /// The alert ID that was not found.
        id: String,
    },

    /// The alert is already a member of a group.
    #[error("alert {alert_id} already belongs to group {group_id}")]
    AlertAlreadyAssigned {
        /// The alert that was claimed.
        alert_id: String,
        /// The group that owns it.
        group_id: String,
    },

    /// The alert payload is malformed.
    #[error("invalid alert: {reason}")]
    InvalidAlert {
        /// The reason the alert is invalid.
        reason: String,
    },

    /// Configuration failed validation.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// An RCA state transition outside the allowed state machine.
    #[error("invalid rca transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },

    /// The operation needs an open group.
    #[error("group is resolved: {id}")]
    GroupResolved {
        /// The resolved group.
        id: String,
    },

    /// Reading or writing durable state failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl TriageError {
    /// Returns true for transient failures a caller may retry with the same alert ID.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingUnavailable { .. }
                | Self::IndexUnavailable { .. }
                | Self::GenerationUnavailable { .. }
                | Self::GenerationTimeout { .. }
                | Self::VersionConflict { .. }
        )
    }

    /// Returns true if the error should count against a group's RCA failure budget.
    #[must_use]
    pub const fn is_generation_failure(&self) -> bool {
        matches!(
            self,
            Self::GenerationUnavailable { .. } | Self::GenerationTimeout { .. }
        )
    }
}

impl From<serde_json::Error> for TriageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for triage operations.
pub type Result<T> = std::result::Result<T, TriageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn error_display_dimension_mismatch() {
        let err = TriageError::EmbeddingDimensionMismatch {
            expected: 768,
            actual: 384,
        };
        assert_eq!(
            err.to_string(),
            "embedding dimension mismatch: expected 768, got 384"
        );
    }

    #[test]
    fn error_display_group_not_found() {
        let err = TriageError::GroupNotFound {
            id: "grp-1".to_string(),
        };
        assert_eq!(err.to_string(), "group not found: grp-1");
    }

    #[test]
    fn error_display_generation_timeout() {
        let err = TriageError::GenerationTimeout { seconds: 60 };
        assert_eq!(err.to_string(), "rca generation timed out after 60s");
    }

    #[test_case(TriageError::IndexUnavailable { reason: "down".into() }, true ; "index")]
    #[test_case(TriageError::EmbeddingUnavailable { reason: "down".into() }, true ; "embedding")]
    #[test_case(TriageError::GenerationTimeout { seconds: 1 }, true ; "timeout")]
    #[test_case(TriageError::EmbeddingDimensionMismatch { expected: 2, actual: 3 }, false ; "dimension")]
    #[test_case(TriageError::GroupNotFound { id: "g".into() }, false ; "not found")]
    fn retryable_classification(err: TriageError, expected: bool) {
        assert_eq!(err.is_retryable(), expected);
    }

    #[test]
    fn only_generation_errors_consume_budget() {
        assert!(TriageError::GenerationTimeout { seconds: 5 }.is_generation_failure());
        assert!(
            TriageError::GenerationUnavailable {
                reason: "502".into()
            }
            .is_generation_failure()
        );
        assert!(
            !TriageError::IndexUnavailable {
                reason: "down".into()
            }
            .is_generation_failure()
        );
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<String>("invalid json");
        assert!(json_err.is_err());
        let err: TriageError = json_err.unwrap_err().into();
        assert!(matches!(err, TriageError::Serialization(_)));
    }
}
