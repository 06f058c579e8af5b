//! CLI error types.

use std::fmt;

use triage_core::TriageError;

/// CLI-specific errors.
#[derive(Debug)]
pub enum CliError {
    /// Invalid configuration.
    Config(String),
    /// The alert input could not be read.
    Input(String),
    /// The persisted state could not be loaded or saved.
    State(String),
    /// Output formatting error.
    Format(String),
    /// Group not found.
    GroupNotFound(String),
    /// The engine rejected the operation.
    Triage(TriageError),
    /// IO error.
    Io(std::io::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Input(msg) => write!(f, "input error: {msg}"),
            Self::State(msg) => write!(f, "state error: {msg}"),
            Self::Format(msg) => write!(f, "format error: {msg}"),
            Self::GroupNotFound(id) => write!(f, "group not found: {id}"),
            Self::Triage(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Triage(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<TriageError> for CliError {
    fn from(err: TriageError) -> Self {
        match err {
            TriageError::GroupNotFound { id } => Self::GroupNotFound(id),
            TriageError::InvalidConfig { reason } => Self::Config(reason),
            TriageError::Persistence(msg) => Self::State(msg),
            other => Self::Triage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(TriageError::GroupNotFound { id: "g-1".into() }, "group not found: g-1" ; "missing group")]
    #[test_case(TriageError::InvalidConfig { reason: "bad ttl".into() }, "configuration error: bad ttl" ; "invalid config")]
    #[test_case(TriageError::Persistence("disk full".into()), "state error: disk full" ; "persistence")]
    fn engine_errors_get_cli_wording(err: TriageError, expected: &str) {
        assert_eq!(CliError::from(err).to_string(), expected);
    }

    #[test]
    fn config_errors_keep_reason() {
        let err = CliError::from(TriageError::InvalidConfig {
            reason: "grouping.max_group_size must be greater than 0".into(),
        });
        assert!(matches!(err, CliError::Config(_)));
        assert!(err.to_string().starts_with("configuration error:"));
    }

    #[test]
    fn engine_errors_pass_through() {
        let err = CliError::from(TriageError::GroupResolved { id: "g-2".into() });
        assert_eq!(err.to_string(), "group is resolved: g-2");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        assert!(matches!(CliError::from(io_err), CliError::Io(_)));
    }
}
