//! Engine configuration.
//!
//! Loaded from TOML; every section and field is optional and falls back to
//! its default:
//!
//! ```toml
//! [grouping]
//! similarity_threshold = 0.8
//! max_group_size = 50
//! candidate_limit = 10
//! include_resolved = false
//!
//! [rca]
//! min_members = 2
//! max_attempts = 3
//! generation_timeout_secs = 60
//! retry_backoff_ms = 500
//!
//! [timeouts]
//! embedding_timeout_ms = 2000
//! index_timeout_ms = 2000
//!
//! [embedding]
//! dimension = 256
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use triage_core::{Result, TriageError};

/// Upper bound on the delay between automatic generation retries.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Settings for group assignment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GroupingConfig {
    /// Minimum cosine similarity for joining a group, in `(0, 1]`.
    pub similarity_threshold: f64,
    /// Groups at this size stop accepting members.
    pub max_group_size: usize,
    /// Nearest neighbours fetched per assignment.
    pub candidate_limit: usize,
    /// Whether resolved groups may receive new alerts.
    pub include_resolved: bool,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            max_group_size: 50,
            candidate_limit: 10,
            include_resolved: false,
        }
    }
}

impl GroupingConfig {
    /// Largest cosine distance that still counts as a match.
    #[must_use]
    pub fn max_distance(&self) -> f64 {
        1.0 - self.similarity_threshold
    }
}

/// Settings for RCA generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RcaConfig {
    /// Members required before a group becomes eligible.
    pub min_members: usize,
    /// Failed generations before a group stays Failed.
    pub max_attempts: u32,
    /// Time budget for one generation.
    pub generation_timeout_secs: u64,
    /// Delay before the first automatic retry; doubles per failure.
    pub retry_backoff_ms: u64,
}

impl Default for RcaConfig {
    fn default() -> Self {
        Self {
            min_members: 2,
            max_attempts: 3,
            generation_timeout_secs: 60,
            retry_backoff_ms: 500,
        }
    }
}

impl RcaConfig {
    /// Generation timeout as a `Duration`.
    #[must_use]
    pub const fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    /// Delay before retrying after the `attempt`-th consecutive failure.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self.retry_backoff_ms.saturating_mul(1_u64 << shift);
        Duration::from_millis(ms).min(MAX_RETRY_BACKOFF)
    }
}

/// Timeouts for the fast external calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Budget for one embedding call.
    pub embedding_timeout_ms: u64,
    /// Budget for one index query or upsert.
    pub index_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            embedding_timeout_ms: 2000,
            index_timeout_ms: 2000,
        }
    }
}

impl TimeoutConfig {
    /// Embedding timeout as a `Duration`.
    #[must_use]
    pub const fn embedding(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }

    /// Index timeout as a `Duration`.
    #[must_use]
    pub const fn index(&self) -> Duration {
        Duration::from_millis(self.index_timeout_ms)
    }
}

/// Settings for the built-in embedder and index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Vector dimension.
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { dimension: 256 }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TriageConfig {
    /// Grouping settings.
    #[serde(default)]
    pub grouping: GroupingConfig,
    /// RCA settings.
    #[serde(default)]
    pub rca: RcaConfig,
    /// External call timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Built-in embedding settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

impl TriageConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| TriageError::InvalidConfig {
            reason: format!("failed to read config file '{}': {e}", path.display()),
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| TriageError::InvalidConfig {
            reason: format!("invalid TOML: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::Serialization` if rendering fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| TriageError::Serialization(e.to_string()))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::InvalidConfig` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        let t = self.grouping.similarity_threshold;
        if !(t > 0.0 && t <= 1.0) {
            return Err(invalid(format!(
                "grouping.similarity_threshold must be in (0, 1], got {t}"
            )));
        }
        if self.grouping.max_group_size == 0 {
            return Err(invalid("grouping.max_group_size must be greater than 0"));
        }
        if self.grouping.candidate_limit == 0 {
            return Err(invalid("grouping.candidate_limit must be greater than 0"));
        }
        if self.rca.min_members == 0 {
            return Err(invalid("rca.min_members must be greater than 0"));
        }
        if self.rca.max_attempts == 0 {
            return Err(invalid("rca.max_attempts must be greater than 0"));
        }
        if self.rca.generation_timeout_secs == 0 {
            return Err(invalid("rca.generation_timeout_secs must be greater than 0"));
        }
        if self.rca.retry_backoff_ms == 0 {
            return Err(invalid("rca.retry_backoff_ms must be greater than 0"));
        }
        if self.timeouts.embedding_timeout_ms == 0 {
            return Err(invalid("timeouts.embedding_timeout_ms must be greater than 0"));
        }
        if self.timeouts.index_timeout_ms == 0 {
            return Err(invalid("timeouts.index_timeout_ms must be greater than 0"));
        }
        if self.embedding.dimension == 0 {
            return Err(invalid("embedding.dimension must be greater than 0"));
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> TriageError {
    TriageError::InvalidConfig {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use test_case::test_case;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = TriageConfig::from_toml("").expect("defaults");
        assert_eq!(config, TriageConfig::default());
        assert!((config.grouping.max_distance() - 0.2).abs() < 1e-9);
        assert_eq!(config.rca.min_members, 2);
        assert_eq!(config.rca.max_attempts, 3);
        assert_eq!(config.embedding.dimension, 256);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = TriageConfig::from_toml(
            r#"
            [grouping]
            similarity_threshold = 0.9

            [rca]
            max_attempts = 5
            "#,
        )
        .expect("parse");
        assert!((config.grouping.similarity_threshold - 0.9).abs() < 1e-9);
        assert_eq!(config.grouping.max_group_size, 50);
        assert_eq!(config.rca.max_attempts, 5);
        assert_eq!(config.rca.min_members, 2);
    }

    #[test]
    fn to_toml_round_trips() {
        let config = TriageConfig::default();
        let rendered = config.to_toml().expect("render");
        assert_eq!(TriageConfig::from_toml(&rendered).expect("parse"), config);
    }

    #[test]
    fn loads_from_file() {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(b"[embedding]\ndimension = 64\n")
            .expect("write");
        let config = TriageConfig::from_file(file.path()).expect("load");
        assert_eq!(config.embedding.dimension, 64);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = TriageConfig::from_file("/nonexistent/triage.toml").unwrap_err();
        assert!(matches!(err, TriageError::InvalidConfig { .. }));
    }

    #[test]
    fn malformed_toml_rejected() {
        let err = TriageConfig::from_toml("[grouping\n").unwrap_err();
        assert!(err.to_string().contains("invalid TOML"));
    }

    #[test_case("[grouping]\nsimilarity_threshold = 0.0", "similarity_threshold" ; "zero threshold")]
    #[test_case("[grouping]\nsimilarity_threshold = 1.5", "similarity_threshold" ; "threshold above one")]
    #[test_case("[grouping]\nmax_group_size = 0", "max_group_size" ; "zero group size")]
    #[test_case("[grouping]\ncandidate_limit = 0", "candidate_limit" ; "zero candidates")]
    #[test_case("[rca]\nmin_members = 0", "min_members" ; "zero min members")]
    #[test_case("[rca]\nmax_attempts = 0", "max_attempts" ; "zero attempts")]
    #[test_case("[rca]\ngeneration_timeout_secs = 0", "generation_timeout_secs" ; "zero generation timeout")]
    #[test_case("[timeouts]\nindex_timeout_ms = 0", "index_timeout_ms" ; "zero index timeout")]
    #[test_case("[embedding]\ndimension = 0", "dimension" ; "zero dimension")]
    fn invalid_values_rejected(toml: &str, field: &str) {
        let err = TriageConfig::from_toml(toml).unwrap_err();
        assert!(matches!(err, TriageError::InvalidConfig { .. }));
        assert!(err.to_string().contains(field), "{err} should mention {field}");
    }

    #[test_case(1, 500 ; "first retry")]
    #[test_case(2, 1000 ; "second retry")]
    #[test_case(3, 2000 ; "third retry")]
    #[test_case(10, 30_000 ; "capped")]
    fn backoff_doubles_until_cap(attempt: u32, expected_ms: u64) {
        let rca = RcaConfig::default();
        assert_eq!(rca.backoff_for(attempt), Duration::from_millis(expected_ms));
    }
}
