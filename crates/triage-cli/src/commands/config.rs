//! Init-config command implementation.

use std::io::Write;
use std::path::Path;

use tracing::info;
use triage_engine::TriageConfig;

use crate::error::CliError;

/// Handler for the init-config command.
pub struct InitConfigCommand<'a> {
    output: Option<&'a Path>,
}

impl<'a> InitConfigCommand<'a> {
    /// Creates a handler writing to `output`, or to stdout if `None`.
    #[must_use]
    pub const fn new(output: Option<&'a Path>) -> Self {
        Self { output }
    }

    /// Writes the default configuration.
    ///
    /// # Errors
    ///
    /// Returns error if rendering or writing fails, or if `output` exists.
    pub fn execute<W: Write>(&self, out: &mut W) -> Result<(), CliError> {
        let rendered = TriageConfig::default()
            .to_toml()
            .map_err(|e| CliError::Format(e.to_string()))?;

        match self.output {
            Some(path) => {
                if path.exists() {
                    return Err(CliError::Config(format!(
                        "'{}' already exists",
                        path.display()
                    )));
                }
                std::fs::write(path, &rendered)?;
                info!(path = %path.display(), "default configuration written");
                writeln!(out, "✓ Wrote default configuration to {}", path.display())?;
            }
            None => write!(out, "{rendered}")?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn stdout_output_parses_back() {
        let mut out = Vec::new();
        InitConfigCommand::new(None).execute(&mut out).expect("init");
        let text = String::from_utf8(out).expect("utf8");
        let config = TriageConfig::from_toml(&text).expect("valid config");
        assert_eq!(config, TriageConfig::default());
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("triage.toml");

        let mut out = Vec::new();
        InitConfigCommand::new(Some(&path)).execute(&mut out).expect("first write");
        assert!(path.exists());

        let err = InitConfigCommand::new(Some(&path))
            .execute(&mut out)
            .unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }
}
