// error.rs - Error taxonomy for the allele caller

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors raised by the calling pipeline.
///
/// Translation problems are not part of this enum: they are recorded in the
/// invalid-CDS side list and never abort a run.
#[derive(Debug, Error)]
pub enum CallerError {
    /// Bad or missing user input, reported before the pipeline starts
    #[error("Input error: {0}")]
    Input(String),

    /// An external tool failed (non-zero exit or non-empty error stream)
    #[error("{tool} failed: {message}")]
    Collaborator { tool: String, message: String },

    /// The schema on disk disagrees with itself or with the run state
    #[error("Schema inconsistency: {0}")]
    Schema(String),

    /// Invalid parameter combination
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl CallerError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn collaborator(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether the error came from an external tool
    pub fn is_collaborator(&self) -> bool {
        matches!(self, CallerError::Collaborator { .. })
    }
}

pub type Result<T> = std::result::Result<T, CallerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CallerError::collaborator("blastp", "exit status 2");
        assert_eq!(err.to_string(), "blastp failed: exit status 2");
        assert!(err.is_collaborator());

        let err = CallerError::schema("locus abc has no length mode");
        assert!(err.to_string().starts_with("Schema inconsistency"));
        assert!(!err.is_collaborator());
    }

    #[test]
    fn test_io_error_keeps_path() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = CallerError::io("/tmp/schema/abc.fasta", source);
        assert!(err.to_string().contains("/tmp/schema/abc.fasta"));
    }
}
