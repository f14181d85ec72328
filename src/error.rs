//! Process exit codes and structured error reports.

use serde::Serialize;

use crate::dedup::DedupError;

/// Exit codes of the `cowdupe` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Run completed; every duplicate was cloned (or there were none).
    Success = 0,
    /// Fatal error, including the first failed clone.
    GeneralError = 1,
    /// Run completed but some files could not be hashed.
    PartialSuccess = 3,
    /// Ctrl+C was pressed.
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "CD000",
            Self::GeneralError => "CD001",
            Self::PartialSuccess => "CD003",
            Self::Interrupted => "CD130",
        }
    }

    /// Exit code for an error that ended the run.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<DedupError>() {
            Some(DedupError::Interrupted) => Self::Interrupted,
            _ => Self::GeneralError,
        }
    }
}

/// Structured error information for `--json-errors`.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "CD001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message, including its causes
    pub message: String,
    /// Whether the run was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clone::CloneError;
    use std::path::PathBuf;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success.as_i32(), 0);
        assert_eq!(ExitCode::GeneralError.as_i32(), 1);
        assert_eq!(ExitCode::PartialSuccess.as_i32(), 3);
        assert_eq!(ExitCode::Interrupted.as_i32(), 130);
    }

    #[test]
    fn test_code_prefixes() {
        assert_eq!(ExitCode::GeneralError.code_prefix(), "CD001");
        assert_eq!(ExitCode::Interrupted.code_prefix(), "CD130");
    }

    #[test]
    fn test_for_error() {
        let interrupted = anyhow::Error::new(DedupError::Interrupted);
        assert_eq!(ExitCode::for_error(&interrupted), ExitCode::Interrupted);

        let clone_failed = anyhow::Error::new(DedupError::Clone {
            source_path: PathBuf::from("a"),
            dest: PathBuf::from("b"),
            error: CloneError::unsupported("test"),
        });
        assert_eq!(ExitCode::for_error(&clone_failed), ExitCode::GeneralError);

        let other = anyhow::anyhow!("boom");
        assert_eq!(ExitCode::for_error(&other), ExitCode::GeneralError);
    }

    #[test]
    fn test_structured_error_json() {
        let err = anyhow::anyhow!("inner").context("outer");
        let structured = StructuredError::new(&err, ExitCode::GeneralError);
        let json = serde_json::to_value(&structured).unwrap();

        assert_eq!(json["code"], "CD001");
        assert_eq!(json["exit_code"], 1);
        assert_eq!(json["message"], "outer: inner");
        assert_eq!(json["interrupted"], false);
    }
}
