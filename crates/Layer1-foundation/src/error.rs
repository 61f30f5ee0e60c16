//! Error types for tasktree
//!
//! Engine errors: programming errors in the embedding code and configuration
//! problems. Failures of the work itself are not represented here.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// tasktree error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Lifecycle misuse
    // ========================================================================
    #[error("Task '{task}' is {actual}, expected {expected}")]
    InvalidState {
        task: String,
        expected: String,
        actual: String,
    },

    #[error("Task '{0}' has already been cleaned up")]
    AlreadyCleaned(String),

    // ========================================================================
    // Progress
    // ========================================================================
    #[error("Invalid progress: {0}")]
    InvalidProgress(String),

    #[error("Invalid progress inheritance: {0}")]
    InvalidInheritance(String),

    #[error("Invalid cleanup weight: {0}")]
    InvalidWeight(f64),

    // ========================================================================
    // Runtime
    // ========================================================================
    #[error("No async runtime available: {0}")]
    NoRuntime(String),

    // ========================================================================
    // Config
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // External conversions
    // ========================================================================
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    // ========================================================================
    // Other
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build an [`Error::InvalidState`] from anything displayable
    pub fn invalid_state(
        task: impl Into<String>,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        Error::InvalidState {
            task: task.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Whether this error indicates a bug in the embedding code rather than
    /// a failure of the work itself
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidState { .. }
                | Error::AlreadyCleaned(_)
                | Error::InvalidProgress(_)
                | Error::InvalidInheritance(_)
                | Error::InvalidWeight(_)
        )
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_message() {
        let err = Error::invalid_state("build", "RUNNING", "READY");
        assert_eq!(err.to_string(), "Task 'build' is READY, expected RUNNING");
        assert!(err.is_programming_error());
    }

    #[test]
    fn test_config_is_not_programming_error() {
        let err: Error = toml::from_str::<toml::Value>("= broken").unwrap_err().into();
        assert!(matches!(err, Error::Toml(_)));
        assert!(!err.is_programming_error());
        assert!(!Error::Config("bad".to_string()).is_programming_error());
    }
}
