//! Error types for model operations.
//!
//! Recoverable conditions (unreadable files, broken includes, stale parse
//! results) are absorbed into model state. Only invariant violations and
//! lifecycle misuse surface as [`ModelError`].

use crate::file::FileState;
use crate::ids::ProjectId;
use codemodel_parser_api::ParserError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Error returned by a blocking queue operation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was shut down while (or before) waiting
    #[error("Parser queue interrupted by shutdown")]
    Interrupted,
}

/// Error type for all model operations.
#[derive(Error, Debug)]
pub enum ModelError {
    /// No project registered under this id
    #[error("Project not found: {project}")]
    ProjectNotFound {
        /// The missing project
        project: ProjectId,
    },

    /// The project has no FileModel for this path
    #[error("File not found in {project}: {path}")]
    FileNotFound {
        /// Project that was searched
        project: ProjectId,
        /// Normalized path
        path: PathBuf,
    },

    /// A live FileModel already exists for this path
    #[error("Duplicate file in {project}: {path}")]
    DuplicateFile {
        /// Project holding the existing model
        project: ProjectId,
        /// Normalized path
        path: PathBuf,
    },

    /// The requested state change is not allowed from the current state
    #[error("Invalid transition for {path}: {from} -> {to}")]
    InvalidTransition {
        /// File whose state was being changed
        path: PathBuf,
        /// Current state
        from: FileState,
        /// Requested state
        to: FileState,
    },

    /// The engine has not been started, or was shut down
    #[error("Engine is not running")]
    NotRunning,

    /// Queue error
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Front-end error reported to a direct caller
    #[error(transparent)]
    Parser(#[from] ParserError),

    /// I/O error outside of parsing (configuration files, watcher setup)
    #[error("I/O error on {path}")]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be loaded
    #[error("Configuration error: {message}")]
    Config {
        /// Error details
        message: String,
        /// Optional source error
        #[source]
        source: Option<serde_json::Error>,
    },

    /// File-system watcher failure
    #[error("Watcher error: {message}")]
    Watch {
        /// Error details
        message: String,
    },
}

impl ModelError {
    /// Create a configuration error from a message and optional source.
    pub fn config(message: impl Into<String>, source: Option<serde_json::Error>) -> Self {
        Self::Config {
            message: message.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_not_found_error() {
        let err = ModelError::ProjectNotFound {
            project: ProjectId(7),
        };
        assert_eq!(err.to_string(), "Project not found: P7");
    }

    #[test]
    fn test_invalid_transition_error() {
        let err = ModelError::InvalidTransition {
            path: PathBuf::from("/src/a.c"),
            from: FileState::Removed,
            to: FileState::Enqueued,
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition for /src/a.c: Removed -> Enqueued"
        );
    }

    #[test]
    fn test_queue_error_converts() {
        let err: ModelError = QueueError::Interrupted.into();
        assert!(matches!(err, ModelError::Queue(QueueError::Interrupted)));
        assert_eq!(err.to_string(), "Parser queue interrupted by shutdown");
    }
}
