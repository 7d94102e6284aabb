use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or parsing a source file
#[derive(Error, Debug)]
pub enum ParserError {
    /// Failed to read file
    #[error("IO error reading {0}: {1}")]
    IoError(PathBuf, #[source] std::io::Error),

    /// The file is not known to the content provider
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Syntax error in source code
    #[error("Syntax error in {0}:{1}:{2}: {3}")]
    SyntaxError(PathBuf, usize, usize, String),

    /// File too large
    #[error("File {0} exceeds maximum size ({1} bytes)")]
    FileTooLarge(PathBuf, usize),

    /// Unsupported language feature
    #[error("Unsupported language feature in {0}: {1}")]
    UnsupportedFeature(PathBuf, String),

    /// Generic parsing error
    #[error("Parse error in {0}: {1}")]
    ParseError(PathBuf, String),
}

impl ParserError {
    /// Path of the file the error refers to
    pub fn path(&self) -> &PathBuf {
        match self {
            ParserError::IoError(path, _)
            | ParserError::NotFound(path)
            | ParserError::SyntaxError(path, ..)
            | ParserError::FileTooLarge(path, _)
            | ParserError::UnsupportedFeature(path, _)
            | ParserError::ParseError(path, _) => path,
        }
    }

    /// True for failures that may go away on retry (missing or unreadable file)
    pub fn is_transient(&self) -> bool {
        matches!(self, ParserError::IoError(..) | ParserError::NotFound(_))
    }
}

/// Result type for parser operations
pub type ParserResult<T> = Result<T, ParserError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_is_transient() {
        let err = ParserError::IoError(
            PathBuf::from("/src/a.c"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.is_transient());
        assert_eq!(err.path(), &PathBuf::from("/src/a.c"));
        assert_eq!(err.to_string(), "IO error reading /src/a.c: denied");
    }

    #[test]
    fn test_syntax_error_is_not_transient() {
        let err = ParserError::SyntaxError(PathBuf::from("a.c"), 3, 7, "unexpected".to_string());
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "Syntax error in a.c:3:7: unexpected");
    }
}
