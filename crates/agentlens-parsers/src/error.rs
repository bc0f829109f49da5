use std::fmt;

/// Result type for agentlens-parsers operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the parser layer
#[derive(Debug)]
pub enum Error {
    /// IO operation failed
    Io(std::io::Error),

    /// JSON parsing failed
    Json(serde_json::Error),

    /// No parser matched the file
    NoParser(String),

    /// Transcript parsing failed (unreadable bytes, invalid structure)
    Parse(String),

    /// Redaction pattern failed to compile
    Pattern(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::NoParser(msg) => write!(f, "No parser for file: {}", msg),
            Error::Parse(msg) => write!(f, "Parse error: {}", msg),
            Error::Pattern(msg) => write!(f, "Redaction pattern error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::NoParser(_) | Error::Parse(_) | Error::Pattern(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}
