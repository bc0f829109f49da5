use std::fmt;

/// Result type for agentlens-index operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the index layer
#[derive(Debug)]
pub enum Error {
    /// Parser layer error
    Parser(agentlens_parsers::Error),

    /// IO operation failed
    Io(std::io::Error),

    /// Lookup by trace id or session id failed
    UnknownTrace(String),

    /// Invalid query parameter
    InvalidQuery(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parser(err) => write!(f, "Parser error: {}", err),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::UnknownTrace(id) => write!(f, "unknown trace/session: {}", id),
            Error::InvalidQuery(msg) => write!(f, "Invalid query: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Parser(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::UnknownTrace(_) | Error::InvalidQuery(_) => None,
        }
    }
}

impl From<agentlens_parsers::Error> for Error {
    fn from(err: agentlens_parsers::Error) -> Self {
        Error::Parser(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}
