use std::fmt;

/// Result type for agentlens-resolver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the resolver layer
#[derive(Debug)]
pub enum Error {
    /// IO operation failed
    Io(std::io::Error),

    /// Subprocess exited abnormally (lsof exit 1 with no matches is the
    /// benign case and never surfaces here)
    Subprocess(String),

    /// Signal delivery failed
    Signal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Subprocess(msg) => write!(f, "Subprocess error: {}", msg),
            Error::Signal(msg) => write!(f, "Signal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Subprocess(_) | Error::Signal(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}
