//! Error types for Skerry

use std::fmt;

/// Broad classification of an error, mirroring the severity classes the
/// session reports to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Terminal for the current connection.
    Fatal,
    /// The peer refused a request; the connection survives.
    RequestDenied,
    /// The library was used incorrectly (programmer error).
    InvalidState,
}

/// Unified error type for all Skerry operations
#[derive(Debug)]
pub enum SkerryError {
    /// I/O error
    Io(std::io::Error),

    /// Configuration error
    Config(String),

    /// Protocol error (malformed or unexpected peer data)
    Protocol(String),

    /// Security error (key exchange, signature verification)
    Security(String),

    /// The peer denied a request
    RequestDenied(String),

    /// Operation invalid in the current session state
    InvalidState(String),

    /// Feature intentionally not supported
    NotSupported(String),
}

impl SkerryError {
    /// Returns the severity class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SkerryError::RequestDenied(_) => ErrorKind::RequestDenied,
            SkerryError::InvalidState(_) => ErrorKind::InvalidState,
            _ => ErrorKind::Fatal,
        }
    }

    /// Returns true if the error is terminal for the connection.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

impl fmt::Display for SkerryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkerryError::Io(e) => write!(f, "IO error: {}", e),
            SkerryError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SkerryError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            SkerryError::Security(msg) => write!(f, "Security error: {}", msg),
            SkerryError::RequestDenied(msg) => write!(f, "Request denied: {}", msg),
            SkerryError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            SkerryError::NotSupported(msg) => write!(f, "Not supported: {}", msg),
        }
    }
}

impl std::error::Error for SkerryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SkerryError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SkerryError {
    fn from(err: std::io::Error) -> Self {
        SkerryError::Io(err)
    }
}

/// Result type for Skerry operations
pub type SkerryResult<T> = Result<T, SkerryError>;
