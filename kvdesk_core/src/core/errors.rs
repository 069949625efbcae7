use std::fmt::{self, Display};

use crate::connections::errors::ConnectionError;

/// Failure taxonomy shared by the session manager, the metrics store,
/// the operation tracker and the profile store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Unknown session, operation or profile id.
    NotFound(String),
    /// Double cancellation, duplicate operation or profile id.
    Conflict(String),
    /// No live connection for a session, or the remote store is unreachable.
    Unavailable(String),
    /// Malformed profile, unsupported metric period, empty pattern...
    InvalidInput(String),
    /// A bounded external call exceeded its deadline.
    Timeout(String),
    /// Reading or writing the profile file failed.
    Storage(String),
}

impl CoreError {
    /// `true` when the caller should send the user back to the connect screen.
    pub fn needs_reconnect(&self) -> bool {
        matches!(self, CoreError::Unavailable(_))
    }
}

impl From<ConnectionError> for CoreError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Timeout(msg) => CoreError::Timeout(msg),
            // The store is reachable; it refused this particular command.
            ConnectionError::Server(msg) => {
                CoreError::InvalidInput(format!("command rejected: {msg}"))
            }
            other => CoreError::Unavailable(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::InvalidInput(format!("invalid JSON: {err}"))
    }
}

impl Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::NotFound(msg) => write!(f, "Not found: {}", msg),
            CoreError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            CoreError::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            CoreError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            CoreError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            CoreError::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for CoreError {}
