use std::fmt::{self, Display};

/// Transport-level errors raised by a store client.
#[derive(Debug)]
pub enum ConnectionError {
    IoError(std::io::Error),
    /// The reply had an unexpected shape.
    Protocol(String),
    /// `AUTH` was rejected.
    Auth(String),
    /// The server answered with an error reply.
    Server(String),
    /// A bounded call ran past its deadline.
    Timeout(String),
    /// The connection was closed, locally or by the peer.
    Closed,
    Other(String),
}

/// Convert from std::io::Error.
impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> ConnectionError {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe => ConnectionError::Closed,
            _ => ConnectionError::IoError(err),
        }
    }
}

/// Convert from an elapsed `tokio::time::timeout`.
impl From<tokio::time::error::Elapsed> for ConnectionError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        ConnectionError::Timeout(err.to_string())
    }
}

/// Classify a `redis` client error.
impl From<redis::RedisError> for ConnectionError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            ConnectionError::Timeout(err.to_string())
        } else if err.kind() == redis::ErrorKind::AuthenticationFailed {
            ConnectionError::Auth(err.to_string())
        } else if err.is_connection_dropped() || err.is_unrecoverable_error() {
            ConnectionError::Closed
        } else if err.is_io_error() || err.is_connection_refusal() {
            ConnectionError::IoError(std::io::Error::other(err.to_string()))
        } else if err.code().is_some() {
            ConnectionError::Server(err.to_string())
        } else {
            ConnectionError::Other(err.to_string())
        }
    }
}

impl Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::IoError(e) => write!(f, "IO error: {}", e),
            ConnectionError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            ConnectionError::Auth(msg) => write!(f, "Authentication failed: {}", msg),
            ConnectionError::Server(msg) => write!(f, "Server error: {}", msg),
            ConnectionError::Timeout(msg) => write!(f, "Timed out: {}", msg),
            ConnectionError::Closed => write!(f, "Connection closed"),
            ConnectionError::Other(msg) => write!(f, "Other error: {}", msg),
        }
    }
}

impl std::error::Error for ConnectionError {}
