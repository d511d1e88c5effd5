//! Error types for remote store operations

use std::fmt;
use std::io;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Unified error type for remote store operations
#[derive(Debug)]
pub enum StoreError {
    /// I/O error during a store operation
    Io(io::Error),

    /// Object not found
    NotFound { key: String, store: String },

    /// Access denied by the backend (permission or quota). Treated as a
    /// resolvable misconfiguration: the container ID is invalidated and
    /// re-resolved on a later attempt.
    AccessDenied { key: String, message: String },

    /// Conditional create lost: the object already exists
    AlreadyExists { key: String },

    /// Network failure or backend-side transient error
    Network {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid store configuration (bad credentials material, bad bucket)
    InvalidConfig { store: String, message: String },

    /// Generic backend error with context
    Other { store: String, message: String },
}

impl StoreError {
    /// Transient errors are retried on the next cycle with no special
    /// handling; they never invalidate the resolved container.
    pub fn is_retriable(&self) -> bool {
        match self {
            StoreError::Network { .. } => true,
            StoreError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            StoreError::NotFound { .. } => false,
            StoreError::AccessDenied { .. } => false,
            StoreError::AlreadyExists { .. } => false,
            StoreError::InvalidConfig { .. } => false,
            StoreError::Other { .. } => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Access/quota errors mark the resolved container as wrong (spec-wise,
    /// the "resolvable misconfiguration" class).
    pub fn is_access_denied(&self) -> bool {
        matches!(self, StoreError::AccessDenied { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(err) => write!(f, "I/O error: {}", err),
            StoreError::NotFound { key, store } => {
                write!(f, "Object not found on {}: {}", store, key)
            }
            StoreError::AccessDenied { key, message } => {
                write!(f, "Access denied for {}: {}", key, message)
            }
            StoreError::AlreadyExists { key } => {
                write!(f, "Object already exists: {}", key)
            }
            StoreError::Network { message, source } => {
                if let Some(src) = source {
                    write!(f, "Network error: {} ({})", message, src)
                } else {
                    write!(f, "Network error: {}", message)
                }
            }
            StoreError::InvalidConfig { store, message } => {
                write!(f, "Invalid configuration for {}: {}", store, message)
            }
            StoreError::Other { store, message } => {
                write!(f, "Store error on {}: {}", store, message)
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::Io(err)
    }
}
