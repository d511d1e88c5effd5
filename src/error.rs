/*!
 * Error types for updraft
 */

use crate::resolver::ConfigError;
use crate::store::StoreError;
use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Exit code constants for the runtime control surface: external
/// supervisors drive the daemon on exit status alone, never by parsing
/// logs.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_DEGRADED: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug)]
pub enum SyncError {
    /// Configuration resolution failed
    Resolve(ConfigError),

    /// Remote store operation failed
    Store(StoreError),

    /// I/O error
    Io(io::Error),

    /// Config file is malformed or unreadable
    Config(String),

    /// Another writer holds the container lease
    LeaseHeld { holder: String },

    /// Scheduler is not running (stale or missing heartbeat)
    SchedulerDown { reason: String },

    /// Generic error with message
    Other(String),
}

impl SyncError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            // Fatal, no automated retry: missing credentials, broken config
            SyncError::Resolve(ConfigError::NoCredentials) | SyncError::Config(_) => EXIT_FATAL,
            // Everything else is degraded and retried on a later cycle
            _ => EXIT_DEGRADED,
        }
    }

    /// Fatal errors abort the process and are never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Resolve(ConfigError::NoCredentials) | SyncError::Config(_)
        )
    }

    /// Transient errors resolve on a later cycle with no special handling.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Store(e) => e.is_retriable(),
            SyncError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }

    /// Resolvable misconfiguration: the container ID is invalidated and
    /// re-resolved on the next scheduled attempt.
    pub fn needs_reresolution(&self) -> bool {
        match self {
            SyncError::Store(e) => e.is_access_denied(),
            SyncError::Resolve(ConfigError::NoContainerAvailable) => true,
            SyncError::Resolve(ConfigError::ProbeFailed { .. }) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Resolve(err) => write!(f, "Configuration resolution failed: {}", err),
            SyncError::Store(err) => write!(f, "Remote store error: {}", err),
            SyncError::Io(err) => write!(f, "I/O error: {}", err),
            SyncError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SyncError::LeaseHeld { holder } => {
                write!(f, "Writer lease held by another node: {}", holder)
            }
            SyncError::SchedulerDown { reason } => {
                write!(f, "Scheduler not running: {}", reason)
            }
            SyncError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Resolve(err) => Some(err),
            SyncError::Store(err) => Some(err),
            SyncError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for SyncError {
    fn from(err: io::Error) -> Self {
        SyncError::Io(err)
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::Store(err)
    }
}

impl From<ConfigError> for SyncError {
    fn from(err: ConfigError) -> Self {
        SyncError::Resolve(err)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Config(format!("JSON parse error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(SyncError::Resolve(ConfigError::NoCredentials).is_fatal());
        assert!(SyncError::Config("bad toml".to_string()).is_fatal());
        assert!(!SyncError::Resolve(ConfigError::NoContainerAvailable).is_fatal());
        assert!(!SyncError::Other("oops".to_string()).is_fatal());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            SyncError::Resolve(ConfigError::NoCredentials).exit_code(),
            EXIT_FATAL
        );
        assert_eq!(SyncError::Config("x".to_string()).exit_code(), EXIT_FATAL);
        assert_eq!(
            SyncError::Resolve(ConfigError::NoContainerAvailable).exit_code(),
            EXIT_DEGRADED
        );
        assert_eq!(
            SyncError::SchedulerDown {
                reason: "stale heartbeat".to_string()
            }
            .exit_code(),
            EXIT_DEGRADED
        );
        assert_eq!(EXIT_SUCCESS, 0);
    }

    #[test]
    fn test_transient_classification() {
        let err = SyncError::Store(StoreError::Network {
            message: "reset".to_string(),
            source: None,
        });
        assert!(err.is_transient());
        assert!(!err.is_fatal());

        let err = SyncError::Store(StoreError::AccessDenied {
            key: "c".to_string(),
            message: "403".to_string(),
        });
        assert!(!err.is_transient());
        assert!(err.needs_reresolution());
    }

    #[test]
    fn test_reresolution_triggers() {
        assert!(SyncError::Resolve(ConfigError::NoContainerAvailable).needs_reresolution());
        assert!(!SyncError::Resolve(ConfigError::NoCredentials).needs_reresolution());
        assert!(!SyncError::Other("x".to_string()).needs_reresolution());
    }

    #[test]
    fn test_display() {
        let err = SyncError::LeaseHeld {
            holder: "node-7f".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Writer lease held by another node: node-7f"
        );
    }
}
