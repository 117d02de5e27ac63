/*!
 * Error types for Shardline
 */

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, ShardlineError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug)]
pub enum ShardlineError {
    /// The signing service could not issue a URL for an object
    SigningFailure {
        name: String,
        status: Option<u16>,
        reason: String,
    },

    /// The object transfer itself failed
    TransferFailure {
        name: String,
        status: Option<u16>,
        reason: String,
        transient: bool,
    },

    /// Push/sentinel misuse
    ProtocolViolation(String),

    /// Configuration error
    Config(String),

    /// Malformed manifest record
    Manifest {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    /// Object name that cannot be mapped to a local path
    InvalidName(String),

    /// I/O error
    Io(io::Error),

    /// HTTP client error
    Http(reqwest::Error),

    /// Every allowed attempt failed
    RetriesExhausted {
        attempts: u32,
        last: Box<ShardlineError>,
    },

    /// `wait` gave up before the batch drained
    WaitTimeout(Duration),
}

impl ShardlineError {
    /// Build a transfer failure from an HTTP status code
    pub fn from_status(name: &str, status: u16, reason: impl Into<String>) -> Self {
        ShardlineError::TransferFailure {
            name: name.to_string(),
            status: Some(status),
            reason: reason.into(),
            transient: is_transient_status(status),
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ShardlineError::ProtocolViolation(_)
            | ShardlineError::Config(_)
            | ShardlineError::Manifest { .. } => EXIT_FATAL,
            _ => EXIT_PARTIAL,
        }
    }

    /// Check if this error aborts the whole call rather than one job
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ShardlineError::ProtocolViolation(_)
                | ShardlineError::Config(_)
                | ShardlineError::Manifest { .. }
        )
    }

    /// Check if another attempt at the same job may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ShardlineError::SigningFailure { .. } => true,
            ShardlineError::TransferFailure { transient, .. } => *transient,
            ShardlineError::Io(io_err) => Self::is_io_transient(io_err),
            ShardlineError::Http(http_err) => {
                http_err.is_timeout()
                    || http_err.is_connect()
                    || http_err.is_request()
                    || http_err.is_body()
                    || http_err.status().map(|s| is_transient_status(s.as_u16())).unwrap_or(false)
            }
            _ => false,
        }
    }

    fn is_io_transient(io_err: &io::Error) -> bool {
        use io::ErrorKind::*;
        matches!(
            io_err.kind(),
            ConnectionRefused
                | ConnectionReset
                | ConnectionAborted
                | NotConnected
                | BrokenPipe
                | TimedOut
                | Interrupted
                | WouldBlock
                | UnexpectedEof
        )
    }

    /// Get error category for logging and reporting
    pub fn category(&self) -> ErrorCategory {
        match self {
            ShardlineError::SigningFailure { .. } => ErrorCategory::Signing,
            ShardlineError::TransferFailure { .. } | ShardlineError::Http(_) => {
                ErrorCategory::Network
            }
            ShardlineError::ProtocolViolation(_) => ErrorCategory::Protocol,
            ShardlineError::Config(_) => ErrorCategory::Configuration,
            ShardlineError::Manifest { .. } | ShardlineError::InvalidName(_) => {
                ErrorCategory::Validation
            }
            ShardlineError::Io(_) => ErrorCategory::IoError,
            ShardlineError::RetriesExhausted { .. } => ErrorCategory::Retry,
            ShardlineError::WaitTimeout(_) => ErrorCategory::Timeout,
        }
    }
}

/// 408, 429 and 5xx responses are worth retrying
pub fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Presign service errors
    Signing,
    /// Object store / HTTP errors
    Network,
    /// Push framing errors
    Protocol,
    /// Configuration errors
    Configuration,
    /// Manifest and name validation errors
    Validation,
    /// Local I/O errors
    IoError,
    /// Retry exhaustion
    Retry,
    /// Wait deadline
    Timeout,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Signing => write!(f, "signing"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Retry => write!(f, "retry"),
            ErrorCategory::Timeout => write!(f, "timeout"),
        }
    }
}

impl fmt::Display for ShardlineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardlineError::SigningFailure {
                name,
                status,
                reason,
            } => match status {
                Some(code) => write!(f, "Signing failed for {} (HTTP {}): {}", name, code, reason),
                None => write!(f, "Signing failed for {}: {}", name, reason),
            },
            ShardlineError::TransferFailure {
                name,
                status,
                reason,
                ..
            } => match status {
                Some(code) => write!(f, "Transfer failed for {} (HTTP {}): {}", name, code, reason),
                None => write!(f, "Transfer failed for {}: {}", name, reason),
            },
            ShardlineError::ProtocolViolation(msg) => {
                write!(f, "Protocol violation: {}", msg)
            }
            ShardlineError::Config(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
            ShardlineError::Manifest { path, line, reason } => {
                write!(f, "Bad manifest {} line {}: {}", path.display(), line, reason)
            }
            ShardlineError::InvalidName(name) => {
                write!(f, "Invalid object name: {:?}", name)
            }
            ShardlineError::Io(err) => {
                write!(f, "I/O error: {}", err)
            }
            ShardlineError::Http(err) => {
                write!(f, "HTTP error: {}", err)
            }
            ShardlineError::RetriesExhausted { attempts, last } => {
                write!(f, "All {} attempts exhausted: {}", attempts, last)
            }
            ShardlineError::WaitTimeout(after) => {
                write!(f, "Batch did not drain within {:?}", after)
            }
        }
    }
}

impl std::error::Error for ShardlineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShardlineError::Io(err) => Some(err),
            ShardlineError::Http(err) => Some(err),
            ShardlineError::RetriesExhausted { last, .. } => Some(last.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for ShardlineError {
    fn from(err: io::Error) -> Self {
        ShardlineError::Io(err)
    }
}

impl From<reqwest::Error> for ShardlineError {
    fn from(err: reqwest::Error) -> Self {
        ShardlineError::Http(err)
    }
}

impl From<serde_json::Error> for ShardlineError {
    fn from(err: serde_json::Error) -> Self {
        ShardlineError::Config(format!("JSON parse error: {}", err))
    }
}

impl From<toml::de::Error> for ShardlineError {
    fn from(err: toml::de::Error) -> Self {
        ShardlineError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<shardline_core_resilience::ResilienceError> for ShardlineError {
    fn from(err: shardline_core_resilience::ResilienceError) -> Self {
        ShardlineError::Config(err.to_string())
    }
}
