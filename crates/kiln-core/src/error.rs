//! Error types for Kiln

use thiserror::Error;

/// The main error type for Kiln operations
#[derive(Debug, Error)]
pub enum KilnError {
    /// Missing credential or endpoint. Fatal, never retried.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Malformed caller input, rejected before any remote call.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Remote task creation failed or returned a non-success response.
    #[error("Generation service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The remote service does not know the task id.
    #[error("Task not found: {0}")]
    NotFound(String),

    /// A create/poll call failed or the remote reported an error status.
    #[error("Service error{}: {message}", status_suffix(.status))]
    ServiceError {
        status: Option<u16>,
        message: String,
    },

    /// Connection-level failure (timeout, DNS, reset).
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Binary download failed during materialization.
    #[error("Fetch error{}: {message}", status_suffix(.status))]
    FetchError {
        status: Option<u16>,
        message: String,
    },

    /// Malformed service or model response.
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Stage timed out: {0}")]
    Timeout(String),

    #[error("Library error: {0}")]
    LibraryError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(String),

    #[error("TOML serialization error: {0}")]
    TomlSerError(String),

    #[error("JSON error: {0}")]
    JsonError(String),
}

impl KilnError {
    /// Whether this error is a transient connection problem that a later
    /// poll tick may recover from.
    pub fn is_transient(&self) -> bool {
        matches!(self, KilnError::TransportError(_))
    }

    /// Remote HTTP status carried by the error, if any
    pub fn remote_status(&self) -> Option<u16> {
        match self {
            KilnError::ServiceError { status, .. } | KilnError::FetchError { status, .. } => {
                *status
            }
            _ => None,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

/// Result type alias for Kiln operations
pub type Result<T> = std::result::Result<T, KilnError>;

impl From<toml::de::Error> for KilnError {
    fn from(err: toml::de::Error) -> Self {
        KilnError::TomlParseError(err.to_string())
    }
}

impl From<toml::ser::Error> for KilnError {
    fn from(err: toml::ser::Error) -> Self {
        KilnError::TomlSerError(err.to_string())
    }
}

impl From<serde_json::Error> for KilnError {
    fn from(err: serde_json::Error) -> Self {
        KilnError::JsonError(err.to_string())
    }
}
