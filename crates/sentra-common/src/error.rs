//! Error types for Sentra

use thiserror::Error;

/// Sentra error type
#[derive(Error, Debug)]
pub enum SentraError {
    /// Configuration invalid or unreadable
    #[error("config error: {0}")]
    Config(String),

    /// Model artifact missing, unparseable, or shape-mismatched
    #[error("model artifact error: {0}")]
    ModelArtifact(String),

    /// Named capture interface does not exist
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),

    /// The host refused raw capture on the interface
    #[error("insufficient capture privilege on {0}")]
    InsufficientPrivilege(String),

    /// Capture channel failure
    #[error("capture error: {0}")]
    Capture(String),

    /// Durable storage failure
    #[error("storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SentraError {
    /// Process exit code for fatal startup errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 64,
            Self::ModelArtifact(_) => 65,
            Self::InsufficientPrivilege(_) => 77,
            Self::InterfaceNotFound(_) => 77,
            Self::Storage(_) => 74,
            Self::Capture(_) | Self::Io(_) => 1,
        }
    }
}

/// Result type for Sentra
pub type SentraResult<T> = Result<T, SentraError>;

/// Errors surfaced by the query/subscribe surface.
///
/// Transports map these to their own status codes; internal detail
/// never crosses this boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Referenced record does not exist
    #[error("not found")]
    NotFound,

    /// Caller-supplied filter or transition is invalid
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Backing store is degraded or disabled
    #[error("unavailable")]
    Unavailable,
}
