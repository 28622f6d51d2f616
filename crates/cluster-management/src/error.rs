//! Error types for cluster management

use thiserror::Error;

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Errors that can occur during cluster operations
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The caller does not hold the named lock
    #[error("Lock {name} is not held by {holder}")]
    LockNotHeld { name: String, holder: String },

    /// Lock backend failure
    #[error("Lock backend error: {0}")]
    Backend(String),
}

impl ClusterError {
    /// Get error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            ClusterError::Configuration(_) => "configuration",
            ClusterError::LockNotHeld { .. } => "lock_not_held",
            ClusterError::Backend(_) => "backend",
        }
    }
}
