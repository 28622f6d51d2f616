/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Error types for backup and restore operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for backup and restore operations
pub type Result<T> = std::result::Result<T, BackupError>;

/// Coarse error classification exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    ValidationConflict,
    RemoteFailure,
    IntegrityViolation,
    IllegalState,
    Internal,
}

/// Errors raised by the orchestration engine
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("{entity} with name {name} already exists")]
    AlreadyExists { entity: &'static str, name: String },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    ValidationConflict(String),

    #[error("Adapter {adapter_id} call failed: {message}")]
    RemoteFailure {
        adapter_id: String,
        message: String,
        retryable: bool,
    },

    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    Lock(#[from] cluster_management::ClusterError),
}

impl BackupError {
    /// Transport-level failure worth retrying
    pub fn transport(adapter_id: impl Into<String>, message: impl Into<String>) -> Self {
        BackupError::RemoteFailure {
            adapter_id: adapter_id.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Adapter answered but the answer is unusable; retrying will not help
    pub fn rejected(adapter_id: impl Into<String>, message: impl Into<String>) -> Self {
        BackupError::RemoteFailure {
            adapter_id: adapter_id.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BackupError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            BackupError::NotFound(_) => ErrorKind::NotFound,
            BackupError::ValidationConflict(_) => ErrorKind::ValidationConflict,
            BackupError::RemoteFailure { .. } => ErrorKind::RemoteFailure,
            BackupError::IntegrityViolation(_) => ErrorKind::IntegrityViolation,
            BackupError::IllegalState(_) => ErrorKind::IllegalState,
            BackupError::Serialization(_) | BackupError::Config(_) | BackupError::Lock(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackupError::RemoteFailure { retryable: true, .. })
    }

    /// Get error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            BackupError::AlreadyExists { .. } => "already_exists",
            BackupError::NotFound(_) => "not_found",
            BackupError::ValidationConflict(_) => "validation_conflict",
            BackupError::RemoteFailure { .. } => "remote_failure",
            BackupError::IntegrityViolation(_) => "integrity_violation",
            BackupError::IllegalState(_) => "illegal_state",
            BackupError::Serialization(_) => "serialization",
            BackupError::Config(_) => "configuration",
            BackupError::Lock(_) => "lock",
        }
    }

    /// Text stored into a failed child's error message
    pub fn status_message(&self) -> String {
        match self {
            BackupError::RemoteFailure { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
