// ============================================================================
// src/error.rs – Tagged error taxonomy shared by every service
// ============================================================================

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Tag carried by every error handed to the boundary layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    ValidationError,
    Forbidden,
    NotFound,
    Conflict,
    ParseError,
    ExecutionError,
    Timeout,
    ConfigSyntaxError,
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Parse(String),

    #[error("{0}")]
    Execution(String),

    #[error("{command} timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    #[error("Apache configuration test failed: {0}")]
    ConfigSyntax(String),
}

/// Plain record handed to the boundary; nothing beyond the message leaks.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub code: u16,
}

impl AdminError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AdminError::Validation(_) => ErrorKind::ValidationError,
            AdminError::Forbidden(_) => ErrorKind::Forbidden,
            AdminError::NotFound(_) => ErrorKind::NotFound,
            AdminError::Conflict(_) => ErrorKind::Conflict,
            AdminError::Parse(_) => ErrorKind::ParseError,
            AdminError::Execution(_) => ErrorKind::ExecutionError,
            AdminError::Timeout { .. } => ErrorKind::Timeout,
            AdminError::ConfigSyntax(_) => ErrorKind::ConfigSyntaxError,
        }
    }

    /// Suggested HTTP-style status for the boundary layer.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::ValidationError => 400,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Timeout => 504,
            ErrorKind::ParseError | ErrorKind::ExecutionError | ErrorKind::ConfigSyntaxError => {
                500
            }
        }
    }

    /// Timeouts are a specialization of execution failures.
    pub fn is_execution(&self) -> bool {
        matches!(self, AdminError::Execution(_) | AdminError::Timeout { .. })
    }

    pub fn record(&self) -> ErrorRecord {
        ErrorRecord {
            kind: self.kind(),
            message: self.to_string(),
            code: self.status_code(),
        }
    }
}

pub type AdminResult<T> = Result<T, AdminError>;
