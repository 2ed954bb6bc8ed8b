//! Error types and handling
//!
//! Common error types used across the capture pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Capture target unavailable: {0}")]
    TargetUnavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Configuration rejected: {0}")]
    ConfigurationRejected(String),

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("Frame dropped: {0}")]
    BackpressureDrop(String),

    #[error("Capture stream failed: {0}")]
    StreamFailure(String),

    #[error("Failed to finalize container: {0}")]
    MuxFinalizeError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RecorderError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            RecorderError::TargetUnavailable(_) => "TARGET_UNAVAILABLE",
            RecorderError::PermissionDenied(_) => "PERMISSION_DENIED",
            RecorderError::ConfigurationRejected(_) => "CONFIGURATION_REJECTED",
            RecorderError::AlreadyRecording => "ALREADY_RECORDING",
            RecorderError::NotRecording => "NOT_RECORDING",
            RecorderError::BackpressureDrop(_) => "BACKPRESSURE_DROP",
            RecorderError::StreamFailure(_) => "STREAM_FAILURE",
            RecorderError::MuxFinalizeError(_) => "MUX_FINALIZE_ERROR",
            RecorderError::Io(_) => "IO_ERROR",
            RecorderError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

/// Error response for front ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<RecorderError> for ErrorResponse {
    fn from(error: RecorderError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;
