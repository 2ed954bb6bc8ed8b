//! Platform capture provider interface
//!
//! A provider enumerates capturable content and opens streams. A stream
//! pushes frames (and failures) into the [`FrameSink`] it was given; it
//! never holds a reference back to whoever consumes them.

use super::dispatcher::FrameSink;
use super::traits::{CapturableContent, CaptureConfig, ContentFilter, MediaKind};
use crate::utils::error::RecorderError;
use thiserror::Error;

/// Errors reported by a platform capture provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Platform error: {0}")]
    Platform(String),
}

impl From<ProviderError> for RecorderError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::PermissionDenied(msg) => RecorderError::PermissionDenied(msg),
            ProviderError::NotFound(msg) => RecorderError::TargetUnavailable(msg),
            ProviderError::Rejected(msg) => RecorderError::ConfigurationRejected(msg),
            ProviderError::Platform(msg) => RecorderError::ConfigurationRejected(msg),
        }
    }
}

/// Platform screen/audio capture primitive
pub trait CaptureProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// List everything that can currently be captured
    fn enumerate_content(&self) -> Result<CapturableContent, ProviderError>;

    /// Build a stream for the given filter and configuration (not started)
    fn open_stream(
        &self,
        filter: &ContentFilter,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureStream>, ProviderError>;
}

/// A live connection to the platform capture source
pub trait CaptureStream: Send {
    /// Ask the stream to deliver frames of `kind` into `sink`
    fn add_output(&mut self, kind: MediaKind, sink: FrameSink) -> Result<(), ProviderError>;

    /// Apply a new filter and configuration while running
    fn update(&mut self, filter: &ContentFilter, config: &CaptureConfig) -> Result<(), ProviderError>;

    fn start(&mut self) -> Result<(), ProviderError>;

    fn stop(&mut self) -> Result<(), ProviderError>;
}
