//! Encoder/muxer interface
//!
//! A [`Muxer`] creates container writers. A writer hands out one
//! [`TrackInput`] per media kind; each input is fed from a single worker, so
//! inputs only need to be `Send`.

use super::types::{OutputTarget, TrackSettings};
use crate::capture::traits::{FramePayload, MediaKind};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by an encoder/muxer backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MuxerError {
    #[error("Failed to create writer: {0}")]
    Create(String),

    #[error("Failed to add track: {0}")]
    Track(String),

    #[error("Failed to open writer: {0}")]
    Open(String),

    #[error("Sample rejected: {0}")]
    Append(String),

    #[error("Failed to finalize: {0}")]
    Finalize(String),
}

/// Factory for container writers
pub trait Muxer: Send + Sync {
    fn create_writer(&self, target: &OutputTarget) -> Result<Arc<dyn ContainerWriter>, MuxerError>;
}

/// An output container being written
#[async_trait]
pub trait ContainerWriter: Send + Sync {
    /// Register a track. Only valid before `start_writing`.
    fn add_track_input(&self, settings: TrackSettings) -> Result<Box<dyn TrackInput>, MuxerError>;

    /// Open the container for writing
    fn start_writing(&self) -> Result<(), MuxerError>;

    /// Start the timeline at `at`; samples are placed relative to it
    fn start_session(&self, at: Duration);

    /// Complete the container once every track input is finished
    async fn finalize(&self) -> Result<(), MuxerError>;
}

/// Encoder-side destination for samples of one media kind
pub trait TrackInput: Send {
    fn kind(&self) -> MediaKind;

    fn is_ready_for_more_data(&self) -> bool;

    /// Append one sample; an error means it was rejected
    fn append(&mut self, payload: &FramePayload, pts: Duration) -> Result<(), MuxerError>;

    /// No further samples will be appended
    fn mark_finished(&mut self);
}
