//! Recording state management
//!
//! The controller's state machine, the per-pause-cycle segment timeline and
//! the values a recording is started with and produces.

use crate::capture::dispatcher::DispatchStats;
use crate::capture::traits::{CaptureConfig, CaptureTarget};
use crate::encoding::types::{ContainerFormat, EncodeQuality, EncodingStats, OutputTarget};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;
use uuid::Uuid;

/// Current state of the recording system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording has been made yet
    Idle,
    /// Opening the capture stream and the encoder
    Starting,
    /// Frames are flowing into the encoder
    Capturing,
    /// Stream is live but frames are being dropped
    Paused,
    /// Draining tracks and finalizing the container
    Stopping,
    /// Last recording was finalized
    Completed,
    /// Last recording ended in an error
    Failed,
}

impl Default for RecordingState {
    fn default() -> Self {
        Self::Idle
    }
}

impl RecordingState {
    /// A capture stream and encoding session are live
    pub fn is_recording(&self) -> bool {
        matches!(self, RecordingState::Capturing | RecordingState::Paused)
    }

    /// A new recording may be started from here
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            RecordingState::Idle | RecordingState::Completed | RecordingState::Failed
        )
    }
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordingState::Idle => "idle",
            RecordingState::Starting => "starting",
            RecordingState::Capturing => "capturing",
            RecordingState::Paused => "paused",
            RecordingState::Stopping => "stopping",
            RecordingState::Completed => "completed",
            RecordingState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One uninterrupted stretch of capture
///
/// A new segment begins at start and after every resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSegment {
    pub index: usize,

    /// Offset from the start of the recording
    pub start_offset_ms: f64,

    /// Length of the segment; zero while it is still open
    pub duration_ms: f64,

    pub started_at: DateTime<Utc>,

    pub ended_at: Option<DateTime<Utc>>,
}

impl RecordingSegment {
    fn open(index: usize, offset_ms: f64) -> Self {
        Self {
            index,
            start_offset_ms: offset_ms,
            duration_ms: 0.0,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    fn close(&mut self, offset_ms: f64) {
        self.duration_ms = (offset_ms - self.start_offset_ms).max(0.0);
        self.ended_at = Some(Utc::now());
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Wall-clock bookkeeping for one recording
#[derive(Debug, Clone)]
pub struct RecordingTimeline {
    origin: Instant,
    segments: Vec<RecordingSegment>,
}

impl RecordingTimeline {
    /// Start a timeline with its first segment open
    pub fn start() -> Self {
        let mut timeline = Self {
            origin: Instant::now(),
            segments: Vec::new(),
        };
        timeline.open_segment();
        timeline
    }

    fn offset_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }

    fn current(&mut self) -> Option<&mut RecordingSegment> {
        self.segments.last_mut().filter(|s| s.is_open())
    }

    pub fn open_segment(&mut self) {
        if self.current().is_some() {
            return;
        }
        let offset = self.offset_ms();
        self.segments
            .push(RecordingSegment::open(self.segments.len(), offset));
    }

    pub fn close_segment(&mut self) {
        let offset = self.offset_ms();
        if let Some(segment) = self.current() {
            segment.close(offset);
        }
    }

    /// Recorded time so far, excluding pauses
    pub fn duration_ms(&self) -> f64 {
        let now = self.offset_ms();
        self.segments
            .iter()
            .map(|s| {
                if s.is_open() {
                    now - s.start_offset_ms
                } else {
                    s.duration_ms
                }
            })
            .sum()
    }

    pub fn segments(&self) -> &[RecordingSegment] {
        &self.segments
    }
}

/// Everything needed to start a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingConfig {
    pub target: CaptureTarget,
    pub capture: CaptureConfig,
    pub output: OutputTarget,
    pub quality: EncodeQuality,
}

/// Counters from both halves of the pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    /// Cumulative over the controller's lifetime
    pub dispatch: DispatchStats,
    /// Live session, or the most recently finished one
    pub encoding: Option<EncodingStats>,
}

/// Result of a completed recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOutput {
    pub id: Uuid,
    pub path: PathBuf,
    pub format: ContainerFormat,

    /// Total recorded time in milliseconds, excluding pauses
    pub duration_ms: f64,

    pub segments: Vec<RecordingSegment>,

    pub stats: PipelineStats,
}
